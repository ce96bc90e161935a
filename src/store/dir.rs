//! Directory-backed store backend.
//!
//! Groups map to directories under a root, datasets to plain files, and
//! each group's attributes live in one `attrs.json` file serialised with
//! serde. The layout is human-inspectable, which the tools rely on for
//! debugging half-built containers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::store::{AttrValue, GroupStore, ROOT_GROUP};

const ATTRS_FILE: &str = "attrs.json";

/// Filesystem store used by the command-line tools.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (or start) a container rooted at `root`. The directory itself
    /// is created lazily by the first group creation.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Does `root` already hold a container (a `bbic/` group)?
    pub fn is_container(root: &Path) -> bool {
        root.join(ROOT_GROUP).is_dir()
    }

    fn fs_path(&self, path: &str) -> PathBuf {
        let mut p = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            p.push(segment);
        }
        p
    }

    fn read_attrs(&self, path: &str) -> Result<BTreeMap<String, AttrValue>, StoreError> {
        let file = self.fs_path(path).join(ATTRS_FILE);
        if !file.is_file() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read(&file)?;
        serde_json::from_slice(&data).map_err(|e| StoreError::Io(e.to_string()))
    }

    fn write_attrs(
        &self,
        path: &str,
        attrs: &BTreeMap<String, AttrValue>,
    ) -> Result<(), StoreError> {
        let file = self.fs_path(path).join(ATTRS_FILE);
        let data =
            serde_json::to_vec_pretty(attrs).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::write(&file, data)?;
        Ok(())
    }
}

impl GroupStore for DirStore {
    fn has(&self, path: &str) -> bool {
        self.fs_path(path).is_dir()
    }

    fn has_dataset(&self, path: &str) -> bool {
        self.fs_path(path).is_file()
    }

    fn create_group(&self, path: &str) -> Result<(), StoreError> {
        let dir = self.fs_path(path);
        if dir.is_dir() {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        fs::create_dir_all(&dir)?;
        Ok(())
    }

    fn require_group(&self, path: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.fs_path(path))?;
        Ok(())
    }

    fn get_attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>, StoreError> {
        if !self.has(path) {
            return Err(StoreError::Missing(path.to_string()));
        }
        Ok(self.read_attrs(path)?.get(name).cloned())
    }

    fn set_attr(&self, path: &str, name: &str, value: AttrValue) -> Result<(), StoreError> {
        if !self.has(path) {
            return Err(StoreError::Missing(path.to_string()));
        }
        let mut attrs = self.read_attrs(path)?;
        attrs.insert(name.to_string(), value);
        self.write_attrs(path, &attrs)
    }

    fn create_dataset(&self, path: &str, len: u64) -> Result<(), StoreError> {
        let file = self.fs_path(path);
        if file.is_file() {
            let actual = fs::metadata(&file)?.len();
            if actual == len {
                return Ok(());
            }
            return Err(StoreError::CollectiveMismatch {
                path: path.to_string(),
                requested: len,
                actual,
            });
        }
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, vec![0u8; len as usize])?;
        Ok(())
    }

    fn write_dataset(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let file = self.fs_path(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, data)?;
        Ok(())
    }

    fn read_dataset(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let file = self.fs_path(path);
        if !file.is_file() {
            return Err(StoreError::Missing(path.to_string()));
        }
        Ok(fs::read(&file)?)
    }
}
