//! In-memory store backend.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::store::{AttrValue, GroupStore};

/// Hash-map backed store, shared between in-process workers in tests and
/// the multi-worker harness.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    groups: HashSet<String>,
    attrs: HashMap<String, HashMap<String, AttrValue>>,
    datasets: HashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic snapshot of the full store content, keyed by
    /// `attr:{path}#{name}` and `data:{path}`. Used by tests to compare
    /// containers byte-wise.
    pub fn dump(&self) -> BTreeMap<String, Vec<u8>> {
        let inner = self.inner.read();
        let mut out = BTreeMap::new();
        for (path, attrs) in &inner.attrs {
            for (name, value) in attrs {
                out.insert(
                    format!("attr:{}#{}", path, name),
                    format!("{:?}", value).into_bytes(),
                );
            }
        }
        for (path, data) in &inner.datasets {
            out.insert(format!("data:{}", path), data.clone());
        }
        out
    }
}

fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .filter(|&(_, c)| c == '/')
        .map(move |(i, _)| &path[..i])
}

impl Inner {
    fn insert_group_with_parents(&mut self, path: &str) {
        for parent in ancestors(path) {
            self.groups.insert(parent.to_string());
        }
        self.groups.insert(path.to_string());
    }

    fn insert_parents_of(&mut self, path: &str) {
        for parent in ancestors(path) {
            self.groups.insert(parent.to_string());
        }
    }
}

impl GroupStore for MemStore {
    fn has(&self, path: &str) -> bool {
        self.inner.read().groups.contains(path)
    }

    fn has_dataset(&self, path: &str) -> bool {
        self.inner.read().datasets.contains_key(path)
    }

    fn create_group(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.groups.contains(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        inner.insert_group_with_parents(path);
        Ok(())
    }

    fn require_group(&self, path: &str) -> Result<(), StoreError> {
        self.inner.write().insert_group_with_parents(path);
        Ok(())
    }

    fn get_attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>, StoreError> {
        let inner = self.inner.read();
        if !inner.groups.contains(path) {
            return Err(StoreError::Missing(path.to_string()));
        }
        Ok(inner.attrs.get(path).and_then(|a| a.get(name)).cloned())
    }

    fn set_attr(&self, path: &str, name: &str, value: AttrValue) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.groups.contains(path) {
            return Err(StoreError::Missing(path.to_string()));
        }
        inner
            .attrs
            .entry(path.to_string())
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }

    fn create_dataset(&self, path: &str, len: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.datasets.get(path) {
            if existing.len() as u64 == len {
                return Ok(());
            }
            return Err(StoreError::CollectiveMismatch {
                path: path.to_string(),
                requested: len,
                actual: existing.len() as u64,
            });
        }
        inner.insert_parents_of(path);
        inner.datasets.insert(path.to_string(), vec![0; len as usize]);
        Ok(())
    }

    fn write_dataset(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.insert_parents_of(path);
        inner.datasets.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn read_dataset(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.inner
            .read()
            .datasets
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::Missing(path.to_string()))
    }
}
