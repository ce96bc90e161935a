//! Persistent container store.
//!
//! The container is a hierarchical key-value store with typed attributes,
//! modelled after an HDF5 file: *groups* form a path hierarchy, *datasets*
//! are byte arrays at leaf paths, and every group carries a small attribute
//! map. The [`GroupStore`] trait is the seam between the pyramid builders
//! and the storage backend, so an HDF5/MPI-IO backend can be substituted
//! without touching the builders.
//!
//! Two backends ship with the crate:
//!
//! - [`MemStore`]: hash maps behind a lock; used by tests and by the
//!   in-process multi-worker harness.
//! - [`DirStore`]: directories as groups, files as datasets, one
//!   `attrs.json` per group; used by the command-line tools.
//!
//! # Collective creation
//!
//! When several workers share one store, dataset *creation* is collective:
//! every worker issues the same `create_dataset` calls in the same order.
//! [`GroupStore::create_dataset`] is therefore idempotent for an existing
//! dataset of identical length and fails with
//! [`StoreError::CollectiveMismatch`](crate::error::StoreError) otherwise.

mod dir;
mod mem;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use dir::DirStore;
pub use mem::MemStore;

/// Shared handle to a store backend.
pub type StoreRef = Arc<dyn GroupStore>;

/// Root group of every container.
pub const ROOT_GROUP: &str = "bbic";

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttrValue {
    U32(u32),
    U64(u64),
    Bool(bool),
    Text(String),
    Matrix([[f64; 4]; 4]),
}

impl AttrValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AttrValue::U32(v) => Some(*v),
            AttrValue::U64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&[[f64; 4]; 4]> {
        match self {
            AttrValue::Matrix(m) => Some(m),
            _ => None,
        }
    }
}

/// Hierarchical key-value store with typed attributes.
///
/// Paths are `/`-separated, relative, without leading or trailing slashes
/// (`bbic/stacks/0/levels/2`). Creating a dataset or group implicitly
/// creates missing intermediate groups, as HDF5 does.
pub trait GroupStore: Send + Sync {
    /// Does a group exist at this path?
    fn has(&self, path: &str) -> bool;

    /// Does a dataset exist at this path?
    fn has_dataset(&self, path: &str) -> bool;

    /// Create a new group. Fails with `AlreadyExists` if present.
    fn create_group(&self, path: &str) -> Result<(), StoreError>;

    /// Create the group if missing; never fails on an existing group.
    fn require_group(&self, path: &str) -> Result<(), StoreError>;

    /// Read one attribute, `None` if the attribute is absent.
    fn get_attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>, StoreError>;

    /// Create or overwrite one attribute.
    fn set_attr(&self, path: &str, name: &str, value: AttrValue) -> Result<(), StoreError>;

    /// Pre-allocate a zero-filled dataset of exactly `len` bytes.
    ///
    /// Collective-safe: a second creation with the same length is a no-op,
    /// a different length is a `CollectiveMismatch`.
    fn create_dataset(&self, path: &str, len: u64) -> Result<(), StoreError>;

    /// Create or overwrite a dataset with the given bytes.
    fn write_dataset(&self, path: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Read a dataset, `Missing` if absent.
    fn read_dataset(&self, path: &str) -> Result<Vec<u8>, StoreError>;
}

/// Join path segments without introducing duplicate separators.
pub fn join_path(base: &str, child: &str) -> String {
    if base.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", base, child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_value_accessors() {
        assert_eq!(AttrValue::U32(7).as_u32(), Some(7));
        assert_eq!(AttrValue::U64(7).as_u32(), Some(7));
        assert_eq!(AttrValue::Bool(true).as_bool(), Some(true));
        assert_eq!(AttrValue::Text("x".into()).as_text(), Some("x"));
        assert!(AttrValue::Text("x".into()).as_u32().is_none());
    }

    #[test]
    fn test_attr_value_json_round_trip() {
        let mat = AttrValue::Matrix([[1.0, 0.0, 0.0, -4.0]; 4]);
        let json = serde_json::to_string(&mat).unwrap();
        let back: AttrValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mat);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("bbic", "stacks/0"), "bbic/stacks/0");
        assert_eq!(join_path("", "bbic"), "bbic");
    }
}
