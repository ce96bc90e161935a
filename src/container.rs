//! Container root.
//!
//! The container groups everything under the `bbic/` root: a `version`
//! attribute, the stack count, the volume count, and the ordered
//! `stacks/{i}` and `volumes/{i}` children. It owns the store handle and
//! the cluster communicator, and is the only place stacks and volumes are
//! created, so the collective-creation rules stay in one spot.

use std::fmt;
use std::sync::Arc;

use crate::cluster::ClusterComm;
use crate::error::BbicError;
use crate::stack::Stack;
use crate::store::{AttrValue, StoreRef, ROOT_GROUP};
use crate::volume::Volume;

/// Containers written by this crate carry this version.
pub const CONTAINER_CURRENT_VERSION: u32 = 1;

/// Version reported for containers that predate the attribute.
pub const CONTAINER_UNKNOWN_VERSION: u32 = 0;

/// An open container.
pub struct Container {
    store: StoreRef,
    comm: Arc<dyn ClusterComm>,
    pub version: u32,
    pub num_stacks: u32,
    pub num_volumes: u32,
}

impl Container {
    /// Open an existing container for reading.
    ///
    /// # Errors
    ///
    /// `MissingEntity` if the store holds no `bbic/` root.
    pub fn open(store: StoreRef, comm: Arc<dyn ClusterComm>) -> Result<Self, BbicError> {
        if !store.has(ROOT_GROUP) {
            return Err(BbicError::MissingEntity(ROOT_GROUP.to_string()));
        }
        let mut container = Self {
            store,
            comm,
            version: CONTAINER_UNKNOWN_VERSION,
            num_stacks: 0,
            num_volumes: 0,
        };
        container.read_attrs()?;
        Ok(container)
    }

    /// Open a container for writing, creating the root group if needed and
    /// stamping the current version.
    pub fn open_rw(store: StoreRef, comm: Arc<dyn ClusterComm>) -> Result<Self, BbicError> {
        store.require_group(ROOT_GROUP)?;
        let mut container = Self {
            store,
            comm,
            version: CONTAINER_UNKNOWN_VERSION,
            num_stacks: 0,
            num_volumes: 0,
        };
        container.read_attrs()?;
        container.version = CONTAINER_CURRENT_VERSION;
        container.write_attrs()?;
        Ok(container)
    }

    fn read_attrs(&mut self) -> Result<(), BbicError> {
        let read = |name: &str| -> Result<Option<u32>, BbicError> {
            Ok(self.store.get_attr(ROOT_GROUP, name)?.and_then(|v| v.as_u32()))
        };
        if let Some(version) = read("version")? {
            self.version = version;
        }
        if let Some(num_stacks) = read("num_stacks")? {
            self.num_stacks = num_stacks;
        }
        if let Some(num_volumes) = read("num_volumes")? {
            self.num_volumes = num_volumes;
        }
        Ok(())
    }

    fn write_attrs(&self) -> Result<(), BbicError> {
        self.store
            .set_attr(ROOT_GROUP, "version", AttrValue::U32(self.version))?;
        self.store
            .set_attr(ROOT_GROUP, "num_stacks", AttrValue::U32(self.num_stacks))?;
        self.store
            .set_attr(ROOT_GROUP, "num_volumes", AttrValue::U32(self.num_volumes))?;
        Ok(())
    }

    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    pub fn comm(&self) -> &dyn ClusterComm {
        self.comm.as_ref()
    }

    fn stack_path(index: u32) -> String {
        format!("{}/stacks/{}", ROOT_GROUP, index)
    }

    fn volume_path(index: u32) -> String {
        format!("{}/volumes/{}", ROOT_GROUP, index)
    }

    /// Get a stack by its index.
    pub fn get_stack(&self, index: u32) -> Result<Stack, BbicError> {
        let path = Self::stack_path(index);
        if !self.store.has(&path) {
            return Err(BbicError::MissingEntity(path));
        }
        let mut stack = Stack::new(self.store.clone(), path, index);
        stack.read_attrs()?;
        Ok(stack)
    }

    /// Create an empty stack at the given index and write its attributes.
    ///
    /// Creation is collective: every worker checks for the existing group
    /// before any worker creates it, so all ranks agree on the outcome.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the container already holds a stack at `index`.
    pub fn create_stack(&mut self, index: u32) -> Result<Stack, BbicError> {
        let path = Self::stack_path(index);
        let existed = self.store.has(&path);
        self.comm.barrier();
        if existed {
            return Err(BbicError::AlreadyExists(path));
        }
        self.store.require_group(&path)?;
        self.num_stacks = self.num_stacks.max(index + 1);
        self.store
            .set_attr(ROOT_GROUP, "num_stacks", AttrValue::U32(self.num_stacks))?;

        let stack = Stack::new(self.store.clone(), path, index);
        stack.write_attrs()?;
        Ok(stack)
    }

    /// Get a volume by its index.
    pub fn get_volume(&self, index: u32) -> Result<Volume, BbicError> {
        let path = Self::volume_path(index);
        if !self.store.has(&path) {
            return Err(BbicError::MissingEntity(path));
        }
        let mut volume = Volume::new(self.store.clone(), path, index);
        volume.read_attrs()?;
        Ok(volume)
    }

    /// Create an empty volume at the given index and write its attributes.
    pub fn create_volume(&mut self, index: u32) -> Result<Volume, BbicError> {
        let path = Self::volume_path(index);
        let existed = self.store.has(&path);
        self.comm.barrier();
        if existed {
            return Err(BbicError::AlreadyExists(path));
        }
        self.store.require_group(&path)?;
        self.num_volumes = self.num_volumes.max(index + 1);
        self.store
            .set_attr(ROOT_GROUP, "num_volumes", AttrValue::U32(self.num_volumes))?;

        let volume = Volume::new(self.store.clone(), path, index);
        volume.write_attrs()?;
        Ok(volume)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BBIC file v{} - {} stacks, {} volumes",
            self.version, self.num_stacks, self.num_volumes
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
