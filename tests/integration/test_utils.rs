//! Shared fixtures for the integration tests.

use std::sync::{Arc, Mutex};

use image::GrayImage;

use bbic::cluster::{ClusterComm, SingleProcess};
use bbic::container::Container;
use bbic::error::{BbicError, StoreError};
use bbic::source::ImageSource;
use bbic::stack::{Stack, StackLevel, StackWriter, WriteOptions};
use bbic::store::{AttrValue, GroupStore, MemStore, StoreRef};
use bbic::TileFormat;

/// A synthetic image source computing every pixel from `(x, y, slice)`.
#[derive(Clone)]
pub struct FnSource {
    pub width: u32,
    pub height: u32,
    pub num_slices: u32,
    pub voxel: fn(u32, u32, u32) -> u8,
}

impl ImageSource for FnSource {
    fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.num_slices)
    }

    fn get_image(&mut self, slice_index: u32, _padding: u8) -> Result<GrayImage, BbicError> {
        let voxel = self.voxel;
        Ok(GrayImage::from_fn(self.width, self.height, move |x, y| {
            image::Luma([voxel(x, y, slice_index)])
        }))
    }
}

/// A voxel hash that distinguishes coordinate mix-ups: linear in each
/// coordinate modulo a prime, so shifts and mirrors cannot be
/// value-preserving everywhere.
pub fn hashed_voxel(x: u32, y: u32, s: u32) -> u8 {
    ((x * 31 + y * 57 + s * 41) % 251) as u8
}

/// Build a container on a fresh in-memory store and write one stack at
/// the given axis from the source. Returns the container and the stack.
pub fn build_stack(
    store: Arc<MemStore>,
    axis_index: u32,
    source: &FnSource,
    tile_size: u32,
    opts: &WriteOptions,
) -> (Container, Stack) {
    let comm: Arc<dyn ClusterComm> = Arc::new(SingleProcess::new());
    let mut container = Container::open_rw(store, comm).unwrap();
    let mut stack = container.create_stack(axis_index).unwrap();
    stack.width = source.width;
    stack.height = source.height;
    stack.num_slices = source.num_slices;
    stack.tile_size = tile_size;
    stack.format = TileFormat::Png;
    stack.orientation = "sagittal".to_string();
    stack.write_attrs().unwrap();

    let mut source = source.clone();
    StackWriter::new(container.comm())
        .write(&mut source, &mut stack, opts)
        .unwrap();
    (container, stack)
}

/// Read one voxel back from a stack level by reassembling its slice.
pub fn read_voxel(level: &StackLevel, slice: u32, x: u32, y: u32) -> u8 {
    level.get_image(slice, 0).unwrap().get_pixel(x, y)[0]
}

/// Store dump with the volatile `modify_time` attributes removed.
pub fn stable_dump(store: &MemStore) -> std::collections::BTreeMap<String, Vec<u8>> {
    store
        .dump()
        .into_iter()
        .filter(|(key, _)| !key.ends_with("#modify_time"))
        .collect()
}

// =============================================================================
// Recording store
// =============================================================================

/// Store wrapper logging every dataset pre-allocation, used to check that
/// the collective protocol issues identical calls on every worker.
pub struct RecordingStore {
    inner: StoreRef,
    allocations: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new(inner: StoreRef) -> Self {
        Self {
            inner,
            allocations: Mutex::new(Vec::new()),
        }
    }

    pub fn allocations(&self) -> Vec<String> {
        self.allocations.lock().unwrap().clone()
    }
}

impl GroupStore for RecordingStore {
    fn has(&self, path: &str) -> bool {
        self.inner.has(path)
    }

    fn has_dataset(&self, path: &str) -> bool {
        self.inner.has_dataset(path)
    }

    fn create_group(&self, path: &str) -> Result<(), StoreError> {
        self.inner.create_group(path)
    }

    fn require_group(&self, path: &str) -> Result<(), StoreError> {
        self.inner.require_group(path)
    }

    fn get_attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>, StoreError> {
        self.inner.get_attr(path, name)
    }

    fn set_attr(&self, path: &str, name: &str, value: AttrValue) -> Result<(), StoreError> {
        self.inner.set_attr(path, name, value)
    }

    fn create_dataset(&self, path: &str, len: u64) -> Result<(), StoreError> {
        self.allocations
            .lock()
            .unwrap()
            .push(format!("{}:{}", path, len));
        self.inner.create_dataset(path, len)
    }

    fn write_dataset(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        self.inner.write_dataset(path, data)
    }

    fn read_dataset(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.read_dataset(path)
    }
}
