//! Block-pyramid volumes.
//!
//! A [`Volume`] stores the voxel data as an octree-like pyramid of cubic
//! raw blocks: level `l` halves all three dimensions of level `l - 1`.
//! Every block dataset is a full `block_size^3` cube of `u8`; blocks on
//! the far border carry their valid extent logically and are zero padded.
//!
//! Filling reconciles arbitrary compatible block sizes between the source
//! and the pyramid (copy, scatter after splitting, or gather with
//! [`DataBlock::fill`]), then derives each coarser level from the previous
//! one through the median [`Downsampler`].

mod downsample;

use std::fmt;
use std::fs;
use std::path::Path;

use image::GrayImage;
use tracing::info;

use crate::block::{slicing_indices, BlockProvider, DataBlock};
use crate::codec::{self, TileFormat};
use crate::error::BbicError;
use crate::stack::require_u32;
use crate::store::{join_path, AttrValue, StoreRef};

pub use downsample::Downsampler;

/// Volumes written by this crate carry this version.
pub const VOLUME_CURRENT_VERSION: u32 = 2;

/// First version that stored correct per-LOD dimensions.
pub const VOLUME_ORIGINAL_VERSION: u32 = 1;

/// Version reported for volumes that predate the attribute.
pub const VOLUME_UNKNOWN_VERSION: u32 = 0;

// =============================================================================
// Volume
// =============================================================================

/// A multi-resolution block volume.
pub struct Volume {
    store: StoreRef,
    path: String,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub block_size: u32,
    pub orientation: String,
    pub version: u32,
}

impl Volume {
    pub(crate) fn new(store: StoreRef, path: String, index: u32) -> Self {
        Self {
            store,
            path,
            index,
            width: 0,
            height: 0,
            depth: 0,
            block_size: 0,
            orientation: String::new(),
            version: VOLUME_CURRENT_VERSION,
        }
    }

    pub fn read_attrs(&mut self) -> Result<(), BbicError> {
        self.width = require_u32(&self.store, &self.path, "width")?;
        self.height = require_u32(&self.store, &self.path, "height")?;
        // Kept for compatibility: the on-disk names of the depth and block
        // size are `num_slices` and `tile_size`.
        self.depth = require_u32(&self.store, &self.path, "num_slices")?;
        self.block_size = require_u32(&self.store, &self.path, "tile_size")?;
        self.orientation = self
            .store
            .get_attr(&self.path, "orientation")?
            .and_then(|v| v.as_text().map(str::to_string))
            .unwrap_or_default();
        self.version = self
            .store
            .get_attr(&self.path, "version")?
            .and_then(|v| v.as_u32())
            .unwrap_or(VOLUME_UNKNOWN_VERSION);
        Ok(())
    }

    pub fn write_attrs(&self) -> Result<(), BbicError> {
        let set = |name: &str, value: AttrValue| self.store.set_attr(&self.path, name, value);
        set("width", AttrValue::U32(self.width))?;
        set("height", AttrValue::U32(self.height))?;
        set("num_slices", AttrValue::U32(self.depth))?;
        set("tile_size", AttrValue::U32(self.block_size))?;
        set("orientation", AttrValue::Text(self.orientation.clone()))?;
        set("version", AttrValue::U32(self.version))?;
        Ok(())
    }

    /// Number of levels of detail in the pyramid, computed from the
    /// level-0 block counts.
    pub fn lod_count(&self) -> u32 {
        let (nx, ny, nz) = self.blocks_count(0);
        let extent = nx.min(ny).min(nz) * self.block_size;
        if extent == 0 {
            return 0;
        }
        (31 - extent.leading_zeros()) + 1
    }

    /// Volume dimensions at the given level.
    pub fn dimensions(&self, level: u32) -> (u32, u32, u32) {
        (
            self.width >> level,
            self.height >> level,
            self.depth >> level,
        )
    }

    /// Block counts per dimension at the given level.
    pub fn blocks_count(&self, level: u32) -> (u32, u32, u32) {
        let (w, h, d) = self.dimensions(level);
        (
            w.div_ceil(self.block_size),
            h.div_ceil(self.block_size),
            d.div_ceil(self.block_size),
        )
    }

    fn lod_path(&self, level: u32) -> String {
        join_path(&self.path, &format!("levels/{}", level))
    }

    /// Get an existing LOD.
    ///
    /// Legacy volumes (version < 1) stored wrong per-LOD dimensions; they
    /// are replaced with the computed ones on read.
    pub fn get_lod(&self, level: u32) -> Result<VolumeLod, BbicError> {
        let path = self.lod_path(level);
        if !self.store.has(&path) {
            return Err(BbicError::MissingEntity(path));
        }
        let mut lod = VolumeLod::new(self.store.clone(), path, level, self.block_size);
        lod.read_attrs()?;
        if self.version < VOLUME_ORIGINAL_VERSION {
            let (w, h, d) = self.dimensions(level);
            lod.width = w;
            lod.height = h;
            lod.depth = d;
            lod.num_blocks = self.blocks_count(level);
        }
        Ok(lod)
    }

    /// Create one LOD group, write its attributes and optionally
    /// pre-allocate every block dataset.
    fn create_lod(&self, level: u32, pre_allocate: bool) -> Result<VolumeLod, BbicError> {
        let path = self.lod_path(level);
        self.store.require_group(&path)?;
        let mut lod = VolumeLod::new(self.store.clone(), path, level, self.block_size);
        let (w, h, d) = self.dimensions(level);
        lod.width = w;
        lod.height = h;
        lod.depth = d;
        lod.num_blocks = self.blocks_count(level);
        lod.write_attrs()?;
        if pre_allocate {
            lod.allocate_all_blocks()?;
        }
        Ok(lod)
    }

    /// Build the whole pyramid from a block source.
    ///
    /// Derives the dimensions from the source, pre-creates every LOD with
    /// all of its block datasets, fills level 0 and then each coarser
    /// level from a downsampler over the previous one.
    pub fn fill(
        &mut self,
        source: &mut dyn BlockProvider,
        block_size: u32,
    ) -> Result<(), BbicError> {
        let (width, height, depth) = source.dimensions();
        if width == 0 || height == 0 || depth == 0 {
            return Err(BbicError::InvalidArgument(format!(
                "degenerate source dimensions ({}, {}, {})",
                width, height, depth
            )));
        }
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.block_size = block_size;
        self.write_attrs()?;

        for level in 0..self.lod_count() {
            self.create_lod(level, true)?;
        }

        let mut lod0 = self.get_lod(0)?;
        info!(%lod0, "filling");
        lod0.fill(source)?;

        for level in 1..self.lod_count() {
            let mut lod = self.get_lod(level)?;
            info!(%lod, "filling");
            let mut source = Downsampler::new(self.get_lod(level - 1)?);
            lod.fill(&mut source)?;
        }
        Ok(())
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Volume v{} [{}, {}, {}], block size: {}, #blocks {:?}",
            self.version,
            self.width,
            self.height,
            self.depth,
            self.block_size,
            self.blocks_count(0)
        )
    }
}

// =============================================================================
// VolumeLod
// =============================================================================

/// A single level of detail of a volume.
pub struct VolumeLod {
    store: StoreRef,
    path: String,
    pub level: u32,
    pub block_size: u32,
    pub num_blocks: (u32, u32, u32),
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl VolumeLod {
    fn new(store: StoreRef, path: String, level: u32, block_size: u32) -> Self {
        Self {
            store,
            path,
            level,
            block_size,
            num_blocks: (0, 0, 0),
            width: 0,
            height: 0,
            depth: 0,
        }
    }

    pub fn read_attrs(&mut self) -> Result<(), BbicError> {
        self.num_blocks = (
            require_u32(&self.store, &self.path, "num_x_tiles")?,
            require_u32(&self.store, &self.path, "num_y_tiles")?,
            require_u32(&self.store, &self.path, "num_z_tiles")?,
        );
        // Old volume files lack these; derive them from the block grid.
        let dim = |name: &str, fallback: u32| -> Result<u32, BbicError> {
            Ok(self
                .store
                .get_attr(&self.path, name)?
                .and_then(|v| v.as_u32())
                .unwrap_or(fallback))
        };
        self.width = dim("width", self.num_blocks.0 * self.block_size)?;
        self.height = dim("height", self.num_blocks.1 * self.block_size)?;
        self.depth = dim("depth", self.num_blocks.2 * self.block_size)?;
        Ok(())
    }

    pub fn write_attrs(&self) -> Result<(), BbicError> {
        let set = |name: &str, value: AttrValue| self.store.set_attr(&self.path, name, value);
        set("num_x_tiles", AttrValue::U32(self.num_blocks.0))?;
        set("num_y_tiles", AttrValue::U32(self.num_blocks.1))?;
        set("num_z_tiles", AttrValue::U32(self.num_blocks.2))?;
        set("width", AttrValue::U32(self.width))?;
        set("height", AttrValue::U32(self.height))?;
        set("depth", AttrValue::U32(self.depth))?;
        Ok(())
    }

    fn block_path(&self, u: u32, v: u32, z: u32) -> String {
        join_path(&self.path, &format!("{}/{}/{}", u, v, z))
    }

    fn indices_valid(&self, u: u32, v: u32, z: u32) -> bool {
        u < self.num_blocks.0 && v < self.num_blocks.1 && z < self.num_blocks.2
    }

    /// Valid extent of the block at a grid position; blocks on the far
    /// border are clipped to the LOD dimensions.
    fn block_extent(&self, u: u32, v: u32, z: u32) -> (u32, u32, u32) {
        let clip = |index: u32, count: u32, dim: u32| {
            let padding = dim % self.block_size;
            if index == count - 1 && padding > 0 {
                padding
            } else {
                self.block_size
            }
        };
        (
            clip(u, self.num_blocks.0, self.width),
            clip(v, self.num_blocks.1, self.height),
            clip(z, self.num_blocks.2, self.depth),
        )
    }

    /// Pre-allocate every block dataset of this LOD as a zero cube.
    pub fn allocate_all_blocks(&self) -> Result<(), BbicError> {
        for z in 0..self.num_blocks.2 {
            for v in 0..self.num_blocks.1 {
                for u in 0..self.num_blocks.0 {
                    self.allocate_block(u, v, z)?;
                }
            }
        }
        Ok(())
    }

    fn allocate_block(&self, u: u32, v: u32, z: u32) -> Result<(), BbicError> {
        let len = u64::from(self.block_size).pow(3);
        self.store.create_dataset(&self.block_path(u, v, z), len)?;
        Ok(())
    }

    /// Write one block, zero padded to the full cube.
    pub fn store_block(
        &self,
        block: &DataBlock,
        u: u32,
        v: u32,
        z: u32,
    ) -> Result<(), BbicError> {
        if !self.indices_valid(u, v, z) {
            return Err(BbicError::OutOfRange(format!(
                "block ({}, {}, {}) outside grid {:?}",
                u, v, z, self.num_blocks
            )));
        }
        let bs = self.block_size;
        let mut cube = DataBlock::allocate(u, v, z, bs, bs, bs, bs);
        cube.copy_from(block)?;
        self.store
            .write_dataset(&self.block_path(u, v, z), cube.data())?;
        Ok(())
    }

    /// Dimensions of this LOD.
    pub fn lod_dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.depth)
    }

    /// Fill this LOD from a source of the same dimensions and a
    /// compatible block size.
    pub fn fill(&mut self, source: &mut dyn BlockProvider) -> Result<(), BbicError> {
        if source.dimensions() != self.lod_dimensions() {
            return Err(BbicError::InvalidArgument(format!(
                "source dimensions {:?} differ from LOD dimensions {:?}",
                source.dimensions(),
                self.lod_dimensions()
            )));
        }

        let source_size = source.block_size();
        if source_size == self.block_size {
            // Same block size: copy block for block.
            for z in 0..self.num_blocks.2 {
                for v in 0..self.num_blocks.1 {
                    for u in 0..self.num_blocks.0 {
                        let block = source.get_block(u, v, z)?;
                        self.store_block(&block, u, v, z)?;
                    }
                }
            }
        } else if source_size > self.block_size {
            // Larger source blocks: split each and scatter the pieces.
            if source_size % self.block_size != 0 {
                return Err(BbicError::IncompatibleSize(format!(
                    "source block size {} vs target {}",
                    source_size, self.block_size
                )));
            }
            let stride = source_size / self.block_size;
            let (nx, ny, nz) = source.block_count();
            for z in 0..nz {
                for v in 0..ny {
                    for u in 0..nx {
                        let subblocks = source.get_block(u, v, z)?.split(self.block_size)?;
                        for sub in subblocks {
                            self.store_block(
                                &sub,
                                sub.u + u * stride,
                                sub.v + v * stride,
                                sub.z + z * stride,
                            )?;
                        }
                    }
                }
            }
        } else {
            // Smaller source blocks: gather them into each target block.
            if self.block_size % source_size != 0 {
                return Err(BbicError::IncompatibleSize(format!(
                    "source block size {} vs target {}",
                    source_size, self.block_size
                )));
            }
            let stride = self.block_size / source_size;
            let bs = self.block_size;
            for z in 0..self.num_blocks.2 {
                for v in 0..self.num_blocks.1 {
                    for u in 0..self.num_blocks.0 {
                        let mut block = DataBlock::allocate(u, v, z, bs, bs, bs, bs);
                        let (w, h, d) = self.block_extent(u, v, z);
                        block.set_valid_extent(w, h, d);
                        block.fill(source, (u * stride, v * stride, z * stride))?;
                        self.store_block(&block, u, v, z)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Write the volume as per-slice images perpendicular to `axis`,
    /// iterating in slabs of `block_size` thickness. Dimension order for
    /// the permutation is `(depth, height, width)`.
    pub fn extract_slices(
        &self,
        dir: &Path,
        format: TileFormat,
        axis: u32,
    ) -> Result<(), BbicError> {
        fs::create_dir_all(dir).map_err(crate::error::StoreError::from)?;
        let tile = self.block_size;
        let ntiles = [self.num_blocks.2, self.num_blocks.1, self.num_blocks.0];
        let dim = [self.depth, self.height, self.width];
        let (outer_dim, inner1, inner2) = slicing_indices(axis)?;

        let rows = ntiles[inner1] * tile;
        let cols = ntiles[inner2] * tile;
        let mut outer = 0;
        while outer < dim[outer_dim] {
            let slab_depth = tile.min(dim[outer_dim] - outer);
            let mut slab = vec![0u8; (tile * rows * cols) as usize];

            for i1 in 0..ntiles[inner1] {
                for i2 in 0..ntiles[inner2] {
                    let mut idx = [0u32; 3];
                    idx[outer_dim] = outer / tile;
                    idx[inner1] = i1;
                    idx[inner2] = i2;
                    let block = self.read_block(idx[2], idx[1], idx[0])?;
                    for n in 0..slab_depth {
                        let mut coord = [0u32; 3];
                        coord[outer_dim] = (outer + n) % tile;
                        for r in 0..tile {
                            for c in 0..tile {
                                coord[inner1] = r;
                                coord[inner2] = c;
                                // Block voxels are addressed (x, y, z).
                                let value = block.get(coord[2], coord[1], coord[0]);
                                let row = i1 * tile + r;
                                let col = i2 * tile + c;
                                slab[((n * rows + row) * cols + col) as usize] = value;
                            }
                        }
                    }
                }
            }

            for n in 0..slab_depth {
                let base = (n * rows * cols) as usize;
                let canvas =
                    GrayImage::from_raw(cols, rows, slab[base..base + (rows * cols) as usize].to_vec())
                        .expect("slab buffer matches canvas size");
                let cropped = image::imageops::crop_imm(&canvas, 0, 0, dim[inner2], dim[inner1])
                    .to_image();
                let bytes = codec::encode(&cropped, format)?;
                let file = dir.join(format!("{}.{}", outer + n, format.extension()));
                fs::write(file, &bytes).map_err(crate::error::StoreError::from)?;
            }
            outer += tile;
        }
        Ok(())
    }

    /// Read one block as a full cube with its valid extent set. A missing
    /// dataset reads as zeros; reading never mutates the store.
    fn read_block(&self, u: u32, v: u32, z: u32) -> Result<DataBlock, BbicError> {
        if !self.indices_valid(u, v, z) {
            return Err(BbicError::OutOfRange(format!(
                "block ({}, {}, {}) outside grid {:?}",
                u, v, z, self.num_blocks
            )));
        }
        let bs = self.block_size;
        let mut block = DataBlock::allocate(u, v, z, bs, bs, bs, bs);
        let path = self.block_path(u, v, z);
        if self.store.has_dataset(&path) {
            let data = self.store.read_dataset(&path)?;
            if data.len() != block.data().len() {
                return Err(BbicError::Store(crate::error::StoreError::Io(format!(
                    "block dataset {} has length {}, expected {}",
                    path,
                    data.len(),
                    block.data().len()
                ))));
            }
            block.copy_from_slice(&data);
        }
        let (w, h, d) = self.block_extent(u, v, z);
        block.set_valid_extent(w, h, d);
        Ok(block)
    }
}

impl fmt::Display for VolumeLod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VolumeLOD {} [{}, {}, {}], block size: {}, #blocks {:?}",
            self.level, self.width, self.height, self.depth, self.block_size, self.num_blocks
        )
    }
}

impl BlockProvider for VolumeLod {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn dimensions(&self) -> (u32, u32, u32) {
        self.lod_dimensions()
    }

    fn get_block(&mut self, u: u32, v: u32, z: u32) -> Result<DataBlock, BbicError> {
        self.read_block(u, v, z)
    }
}

// =============================================================================
// Tests
// =============================================================================
