//! Tiled image stacks.
//!
//! A [`Stack`] is one tiled 2D image pyramid along a principal axis of the
//! volume. It owns a sequence of [`StackLevel`]s; level `l` halves the
//! in-plane dimensions of level `l - 1` while keeping the slice count (the
//! pyramid is spatial-only in 2D). Each level is a grid of compressed
//! tiles addressed `(u, v, slice)`.
//!
//! Levels double as block and image providers: the cross-axis projector
//! reads cubic blocks out of a level, and the pyramid writer reads whole
//! slices back when it fills the coarser levels of a projected stack.

mod projector;
mod writer;

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use image::GrayImage;
use tracing::debug;

use crate::block::{BlockIndex, BlockProvider, DataBlock};
use crate::codec::{self, TileFormat};
use crate::error::BbicError;
use crate::source::ImageSource;
use crate::store::{join_path, AttrValue, StoreRef};

pub use projector::make_all_stacks;
pub use writer::{StackWriter, WriteOptions};

// =============================================================================
// Axes
// =============================================================================

/// A principal axis of the volume. The stack stored at container index `i`
/// is the one slicing along axis `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> u32 {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn from_index(index: u32) -> Result<Self, BbicError> {
        match index {
            0 => Ok(Axis::X),
            1 => Ok(Axis::Y),
            2 => Ok(Axis::Z),
            other => Err(BbicError::InvalidArgument(format!(
                "axis must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }

    /// Anatomical orientation name of the slicing plane.
    pub fn orientation(self) -> &'static str {
        match self {
            Axis::X => "coronal",
            Axis::Y => "axial",
            Axis::Z => "sagittal",
        }
    }
}

fn mat_mul(a: &[[f64; 4]; 4], b: &[[f64; 4]; 4]) -> [[f64; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..4).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Voxel-to-world matrix: the axis rotation applied to a translation that
/// centres the stack on the origin.
fn local_to_world(axis: Axis, width: u32, height: u32, num_slices: u32) -> [[f64; 4]; 4] {
    let mut translation = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    translation[0][3] = -f64::from(width >> 1);
    translation[1][3] = -f64::from(height >> 1);
    translation[2][3] = -f64::from(num_slices >> 1);

    let rotation = match axis {
        Axis::X => [
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
        Axis::Y => [
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
        Axis::Z => [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };
    mat_mul(&rotation, &translation)
}

// =============================================================================
// Attribute helpers
// =============================================================================

pub(crate) fn require_u32(store: &StoreRef, path: &str, name: &str) -> Result<u32, BbicError> {
    store
        .get_attr(path, name)?
        .and_then(|v| v.as_u32())
        .ok_or_else(|| BbicError::MissingEntity(format!("{}#{}", path, name)))
}

fn text_attr(store: &StoreRef, path: &str, name: &str) -> Result<String, BbicError> {
    Ok(store
        .get_attr(path, name)?
        .and_then(|v| v.as_text().map(str::to_string))
        .unwrap_or_default())
}

// =============================================================================
// Stack
// =============================================================================

/// A tiled image stack of one or more resolution levels.
pub struct Stack {
    store: StoreRef,
    path: String,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub num_slices: u32,
    pub tile_size: u32,
    pub format: TileFormat,
    pub num_levels: u32,
    pub is_video: bool,
    pub fps: u32,
    pub description: String,
    pub original_filenames: String,
    pub orientation: String,
    pub slice_positions: String,
    pub local_to_world: [[f64; 4]; 4],
}

impl Stack {
    pub(crate) fn new(store: StoreRef, path: String, index: u32) -> Self {
        Self {
            store,
            path,
            index,
            width: 0,
            height: 0,
            num_slices: 0,
            tile_size: 0,
            format: TileFormat::Jpeg,
            num_levels: 0,
            is_video: false,
            fps: 0,
            description: String::new(),
            original_filenames: String::new(),
            orientation: String::new(),
            slice_positions: String::new(),
            local_to_world: local_to_world(Axis::Z, 0, 0, 0),
        }
    }

    /// The axis this stack slices along (equal to its container index).
    pub fn axis(&self) -> Result<Axis, BbicError> {
        Axis::from_index(self.index)
    }

    pub fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.num_slices)
    }

    pub fn read_attrs(&mut self) -> Result<(), BbicError> {
        self.width = require_u32(&self.store, &self.path, "width")?;
        self.height = require_u32(&self.store, &self.path, "height")?;
        self.num_slices = require_u32(&self.store, &self.path, "num_slices")?;
        self.tile_size = require_u32(&self.store, &self.path, "tile_size")?;
        self.num_levels = require_u32(&self.store, &self.path, "num_levels")?;
        self.fps = require_u32(&self.store, &self.path, "fps")?;
        self.is_video = self
            .store
            .get_attr(&self.path, "is_video")?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let mime = text_attr(&self.store, &self.path, "type")?;
        self.format = TileFormat::from_mime(&mime)?;
        self.description = text_attr(&self.store, &self.path, "description")?;
        self.original_filenames = text_attr(&self.store, &self.path, "original_filenames")?;
        self.orientation = text_attr(&self.store, &self.path, "orientation")?;
        self.slice_positions = text_attr(&self.store, &self.path, "slice_positions")?;
        if let Some(mat) = self
            .store
            .get_attr(&self.path, "local_to_world")?
            .and_then(|v| v.as_matrix().copied())
        {
            self.local_to_world = mat;
        }
        Ok(())
    }

    pub fn write_attrs(&self) -> Result<(), BbicError> {
        let set = |name: &str, value: AttrValue| self.store.set_attr(&self.path, name, value);
        set("width", AttrValue::U32(self.width))?;
        set("height", AttrValue::U32(self.height))?;
        set("num_slices", AttrValue::U32(self.num_slices))?;
        set("tile_size", AttrValue::U32(self.tile_size))?;
        set("type", AttrValue::Text(self.format.mime().to_string()))?;
        set("num_levels", AttrValue::U32(self.num_levels))?;
        set("is_video", AttrValue::Bool(self.is_video))?;
        set("fps", AttrValue::U32(self.fps))?;
        set("description", AttrValue::Text(self.description.clone()))?;
        set(
            "original_filenames",
            AttrValue::Text(self.original_filenames.clone()),
        )?;
        set("orientation", AttrValue::Text(self.orientation.clone()))?;
        set(
            "slice_positions",
            AttrValue::Text(self.slice_positions.clone()),
        )?;
        set("local_to_world", AttrValue::Matrix(self.local_to_world))?;
        self.update_modify_time()
    }

    pub fn update_modify_time(&self) -> Result<(), BbicError> {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.store
            .set_attr(&self.path, "modify_time", AttrValue::Text(seconds.to_string()))?;
        Ok(())
    }

    /// Recompute `local_to_world` for the given viewing axis.
    pub fn set_axis(&mut self, axis: Axis) {
        self.local_to_world = local_to_world(axis, self.width, self.height, self.num_slices);
    }

    /// Read slice positions (one float per line) into the attribute text.
    pub fn set_slice_positions(&mut self, file: &Path) -> Result<(), BbicError> {
        let text = fs::read_to_string(file).map_err(crate::error::StoreError::from)?;
        let mut positions = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let value: f64 = line.parse().map_err(|_| {
                BbicError::InvalidArgument(format!("bad slice position '{}'", line))
            })?;
            positions.push(value.to_string());
        }
        self.slice_positions = positions.join("\n");
        Ok(())
    }

    /// Number of levels this stack should contain.
    ///
    /// The compact rule stops dividing once the level fits a single tile;
    /// the legacy rule (found in old containers) divides down to one pixel
    /// in the smaller dimension.
    pub fn compute_num_levels(&self, limit_to_tile_size: bool) -> u32 {
        if limit_to_tile_size {
            let largest = self.width.max(self.height).max(1);
            let mut levels = 1;
            while (self.tile_size << (levels - 1)) < largest {
                levels += 1;
            }
            levels
        } else {
            let smallest = self.width.min(self.height).max(1);
            (31 - smallest.leading_zeros()) + 1
        }
    }

    /// Materialise all level groups and return them, finest first.
    pub fn create_levels(&mut self, generate_lods: bool) -> Result<Vec<StackLevel>, BbicError> {
        self.num_levels = if generate_lods {
            self.compute_num_levels(true)
        } else {
            1
        };
        self.store
            .set_attr(&self.path, "num_levels", AttrValue::U32(self.num_levels))?;

        let mut levels = Vec::with_capacity(self.num_levels as usize);
        for level in 0..self.num_levels {
            let created = self.require_level(level)?;
            debug!(
                level,
                num_x_tiles = created.num_x_tiles,
                num_y_tiles = created.num_y_tiles,
                num_slices = created.num_slices,
                tile_size = created.tile_size,
                "created level group"
            );
            levels.push(created);
        }
        Ok(levels)
    }

    fn level_path(&self, level: u32) -> String {
        join_path(&self.path, &format!("levels/{}", level))
    }

    fn level_handle(&self, level: u32) -> StackLevel {
        let mut handle = StackLevel::new(
            self.store.clone(),
            self.level_path(level),
            level,
            self.tile_size,
            self.format,
        );
        handle.width = self.width >> level;
        handle.height = self.height >> level;
        handle
    }

    /// Get an existing level.
    ///
    /// # Errors
    ///
    /// `MissingEntity` if the level group has not been created.
    pub fn get_level(&self, level: u32) -> Result<StackLevel, BbicError> {
        let path = self.level_path(level);
        if !self.store.has(&path) {
            return Err(BbicError::MissingEntity(path));
        }
        let mut handle = self.level_handle(level);
        handle.read_attrs()?;
        Ok(handle)
    }

    /// Get a level, creating its group and attributes if absent.
    ///
    /// Safe to call concurrently from several workers: a peer that finds
    /// the group mid-creation recomputes and rewrites the same attribute
    /// values instead of failing on the half-written group.
    pub fn require_level(&self, level: u32) -> Result<StackLevel, BbicError> {
        self.store.require_group(&self.level_path(level))?;
        let mut handle = self.level_handle(level);
        match handle.read_attrs() {
            Ok(()) => Ok(handle),
            Err(BbicError::MissingEntity(_)) => {
                handle.num_x_tiles = handle.width.div_ceil(self.tile_size);
                handle.num_y_tiles = handle.height.div_ceil(self.tile_size);
                handle.num_slices = self.num_slices;
                handle.write_attrs()?;
                Ok(handle)
            }
            Err(other) => Err(other),
        }
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stack{} [{}, {}, {}], tile size: {}, #levels: {}, format: {}",
            self.index,
            self.width,
            self.height,
            self.num_slices,
            self.tile_size,
            self.num_levels,
            self.format.mime()
        )
    }
}

// =============================================================================
// StackLevel
// =============================================================================

/// One resolution level of a stack.
pub struct StackLevel {
    store: StoreRef,
    path: String,
    pub index: u32,
    pub tile_size: u32,
    pub format: TileFormat,
    pub num_x_tiles: u32,
    pub num_y_tiles: u32,
    pub num_slices: u32,
    pub width: u32,
    pub height: u32,
}

impl StackLevel {
    fn new(store: StoreRef, path: String, index: u32, tile_size: u32, format: TileFormat) -> Self {
        Self {
            store,
            path,
            index,
            tile_size,
            format,
            num_x_tiles: 0,
            num_y_tiles: 0,
            num_slices: 0,
            width: 0,
            height: 0,
        }
    }

    pub fn read_attrs(&mut self) -> Result<(), BbicError> {
        self.num_x_tiles = require_u32(&self.store, &self.path, "num_x_tiles")?;
        self.num_y_tiles = require_u32(&self.store, &self.path, "num_y_tiles")?;
        self.num_slices = require_u32(&self.store, &self.path, "num_slices")?;
        Ok(())
    }

    pub fn write_attrs(&self) -> Result<(), BbicError> {
        self.store
            .set_attr(&self.path, "num_x_tiles", AttrValue::U32(self.num_x_tiles))?;
        self.store
            .set_attr(&self.path, "num_y_tiles", AttrValue::U32(self.num_y_tiles))?;
        self.store
            .set_attr(&self.path, "num_slices", AttrValue::U32(self.num_slices))?;
        Ok(())
    }

    fn tile_path(&self, u: u32, v: u32, slice_index: u32) -> String {
        join_path(&self.path, &format!("{}/{}/{}", slice_index, u, v))
    }

    /// Decode one tile.
    pub fn get_tile(&self, u: u32, v: u32, slice_index: u32) -> Result<GrayImage, BbicError> {
        let bytes = self.store.read_dataset(&self.tile_path(u, v, slice_index))?;
        Ok(codec::decode(&bytes)?)
    }

    /// Pre-allocate an empty tile dataset of exactly `size` bytes. Part of
    /// the collective creation protocol: every worker issues the same
    /// calls in the same order.
    pub fn allocate_tile(
        &self,
        size: u64,
        u: u32,
        v: u32,
        slice_index: u32,
    ) -> Result<(), BbicError> {
        self.store
            .create_dataset(&self.tile_path(u, v, slice_index), size)?;
        Ok(())
    }

    /// Store a serialised tile, creating or overwriting its dataset.
    pub fn store_tile(
        &self,
        tile: &[u8],
        u: u32,
        v: u32,
        slice_index: u32,
    ) -> Result<(), BbicError> {
        self.store
            .write_dataset(&self.tile_path(u, v, slice_index), tile)?;
        Ok(())
    }

    /// Reassemble one full slice from its tiles, on a canvas filled with
    /// `padding`.
    pub fn get_image(&self, slice_index: u32, padding: u8) -> Result<GrayImage, BbicError> {
        let mut rows: Vec<Vec<GrayImage>> = Vec::with_capacity(self.num_y_tiles as usize);
        let mut width = 0;
        let mut height = 0;
        for v in 0..self.num_y_tiles {
            let mut row = Vec::with_capacity(self.num_x_tiles as usize);
            for u in 0..self.num_x_tiles {
                let tile = self.get_tile(u, v, slice_index)?;
                if v == 0 {
                    width += tile.width();
                }
                if u == self.num_x_tiles - 1 {
                    height += tile.height();
                }
                row.push(tile);
            }
            rows.push(row);
        }

        let mut canvas = GrayImage::from_pixel(width.max(1), height.max(1), image::Luma([padding]));
        for (v, row) in rows.iter().enumerate() {
            for (u, tile) in row.iter().enumerate() {
                image::imageops::replace(
                    &mut canvas,
                    tile,
                    u as i64 * i64::from(self.tile_size),
                    v as i64 * i64::from(self.tile_size),
                );
            }
        }
        Ok(canvas)
    }

    /// Number of cubic blocks of side `tile_size` in each dimension.
    pub fn block_count(&self) -> (u32, u32, u32) {
        (
            self.num_x_tiles,
            self.num_y_tiles,
            self.num_slices.div_ceil(self.tile_size),
        )
    }

    /// All block positions of this level, z-major.
    pub fn block_list(&self) -> Vec<BlockIndex> {
        let (nx, ny, nz) = self.block_count();
        let mut blocks = Vec::with_capacity((nx * ny * nz) as usize);
        for z in 0..nz {
            for v in 0..ny {
                for u in 0..nx {
                    blocks.push(BlockIndex { u, v, z });
                }
            }
        }
        blocks
    }

    /// Load a cube from `depth` consecutive slice tiles at `(u, v)`,
    /// starting at an arbitrary slice. The block extent follows the tile
    /// extent at that grid position.
    pub fn get_block_range(
        &self,
        u: u32,
        v: u32,
        slice_start: u32,
        depth: u32,
    ) -> Result<DataBlock, BbicError> {
        if depth == 0 || slice_start + depth > self.num_slices {
            return Err(BbicError::OutOfRange(format!(
                "slices [{}, {}) of {}",
                slice_start,
                slice_start + depth,
                self.num_slices
            )));
        }
        let mut block: Option<DataBlock> = None;
        for i in 0..depth {
            let tile = self.get_tile(u, v, slice_start + i)?;
            let block = block.get_or_insert_with(|| {
                DataBlock::allocate(
                    u,
                    v,
                    slice_start / self.tile_size,
                    self.tile_size,
                    tile.width(),
                    tile.height(),
                    depth,
                )
            });
            for y in 0..tile.height().min(block.height) {
                for x in 0..tile.width().min(block.width) {
                    block.set(x, y, i, tile.get_pixel(x, y)[0]);
                }
            }
        }
        block.ok_or_else(|| BbicError::OutOfRange("empty block".to_string()))
    }

    /// Write every slice of this level as `{dir}/{slice}.{ext}`.
    pub fn extract_slices(&self, dir: &Path, format: TileFormat) -> Result<(), BbicError> {
        fs::create_dir_all(dir).map_err(crate::error::StoreError::from)?;
        for slice_index in 0..self.num_slices {
            let image = self.get_image(slice_index, 0)?;
            let bytes = codec::encode(&image, format)?;
            let file = dir.join(format!("{}.{}", slice_index, format.extension()));
            fs::write(file, &bytes).map_err(crate::error::StoreError::from)?;
        }
        Ok(())
    }
}

impl fmt::Display for StackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StackLevel{} [{}, {}, {}], tile size: {}, #tiles: ({}, {})",
            self.index,
            self.width,
            self.height,
            self.num_slices,
            self.tile_size,
            self.num_x_tiles,
            self.num_y_tiles
        )
    }
}

impl ImageSource for StackLevel {
    fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.num_slices)
    }

    fn get_image(&mut self, slice_index: u32, padding: u8) -> Result<GrayImage, BbicError> {
        StackLevel::get_image(self, slice_index, padding)
    }
}

impl BlockProvider for StackLevel {
    fn block_size(&self) -> u32 {
        self.tile_size
    }

    fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.num_slices)
    }

    fn get_block(&mut self, u: u32, v: u32, z: u32) -> Result<DataBlock, BbicError> {
        let slice_start = z * self.tile_size;
        let slice_end = (slice_start + self.tile_size).min(self.num_slices);
        self.get_block_range(u, v, slice_start, slice_end - slice_start)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::store::MemStore;
    use std::sync::Arc;

    /// An empty stack at `bbic/stacks/2` on a fresh or shared [`MemStore`].
    pub(crate) fn new_test_stack(
        store: Arc<MemStore>,
        width: u32,
        height: u32,
        num_slices: u32,
        tile_size: u32,
        format: TileFormat,
    ) -> Stack {
        let store: StoreRef = store;
        store.require_group("bbic/stacks/2").unwrap();
        let mut stack = Stack::new(store, "bbic/stacks/2".to_string(), 2);
        stack.width = width;
        stack.height = height;
        stack.num_slices = num_slices;
        stack.tile_size = tile_size;
        stack.format = format;
        stack
    }
}
