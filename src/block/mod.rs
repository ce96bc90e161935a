//! Cubic data blocks and block providers.
//!
//! A [`DataBlock`] is an in-memory 3D `u8` array, addressed `[depth][height]
//! [width]`, with a grid position `(u, v, z)`, a nominal cube side and the
//! valid extent actually holding data. Blocks are the unit of exchange
//! between the volume pyramid, the slice adapters and the cross-axis
//! projector; they are moved, never shared.
//!
//! The block's *storage* extent can exceed its *valid* extent: blocks read
//! from a volume LOD are full `block_size` cubes with zero padding past the
//! valid region, while blocks read from a stack level are allocated
//! exactly.

mod slice_source;

use bytes::Bytes;
use image::GrayImage;

use crate::codec::{self, TileFormat};
use crate::error::BbicError;

pub use slice_source::SliceToBlocks;

/// A source of cubic blocks (volume LOD, stack level, slice adapter,
/// downsampler). Receivers are `&mut` so providers may keep a cache.
pub trait BlockProvider {
    /// Side of the cubes this source provides.
    fn block_size(&self) -> u32;

    /// Overall dimensions `(width, height, depth)` of the source.
    fn dimensions(&self) -> (u32, u32, u32);

    /// Fetch the block at grid position `(u, v, z)`.
    fn get_block(&mut self, u: u32, v: u32, z: u32) -> Result<DataBlock, BbicError>;

    /// Number of blocks per dimension covering this source.
    fn block_count(&self) -> (u32, u32, u32) {
        let (w, h, d) = self.dimensions();
        let bs = self.block_size();
        (w.div_ceil(bs), h.div_ceil(bs), d.div_ceil(bs))
    }
}

/// Grid position of a block, used for work lists before any data is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIndex {
    pub u: u32,
    pub v: u32,
    pub z: u32,
}

/// A cubic chunk of voxel data.
#[derive(Debug, Clone)]
pub struct DataBlock {
    pub u: u32,
    pub v: u32,
    pub z: u32,
    pub nominal_size: u32,
    /// Valid extent, `<=` the storage extent on every axis.
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    shape: (u32, u32, u32),
    data: Vec<u8>,
}

impl DataBlock {
    /// Allocate zeroed storage of exactly `(width, height, depth)`.
    pub fn allocate(
        u: u32,
        v: u32,
        z: u32,
        nominal_size: u32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Self {
        Self::allocate_filled(u, v, z, nominal_size, width, height, depth, 0)
    }

    /// Allocate storage filled with a constant value.
    #[allow(clippy::too_many_arguments)]
    pub fn allocate_filled(
        u: u32,
        v: u32,
        z: u32,
        nominal_size: u32,
        width: u32,
        height: u32,
        depth: u32,
        value: u8,
    ) -> Self {
        let len = width as usize * height as usize * depth as usize;
        Self {
            u,
            v,
            z,
            nominal_size,
            width,
            height,
            depth,
            shape: (width, height, depth),
            data: vec![value; len],
        }
    }

    /// Storage extent `(width, height, depth)`.
    pub fn shape(&self) -> (u32, u32, u32) {
        self.shape
    }

    /// Shrink the valid extent; storage is unchanged.
    pub fn set_valid_extent(&mut self, width: u32, height: u32, depth: u32) {
        debug_assert!(width <= self.shape.0 && height <= self.shape.1 && depth <= self.shape.2);
        self.width = width;
        self.height = height;
        self.depth = depth;
    }

    #[inline]
    fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (z as usize * self.shape.1 as usize + y as usize) * self.shape.0 as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> u8 {
        self.data[self.index(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, z: u32, value: u8) {
        let i = self.index(x, y, z);
        self.data[i] = value;
    }

    /// Raw storage in `[depth][height][width]` order.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite the storage from a raw `[depth][height][width]` buffer of
    /// matching length.
    pub fn copy_from_slice(&mut self, data: &[u8]) {
        self.data.copy_from_slice(data);
    }

    /// Paste `other`'s full storage into this block starting at the origin.
    pub fn copy_from(&mut self, other: &DataBlock) -> Result<(), BbicError> {
        self.paste_at(other, 0, 0, 0)
    }

    /// Paste `other`'s full storage at `(x0, y0, z0)` of this block.
    fn paste_at(&mut self, other: &DataBlock, x0: u32, y0: u32, z0: u32) -> Result<(), BbicError> {
        let (ow, oh, od) = other.shape;
        if x0 + ow > self.shape.0 || y0 + oh > self.shape.1 || z0 + od > self.shape.2 {
            return Err(BbicError::InvalidArgument(format!(
                "block of shape {:?} does not fit at ({}, {}, {}) in shape {:?}",
                other.shape, x0, y0, z0, self.shape
            )));
        }
        for z in 0..od {
            for y in 0..oh {
                let src = other.index(0, y, z);
                let dst = self.index(x0, y0 + y, z0 + z);
                self.data[dst..dst + ow as usize]
                    .copy_from_slice(&other.data[src..src + ow as usize]);
            }
        }
        Ok(())
    }

    /// Number of sub-blocks of side `size` covering the valid extent.
    pub fn subblock_count(&self, size: u32) -> (u32, u32, u32) {
        (
            self.width.div_ceil(size),
            self.height.div_ceil(size),
            self.depth.div_ceil(size),
        )
    }

    /// Extract the sub-block at `(u, v, z)` of side `size`. Sub-blocks on
    /// the far side of the valid extent are clipped.
    pub fn subblock(&self, u: u32, v: u32, z: u32, size: u32) -> Result<DataBlock, BbicError> {
        if size == 0 || self.nominal_size % size != 0 {
            return Err(BbicError::IncompatibleSize(format!(
                "sub-block side {} does not divide nominal size {}",
                size, self.nominal_size
            )));
        }
        let start = (u * size, v * size, z * size);
        if start.0 >= self.width || start.1 >= self.height || start.2 >= self.depth {
            return Err(BbicError::OutOfRange(format!(
                "sub-block ({}, {}, {}) exceeds block extent ({}, {}, {})",
                u, v, z, self.width, self.height, self.depth
            )));
        }
        let end = (
            (start.0 + size).min(self.width),
            (start.1 + size).min(self.height),
            (start.2 + size).min(self.depth),
        );
        let mut sub = DataBlock::allocate(
            u,
            v,
            z,
            size,
            end.0 - start.0,
            end.1 - start.1,
            end.2 - start.2,
        );
        for dz in 0..sub.depth {
            for dy in 0..sub.height {
                for dx in 0..sub.width {
                    sub.set(dx, dy, dz, self.get(start.0 + dx, start.1 + dy, start.2 + dz));
                }
            }
        }
        Ok(sub)
    }

    /// Split the valid extent into sub-blocks of side `size`, z-major.
    ///
    /// # Errors
    ///
    /// `IncompatibleSize` if `size` does not divide the nominal size.
    pub fn split(&self, size: u32) -> Result<Vec<DataBlock>, BbicError> {
        if size == 0 || self.nominal_size % size != 0 {
            return Err(BbicError::IncompatibleSize(format!(
                "cannot split block of nominal size {} into sub-blocks of {}",
                self.nominal_size, size
            )));
        }
        let (nx, ny, nz) = self.subblock_count(size);
        let mut subblocks = Vec::with_capacity((nx * ny * nz) as usize);
        for z in 0..nz {
            for v in 0..ny {
                for u in 0..nx {
                    subblocks.push(self.subblock(u, v, z, size)?);
                }
            }
        }
        Ok(subblocks)
    }

    /// Fill this block as a container of `(nominal_size / source.block_size)^3`
    /// sub-blocks, each copied from `source` at the given grid offset.
    ///
    /// # Errors
    ///
    /// `IncompatibleSize` unless `source.block_size() < nominal_size` and
    /// `nominal_size % source.block_size() == 0`.
    pub fn fill(
        &mut self,
        source: &mut dyn BlockProvider,
        offset: (u32, u32, u32),
    ) -> Result<(), BbicError> {
        let bs = source.block_size();
        if bs == 0 || bs >= self.nominal_size || self.nominal_size % bs != 0 {
            return Err(BbicError::IncompatibleSize(format!(
                "source block size {} incompatible with container of nominal size {}",
                bs, self.nominal_size
            )));
        }
        let (nx, ny, nz) = self.subblock_count(bs);
        for z in 0..nz {
            for v in 0..ny {
                for u in 0..nx {
                    let src = source.get_block(u + offset.0, v + offset.1, z + offset.2)?;
                    self.paste_at(&src, u * bs, v * bs, z * bs)?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reslicing
    // =========================================================================

    /// The `x`-th Y/Z plane as a raster of shape `(height, depth)`.
    fn x_plane(&self, x: u32) -> GrayImage {
        GrayImage::from_fn(self.height, self.depth, |px, py| {
            image::Luma([self.get(x, px, py)])
        })
    }

    /// The `y`-th X/Z plane as a raster of shape `(width, depth)`.
    fn y_plane(&self, y: u32) -> GrayImage {
        GrayImage::from_fn(self.width, self.depth, |px, py| {
            image::Luma([self.get(px, y, py)])
        })
    }

    /// Reslice into one compressed tile per `x` of the valid extent,
    /// reoriented for a source stack along `src_axis`.
    ///
    /// The per-axis transforms must be preserved bit-exactly or the
    /// projected stacks come out mirrored or rotated against the source.
    pub fn to_x_tiles(&self, format: TileFormat, src_axis: u32) -> Result<Vec<Bytes>, BbicError> {
        let mut tiles = Vec::with_capacity(self.width as usize);
        for x in 0..self.width {
            let plane = self.x_plane(x);
            let oriented = match src_axis {
                0 => codec::mirror(&codec::rotate_cw(&plane)),
                1 => plane,
                2 => codec::rotate_cw(&plane),
                _ => return Err(invalid_axis(src_axis)),
            };
            tiles.push(codec::encode(&oriented, format)?);
        }
        Ok(tiles)
    }

    /// Reslice into one compressed tile per `y` of the valid extent,
    /// reoriented for a source stack along `src_axis`.
    pub fn to_y_tiles(&self, format: TileFormat, src_axis: u32) -> Result<Vec<Bytes>, BbicError> {
        let mut tiles = Vec::with_capacity(self.height as usize);
        for y in 0..self.height {
            let plane = self.y_plane(y);
            let oriented = match src_axis {
                0 => codec::flip(&codec::rotate_ccw(&plane)),
                1 => plane,
                2 => codec::flip(&plane),
                _ => return Err(invalid_axis(src_axis)),
            };
            tiles.push(codec::encode(&oriented, format)?);
        }
        Ok(tiles)
    }
}

fn invalid_axis(axis: u32) -> BbicError {
    BbicError::InvalidArgument(format!("axis must be 0, 1 or 2, got {}", axis))
}

/// The `(outer, inner1, inner2)` dimension permutation for slicing a
/// volume along `axis`.
pub fn slicing_indices(axis: u32) -> Result<(usize, usize, usize), BbicError> {
    match axis {
        0 => Ok((0, 1, 2)),
        1 => Ok((1, 0, 2)),
        2 => Ok((2, 0, 1)),
        _ => Err(invalid_axis(axis)),
    }
}

// =============================================================================
// Tests
// =============================================================================
