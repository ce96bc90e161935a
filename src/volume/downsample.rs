//! Median-filter block downsampler.

use crate::block::{BlockProvider, DataBlock};
use crate::error::BbicError;
use crate::volume::VolumeLod;

/// A block source that serves LOD `l` by downsampling LOD `l - 1`.
///
/// For a requested block, a *meta-block* of side `2 * block_size` is
/// assembled from the eight underlying blocks, median filtered with a
/// window of 2 and decimated by 2 with nearest-neighbour sampling: output
/// voxel `(x, y, z)` is the median of the `2x2x2` window anchored at
/// `(2x, 2y, 2z)`. The median of the 8 samples is the upper of the two
/// middle values.
pub struct Downsampler {
    lod: VolumeLod,
}

impl Downsampler {
    pub fn new(lod: VolumeLod) -> Self {
        Self { lod }
    }

    fn meta_extent(&self, u: u32, v: u32, z: u32) -> (u32, u32, u32) {
        let meta_size = 2 * self.lod.block_size;
        (
            meta_size.min(self.lod.width.saturating_sub(u * meta_size)),
            meta_size.min(self.lod.height.saturating_sub(v * meta_size)),
            meta_size.min(self.lod.depth.saturating_sub(z * meta_size)),
        )
    }

    fn downsample(&self, meta: &DataBlock) -> DataBlock {
        let bs = meta.nominal_size >> 1;
        let mut out = DataBlock::allocate(meta.u, meta.v, meta.z, bs, bs, bs, bs);
        for z in 0..bs {
            for y in 0..bs {
                for x in 0..bs {
                    out.set(x, y, z, median_window(meta, 2 * x, 2 * y, 2 * z));
                }
            }
        }

        let (dw, dh, dd) = self.dimensions();
        out.set_valid_extent(
            meta.width.div_ceil(2).min(dw.saturating_sub(meta.u * bs)),
            meta.height.div_ceil(2).min(dh.saturating_sub(meta.v * bs)),
            meta.depth.div_ceil(2).min(dd.saturating_sub(meta.z * bs)),
        );
        out
    }
}

/// Median of the eight voxels in the window anchored at `(x, y, z)`.
fn median_window(block: &DataBlock, x: u32, y: u32, z: u32) -> u8 {
    let mut window = [
        block.get(x, y, z),
        block.get(x + 1, y, z),
        block.get(x, y + 1, z),
        block.get(x + 1, y + 1, z),
        block.get(x, y, z + 1),
        block.get(x + 1, y, z + 1),
        block.get(x, y + 1, z + 1),
        block.get(x + 1, y + 1, z + 1),
    ];
    window.sort_unstable();
    window[4]
}

impl BlockProvider for Downsampler {
    fn block_size(&self) -> u32 {
        self.lod.block_size
    }

    fn dimensions(&self) -> (u32, u32, u32) {
        let (w, h, d) = self.lod.lod_dimensions();
        (w >> 1, h >> 1, d >> 1)
    }

    fn get_block(&mut self, u: u32, v: u32, z: u32) -> Result<DataBlock, BbicError> {
        let meta_size = 2 * self.lod.block_size;
        let mut meta =
            DataBlock::allocate_filled(u, v, z, meta_size, meta_size, meta_size, meta_size, 0);
        let (w, h, d) = self.meta_extent(u, v, z);
        meta.set_valid_extent(w, h, d);
        meta.fill(&mut self.lod, (2 * u, 2 * v, 2 * z))?;
        Ok(self.downsample(&meta))
    }
}

// =============================================================================
// Tests
// =============================================================================
