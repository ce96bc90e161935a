//! Adapter from slice images to cubic blocks.

use crate::block::{BlockProvider, DataBlock};
use crate::error::BbicError;
use crate::source::ImageSource;

/// Reads an [`ImageSource`] as a source of cubic blocks of side
/// `block_size`.
///
/// A one-slot cache holds the current depth-slab of `block_size`
/// consecutive slices; requesting blocks in z-major order therefore loads
/// every slice exactly once. Not safe for concurrent use.
pub struct SliceToBlocks<S: ImageSource> {
    source: S,
    block_size: u32,
    slab: Option<Slab>,
}

struct Slab {
    index: u32,
    width: u32,
    height: u32,
    /// `[block_size][height][width]`, zero past the last slice.
    data: Vec<u8>,
}

impl<S: ImageSource> SliceToBlocks<S> {
    pub fn new(source: S, block_size: u32) -> Self {
        Self {
            source,
            block_size,
            slab: None,
        }
    }

    fn load_slab(&mut self, index: u32) -> Result<(), BbicError> {
        let (width, height, num_slices) = self.source.dimensions();
        let bs = self.block_size;
        let mut data = vec![0u8; (bs * width * height) as usize];

        let slice_start = index * bs;
        let slice_end = (slice_start + bs).min(num_slices);
        for slice_index in slice_start..slice_end {
            let img = self.source.get_image(slice_index, 0)?;
            let base = ((slice_index - slice_start) * width * height) as usize;
            data[base..base + (width * height) as usize].copy_from_slice(img.as_raw());
        }

        self.slab = Some(Slab {
            index,
            width,
            height,
            data,
        });
        Ok(())
    }
}

impl<S: ImageSource> BlockProvider for SliceToBlocks<S> {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn dimensions(&self) -> (u32, u32, u32) {
        self.source.dimensions()
    }

    fn get_block(&mut self, u: u32, v: u32, z: u32) -> Result<DataBlock, BbicError> {
        if self.slab.as_ref().map(|s| s.index) != Some(z) {
            self.load_slab(z)?;
        }
        let slab = self.slab.as_ref().expect("slab loaded above");

        let bs = self.block_size;
        let mut block = DataBlock::allocate_filled(u, v, z, bs, bs, bs, bs, 0);
        let x0 = u * bs;
        let y0 = v * bs;
        let x1 = (x0 + bs).min(slab.width);
        let y1 = (y0 + bs).min(slab.height);
        for dz in 0..bs {
            for y in y0..y1 {
                for x in x0..x1 {
                    let value =
                        slab.data[((dz * slab.height + y) * slab.width + x) as usize];
                    block.set(x - x0, y - y0, dz, value);
                }
            }
        }
        Ok(block)
    }
}
