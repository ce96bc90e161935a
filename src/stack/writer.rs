//! Slice-parallel tile pyramid writer.
//!
//! Slices are striped round-robin over the cluster workers. For every
//! slice a worker produces the tiles of every level in one pass (tile the
//! image, halve it, repeat), then runs the collective store protocol:
//!
//! 1. every worker computes the byte length of every tile it produced
//!    (all zeros for a worker that ran out of slices),
//! 2. the lengths are exchanged with `all_gather`,
//! 3. every worker creates the same empty tile datasets in the same order
//!    (ascending rank, then level, then `v`, then `u`),
//! 4. each worker writes the bytes of its own tiles.
//!
//! The store only requires collective *creation*; writes are owner-only.

use bytes::Bytes;
use image::GrayImage;
use tracing::info;

use crate::cluster::ClusterComm;
use crate::codec::{self, Interpolation, TileFormat};
use crate::error::BbicError;
use crate::source::ImageSource;
use crate::stack::{Stack, StackLevel};

/// Options for one stack write pass.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Value of pixels outside the source raster.
    pub padding_value: u8,
    /// Downsampling filter between levels.
    pub interp: Interpolation,
    /// First slice to process (for resuming).
    pub start_offset: u32,
    /// Skip the finest `level_offset` levels; the source image is
    /// pre-downsampled to the offset level's dimensions.
    pub level_offset: u32,
    /// Create the full level pyramid, or level 0 only.
    pub generate_lods: bool,
    /// Mirror slices horizontally and write them in reverse order.
    pub reverse: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            padding_value: 0,
            interp: Interpolation::Linear,
            start_offset: 0,
            level_offset: 0,
            generate_lods: true,
            reverse: false,
        }
    }
}

/// Writes image stacks into tiled pyramids, cooperating with the other
/// cluster workers.
pub struct StackWriter<'a> {
    comm: &'a dyn ClusterComm,
}

impl<'a> StackWriter<'a> {
    pub fn new(comm: &'a dyn ClusterComm) -> Self {
        Self { comm }
    }

    fn print_info(&self) -> bool {
        self.comm.rank() == 0
    }

    /// Write every slice of `source` into `stack`.
    ///
    /// Creates the level groups, then processes the slices assigned to
    /// this worker. Returns once *all* workers have finished (the final
    /// barrier ends the write phase).
    pub fn write(
        &self,
        source: &mut dyn ImageSource,
        stack: &mut Stack,
        opts: &WriteOptions,
    ) -> Result<(), BbicError> {
        if self.print_info() {
            let megabytes =
                u64::from(stack.width) * u64::from(stack.height) * u64::from(stack.num_slices)
                    / 1_000_000;
            info!(
                width = stack.width,
                height = stack.height,
                num_slices = stack.num_slices,
                megabytes,
                "target stack"
            );
            info!("creating level groups");
        }
        let levels = stack.create_levels(opts.generate_lods)?;
        if opts.level_offset as usize >= levels.len() {
            return Err(BbicError::InvalidArgument(format!(
                "level offset {} exceeds {} levels",
                opts.level_offset,
                levels.len()
            )));
        }
        let active = &levels[opts.level_offset as usize..];

        let num_slices = stack.num_slices;
        if self.print_info() {
            info!(
                from = opts.start_offset,
                to = num_slices.saturating_sub(1),
                "processing slices"
            );
        }

        let size = self.comm.size() as u32;
        let rank = self.comm.rank() as u32;
        let mut index = opts.start_offset + rank;
        while index < num_slices {
            if self.comm.abort_requested() {
                return Err(BbicError::Interrupted);
            }
            let slice_index = if opts.reverse {
                num_slices - 1 - index
            } else {
                index
            };
            let mut image = source.get_image(slice_index, opts.padding_value)?;
            if opts.level_offset > 0 {
                image = codec::resize(
                    &image,
                    image.width() >> opts.level_offset,
                    image.height() >> opts.level_offset,
                    opts.interp,
                );
            }
            if opts.reverse {
                image = codec::mirror(&image);
            }
            self.export_image_to_tiles(
                &image,
                active,
                index,
                stack.tile_size,
                stack.format,
                opts.interp,
            )?;
            if self.print_info() {
                println!("Progress: {}/{}", index + 1, num_slices);
            }
            index += size;
        }

        // Workers whose stripe ended one round early still have to join
        // the collective allocation rounds of the workers that are
        // finishing.
        let remaining = num_slices.saturating_sub(opts.start_offset);
        let rounds = remaining.div_ceil(size);
        let own_rounds = remaining.saturating_sub(rank).div_ceil(size);
        for round in own_rounds..rounds {
            let idle_index = opts.start_offset + round * size + rank;
            self.wait_all(active, idle_index)?;
        }

        self.comm.barrier();

        if self.print_info() {
            println!("Progress: {}/{}", num_slices, num_slices);
            println!("Done.");
        }
        Ok(())
    }

    /// Tile one slice image for every active level, halving it between
    /// levels, then run the collective store protocol.
    fn export_image_to_tiles(
        &self,
        image: &GrayImage,
        levels: &[StackLevel],
        slice_index: u32,
        tile_size: u32,
        format: TileFormat,
        interp: Interpolation,
    ) -> Result<(), BbicError> {
        let mut tiles: Vec<Vec<Bytes>> = Vec::with_capacity(levels.len());
        let mut current = image.clone();
        for level in levels {
            let (w, h) = current.dimensions();
            let mut level_tiles =
                Vec::with_capacity((level.num_x_tiles * level.num_y_tiles) as usize);
            for v in 0..level.num_y_tiles {
                for u in 0..level.num_x_tiles {
                    let (x, y) = (u * tile_size, v * tile_size);
                    if x < w && y < h {
                        level_tiles.push(codec::compressed_tile(&current, x, y, tile_size, format)?);
                    } else {
                        level_tiles.push(Bytes::new());
                    }
                }
            }
            tiles.push(level_tiles);
            current = codec::resize(&current, w >> 1, h >> 1, interp);
        }

        self.all_store_tiles(levels, &tiles, slice_index)
    }

    /// Collective allocation followed by owner writes. `tiles` holds one
    /// row-major `(v, u)` tile list per level; an empty outer list means
    /// this worker has no slice in the current round.
    fn all_store_tiles(
        &self,
        levels: &[StackLevel],
        tiles: &[Vec<Bytes>],
        slice_index: u32,
    ) -> Result<(), BbicError> {
        if self.comm.size() > 1 {
            let local_sizes = flatten_sizes(levels, tiles);
            let all_sizes = self.comm.all_gather(&local_sizes);

            for (peer, peer_sizes) in all_sizes.iter().enumerate() {
                let peer_slice = slice_index + peer as u32 - self.comm.rank() as u32;
                let mut cursor = 0;
                for level in levels {
                    for v in 0..level.num_y_tiles {
                        for u in 0..level.num_x_tiles {
                            let size = peer_sizes[cursor];
                            cursor += 1;
                            if size > 0 {
                                level.allocate_tile(size, u, v, peer_slice)?;
                            }
                        }
                    }
                }
            }
        }

        for (level, level_tiles) in levels.iter().zip(tiles) {
            let mut cursor = 0;
            for v in 0..level.num_y_tiles {
                for u in 0..level.num_x_tiles {
                    let tile = &level_tiles[cursor];
                    cursor += 1;
                    if !tile.is_empty() {
                        level.store_tile(tile, u, v, slice_index)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Join one collective allocation round without contributing tiles.
    fn wait_all(&self, levels: &[StackLevel], slice_index: u32) -> Result<(), BbicError> {
        let empty: Vec<Vec<Bytes>> = levels
            .iter()
            .map(|level| {
                vec![Bytes::new(); (level.num_x_tiles * level.num_y_tiles) as usize]
            })
            .collect();
        self.all_store_tiles(levels, &empty, slice_index)
    }
}

/// One `u64` per `(level, v, u)` in deterministic order; zero marks a tile
/// this worker will not write.
fn flatten_sizes(levels: &[StackLevel], tiles: &[Vec<Bytes>]) -> Vec<u64> {
    let mut sizes = Vec::new();
    for (level, level_tiles) in levels.iter().zip(tiles) {
        debug_assert_eq!(
            level_tiles.len(),
            (level.num_x_tiles * level.num_y_tiles) as usize
        );
        sizes.extend(level_tiles.iter().map(|t| t.len() as u64));
    }
    sizes
}

// =============================================================================
// Tests
// =============================================================================
