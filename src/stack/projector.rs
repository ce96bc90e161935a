//! Cross-axis stack projection.
//!
//! Given a stack fully populated at level 0, [`make_all_stacks`] fills
//! level 0 of the two perpendicular stacks — the *left* and *upper* faces
//! of the volume as seen from the source viewpoint — by re-slicing cubic
//! blocks of tiles, then hands the coarser levels to the pyramid writer.
//!
//! Work items are the source-level-0 blocks, z-major, chunked into groups
//! of `W` consecutive blocks; group member `k` belongs to worker `k`.
//! Every group runs the collective allocation protocol before the owner
//! writes its tiles, so the destination datasets are created identically
//! on every worker.
//!
//! For a source along axis 2, the destination slice reflection falls on a
//! tile-grid axis, which cannot be mirrored block-by-block when the slice
//! count is not a multiple of the tile size. Each work item is therefore
//! reinterpreted as the destination block it corresponds to, and the cube
//! is read from the matching *shifted* slice window, so partial edge
//! columns and rows come out exactly right.

use tracing::info;

use crate::block::{BlockIndex, DataBlock};
use crate::cluster::ClusterComm;
use crate::codec::Interpolation;
use crate::container::Container;
use crate::error::BbicError;
use crate::stack::{Axis, Stack, StackLevel, StackWriter, WriteOptions};

/// Destination axes `(left, upper)` for a given source axis.
fn target_axes(src_axis: u32) -> Result<(Axis, Axis), BbicError> {
    match src_axis {
        0 => Ok((Axis::Z, Axis::Y)),
        1 => Ok((Axis::Z, Axis::X)),
        2 => Ok((Axis::Y, Axis::X)),
        other => Err(BbicError::InvalidArgument(format!(
            "source stack has invalid axis index {}",
            other
        ))),
    }
}

/// Destination address of the `i`-th X tile of a block, in the left
/// stack's level 0.
fn left_target(src_axis: u32, blk: BlockIndex, tile_size: u32, i: u32, left0: &StackLevel) -> (u32, u32, u32) {
    match src_axis {
        0 => (blk.z, blk.v, left0.num_slices - 1 - (i + blk.u * tile_size)),
        1 => (blk.v, blk.z, i + blk.u * tile_size),
        _ => (blk.z, blk.v, i + blk.u * tile_size),
    }
}

/// Destination address of the `i`-th Y tile of a block, in the upper
/// stack's level 0.
fn upper_target(src_axis: u32, blk: BlockIndex, tile_size: u32, i: u32, upper0: &StackLevel) -> (u32, u32, u32) {
    match src_axis {
        0 => (blk.z, blk.u, i + blk.v * tile_size),
        1 => (blk.u, blk.z, upper0.num_slices - 1 - (i + blk.v * tile_size)),
        _ => (blk.u, blk.z, i + blk.v * tile_size),
    }
}

/// Read the cube for one work item. Axis 0 and 1 read the slab-aligned
/// window; axis 2 reads the shifted window of the destination block the
/// item maps to.
fn load_block(
    level0: &StackLevel,
    blk: BlockIndex,
    src_axis: u32,
) -> Result<DataBlock, BbicError> {
    let tile_size = level0.tile_size;
    let num_slices = level0.num_slices;
    if src_axis == 2 {
        let depth = tile_size.min(num_slices - blk.z * tile_size);
        let start = num_slices - blk.z * tile_size - depth;
        level0.get_block_range(blk.u, blk.v, start, depth)
    } else {
        let start = blk.z * tile_size;
        let depth = tile_size.min(num_slices - start);
        level0.get_block_range(blk.u, blk.v, start, depth)
    }
}

/// Derive, create and fill the two stacks perpendicular to `source_stack`
/// from its level 0, then (optionally) build their coarser levels.
pub fn make_all_stacks(
    container: &mut Container,
    source_stack: &Stack,
    padding_value: u8,
    interp: Interpolation,
    generate_lods: bool,
) -> Result<(), BbicError> {
    let src_axis = source_stack.index;
    let (left_axis, upper_axis) = target_axes(src_axis)?;

    info!(
        left = left_axis.orientation(),
        upper = upper_axis.orientation(),
        "creating projection stacks"
    );

    let mut left_stack = container.create_stack(left_axis.index())?;
    if src_axis == 1 {
        left_stack.width = source_stack.height;
        left_stack.height = source_stack.num_slices;
    } else {
        left_stack.width = source_stack.num_slices;
        left_stack.height = source_stack.height;
    }
    left_stack.num_slices = source_stack.width;
    left_stack.tile_size = source_stack.tile_size;
    left_stack.format = source_stack.format;
    left_stack.num_levels = 1;
    left_stack.set_axis(left_axis);
    left_stack.write_attrs()?;

    let mut upper_stack = container.create_stack(upper_axis.index())?;
    if src_axis == 0 {
        upper_stack.width = source_stack.num_slices;
        upper_stack.height = source_stack.width;
    } else {
        upper_stack.width = source_stack.width;
        upper_stack.height = source_stack.num_slices;
    }
    upper_stack.num_slices = source_stack.height;
    upper_stack.tile_size = source_stack.tile_size;
    upper_stack.format = source_stack.format;
    upper_stack.num_levels = 1;
    upper_stack.set_axis(upper_axis);
    upper_stack.write_attrs()?;

    info!("filling level 0 of the projection stacks");

    let level0 = source_stack.get_level(0)?;
    let left0 = left_stack.require_level(0)?;
    let upper0 = upper_stack.require_level(0)?;

    let comm = container.comm();
    let size = comm.size();
    let rank = comm.rank();
    let print_info = rank == 0;

    let blocks = level0.block_list();
    let mut processed = 0;
    for group in blocks.chunks(size) {
        if comm.abort_requested() {
            return Err(BbicError::Interrupted);
        }
        let local = group.get(rank).copied();
        let block = match local {
            Some(blk) => Some(load_block(&level0, blk, src_axis)?),
            None => None,
        };

        write_block_to_tiles(comm, block.as_ref(), group, src_axis, &left0, &upper0)?;

        processed += group.len();
        if print_info {
            println!("Progress: {}/{}", processed, blocks.len());
        }
    }

    // Level 0 must be complete on every worker before it is read back.
    comm.barrier();

    if print_info {
        println!("Progress: {}/{}", blocks.len(), blocks.len());
        println!("Done.");
    }

    if !generate_lods {
        return Ok(());
    }

    info!("filling levels 1-n of the projection stacks");

    let opts = WriteOptions {
        padding_value,
        interp,
        start_offset: 0,
        level_offset: 1,
        generate_lods: true,
        reverse: false,
    };
    let writer = StackWriter::new(container.comm());
    let mut left_source = left_stack.get_level(0)?;
    writer.write(&mut left_source, &mut left_stack, &opts)?;
    let mut upper_source = upper_stack.get_level(0)?;
    writer.write(&mut upper_source, &mut upper_stack, &opts)?;
    Ok(())
}

/// Store one block's resliced tiles into the destination level-0 groups,
/// allocating collectively for the whole worker group first.
fn write_block_to_tiles(
    comm: &dyn ClusterComm,
    block: Option<&DataBlock>,
    group: &[BlockIndex],
    src_axis: u32,
    left0: &StackLevel,
    upper0: &StackLevel,
) -> Result<(), BbicError> {
    let tile_size = left0.tile_size;

    let x_tiles = match block {
        Some(b) => b.to_x_tiles(left0.format, src_axis)?,
        None => Vec::new(),
    };
    let y_tiles = match block {
        Some(b) => b.to_y_tiles(upper0.format, src_axis)?,
        None => Vec::new(),
    };

    if comm.size() > 1 {
        let x_sizes: Vec<u64> = x_tiles.iter().map(|t| t.len() as u64).collect();
        let y_sizes: Vec<u64> = y_tiles.iter().map(|t| t.len() as u64).collect();
        let all_x_sizes = comm.all_gather(&x_sizes);
        let all_y_sizes = comm.all_gather(&y_sizes);

        for (peer, sizes) in all_x_sizes.iter().enumerate() {
            let Some(&blk) = group.get(peer) else { continue };
            for (i, &size) in sizes.iter().enumerate() {
                let (u, v, z) = left_target(src_axis, blk, tile_size, i as u32, left0);
                left0.allocate_tile(size, u, v, z)?;
            }
        }
        for (peer, sizes) in all_y_sizes.iter().enumerate() {
            let Some(&blk) = group.get(peer) else { continue };
            for (i, &size) in sizes.iter().enumerate() {
                let (u, v, z) = upper_target(src_axis, blk, tile_size, i as u32, upper0);
                upper0.allocate_tile(size, u, v, z)?;
            }
        }
    }

    let Some(blk) = group.get(comm.rank()).copied() else {
        return Ok(());
    };

    for (i, tile) in x_tiles.iter().enumerate() {
        let (u, v, z) = left_target(src_axis, blk, tile_size, i as u32, left0);
        left0.store_tile(tile, u, v, z)?;
    }
    for (i, tile) in y_tiles.iter().enumerate() {
        let (u, v, z) = upper_target(src_axis, blk, tile_size, i as u32, upper0);
        upper0.store_tile(tile, u, v, z)?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
