//! Cross-axis projection tests.
//!
//! For every source axis, every voxel read from the source stack must
//! equal the voxel read from the *left* and *upper* projection stacks at
//! the mapped coordinates — including partial edge blocks when the
//! dimensions are not multiples of the tile size.

use std::sync::Arc;

use bbic::codec;
use bbic::stack::{make_all_stacks, WriteOptions};
use bbic::store::MemStore;
use bbic::Interpolation;

use super::test_utils::{build_stack, hashed_voxel, FnSource};

fn nearest_opts() -> WriteOptions {
    WriteOptions {
        interp: Interpolation::Nearest,
        ..WriteOptions::default()
    }
}

/// Container stack indices `(left, upper)` for a source axis.
fn projection_indices(src_axis: u32) -> (u32, u32) {
    match src_axis {
        0 => (2, 1),
        1 => (2, 0),
        _ => (1, 0),
    }
}

/// Build a stack along `src_axis`, project it, and verify the voxel
/// identity of both projections against the source function.
fn check_projections(
    width: u32,
    height: u32,
    num_slices: u32,
    tile_size: u32,
    src_axis: u32,
    voxel: fn(u32, u32, u32) -> u8,
) {
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width,
        height,
        num_slices,
        voxel,
    };
    let (mut container, stack) =
        build_stack(store, src_axis, &source, tile_size, &nearest_opts());
    make_all_stacks(&mut container, &stack, 0, Interpolation::Nearest, true).unwrap();

    let (left_index, upper_index) = projection_indices(src_axis);
    let left = container.get_stack(left_index).unwrap();
    let upper = container.get_stack(upper_index).unwrap();

    // Derived dimensions per the projection table.
    if src_axis == 1 {
        assert_eq!(left.dimensions(), (height, num_slices, width));
    } else {
        assert_eq!(left.dimensions(), (num_slices, height, width));
    }
    if src_axis == 0 {
        assert_eq!(upper.dimensions(), (num_slices, width, height));
    } else {
        assert_eq!(upper.dimensions(), (width, num_slices, height));
    }
    assert_eq!(left.tile_size, tile_size);
    assert_eq!(upper.format, stack.format);

    let left0 = left.get_level(0).unwrap();
    for t in 0..left.num_slices {
        let img = left0.get_image(t, 0).unwrap();
        assert_eq!(img.dimensions(), (left.width, left.height), "left slice {}", t);
        for dy in 0..left.height {
            for dx in 0..left.width {
                let expected = match src_axis {
                    0 => voxel(width - 1 - t, dy, dx),
                    1 => voxel(t, dx, dy),
                    _ => voxel(t, dy, num_slices - 1 - dx),
                };
                assert_eq!(
                    img.get_pixel(dx, dy)[0],
                    expected,
                    "left axis {} voxel ({}, {}, {})",
                    src_axis,
                    dx,
                    dy,
                    t
                );
            }
        }
    }

    let upper0 = upper.get_level(0).unwrap();
    for t in 0..upper.num_slices {
        let img = upper0.get_image(t, 0).unwrap();
        assert_eq!(img.dimensions(), (upper.width, upper.height), "upper slice {}", t);
        for dy in 0..upper.height {
            for dx in 0..upper.width {
                let expected = match src_axis {
                    0 => voxel(dy, t, dx),
                    1 => voxel(dx, height - 1 - t, dy),
                    _ => voxel(dx, t, num_slices - 1 - dy),
                };
                assert_eq!(
                    img.get_pixel(dx, dy)[0],
                    expected,
                    "upper axis {} voxel ({}, {}, {})",
                    src_axis,
                    dx,
                    dy,
                    t
                );
            }
        }
    }
}

#[test]
fn test_sagittal_cube_projects_to_coronal_and_axial() {
    // The classic 8x8x8 cube with v = x + 8y + 64z, tile size 4, built as
    // a sagittal (axis 2) stack.
    check_projections(8, 8, 8, 4, 2, |x, y, z| (x + 8 * y + 64 * z) as u8);
}

#[test]
fn test_projections_from_coronal_source() {
    check_projections(8, 8, 8, 4, 0, hashed_voxel);
}

#[test]
fn test_projections_from_axial_source() {
    check_projections(8, 8, 8, 4, 1, hashed_voxel);
}

#[test]
fn test_projections_with_partial_edge_blocks() {
    // Dimensions that are not multiples of the tile size; for a sagittal
    // source this used to leave the first destination column and row
    // partially unwritten.
    for src_axis in 0..3 {
        check_projections(10, 6, 7, 4, src_axis, hashed_voxel);
    }
}

#[test]
fn test_projected_stacks_get_their_own_lods() {
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width: 8,
        height: 8,
        num_slices: 8,
        voxel: hashed_voxel,
    };
    let (mut container, stack) = build_stack(store, 2, &source, 4, &nearest_opts());
    make_all_stacks(&mut container, &stack, 0, Interpolation::Nearest, true).unwrap();

    let left = container.get_stack(1).unwrap();
    assert_eq!(left.num_levels, 2);
    let fine = left.get_level(0).unwrap().get_image(3, 0).unwrap();
    let coarse = left.get_level(1).unwrap().get_image(3, 0).unwrap();
    let expected = codec::resize(
        &fine,
        fine.width() >> 1,
        fine.height() >> 1,
        Interpolation::Nearest,
    );
    assert_eq!(coarse, expected);
}

#[test]
fn test_projection_without_lods_stops_at_level_zero() {
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width: 8,
        height: 8,
        num_slices: 8,
        voxel: hashed_voxel,
    };
    let (mut container, stack) = build_stack(store.clone(), 2, &source, 4, &nearest_opts());
    make_all_stacks(&mut container, &stack, 0, Interpolation::Nearest, false).unwrap();

    let left = container.get_stack(1).unwrap();
    assert_eq!(left.num_levels, 1);
    assert!(!container.store().has("bbic/stacks/1/levels/1"));
    assert!(container.store().has("bbic/stacks/1/levels/0"));
}
