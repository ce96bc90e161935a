//! Stack pyramid end-to-end tests.

use std::sync::Arc;

use bbic::cluster::SingleProcess;
use bbic::codec;
use bbic::container::Container;
use bbic::source::{ImageSource, ImageStack};
use bbic::stack::{StackWriter, WriteOptions};
use bbic::store::{MemStore, StoreRef};
use bbic::{Interpolation, TileFormat};

use super::test_utils::{build_stack, hashed_voxel, read_voxel, stable_dump, FnSource};

fn png_opts() -> WriteOptions {
    WriteOptions {
        interp: Interpolation::Nearest,
        ..WriteOptions::default()
    }
}

#[test]
fn test_three_slice_cube_of_zeros() {
    // 3 slices of 4x4 zero pixels, tile size 2, PNG, with LODs.
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width: 4,
        height: 4,
        num_slices: 3,
        voxel: |_, _, _| 0,
    };
    let (container, stack) = build_stack(store.clone(), 2, &source, 2, &png_opts());

    assert_eq!(container.num_stacks, 3);
    assert_eq!(container.num_volumes, 0);
    assert_eq!(stack.num_levels, 2);

    let level0 = stack.get_level(0).unwrap();
    let level1 = stack.get_level(1).unwrap();
    assert_eq!((level0.num_x_tiles, level0.num_y_tiles), (2, 2));
    assert_eq!((level1.num_x_tiles, level1.num_y_tiles), (1, 1));

    for slice in 0..3 {
        for v in 0..2 {
            for u in 0..2 {
                let tile = level0.get_tile(u, v, slice).unwrap();
                assert_eq!(tile.dimensions(), (2, 2));
                assert!(tile.pixels().all(|p| p[0] == 0));
            }
        }
        let tile = level1.get_tile(0, 0, slice).unwrap();
        assert_eq!(tile.dimensions(), (2, 2));
        assert!(tile.pixels().all(|p| p[0] == 0));
    }
}

#[test]
fn test_padding_centres_small_slices() {
    // A 3x2 gray slice in a stack whose dimensions are fixed at 4x4 by a
    // larger slice: the gray region lands centred on a white canvas.
    let dir = tempfile::TempDir::new().unwrap();
    let small = image::GrayImage::from_pixel(3, 2, image::Luma([128]));
    small.save(dir.path().join("s_0.png")).unwrap();
    let big = image::GrayImage::from_pixel(4, 4, image::Luma([0]));
    big.save(dir.path().join("s_1.png")).unwrap();

    let pattern = dir.path().join("s_%d.png");
    let mut source = ImageStack::from_pattern(pattern.to_str().unwrap()).unwrap();
    source
        .determine_stack_size(&SingleProcess::new())
        .unwrap();
    assert_eq!(source.dimensions(), (4, 4, 2));

    let comm = Arc::new(SingleProcess::new());
    let store: StoreRef = Arc::new(MemStore::new());
    let mut container = Container::open_rw(store, comm).unwrap();
    let mut stack = container.create_stack(2).unwrap();
    stack.width = 4;
    stack.height = 4;
    stack.num_slices = 2;
    stack.tile_size = 2;
    stack.format = TileFormat::Png;
    stack.write_attrs().unwrap();

    let opts = WriteOptions {
        padding_value: 255,
        ..png_opts()
    };
    StackWriter::new(container.comm())
        .write(&mut source, &mut stack, &opts)
        .unwrap();

    let level0 = stack.get_level(0).unwrap();
    let slice = level0.get_image(0, 0).unwrap();
    assert_eq!(slice.dimensions(), (4, 4));
    for y in 0..4 {
        for x in 0..4 {
            let inside = x < 3 && (1..3).contains(&y);
            let expected = if inside { 128 } else { 255 };
            assert_eq!(slice.get_pixel(x, y)[0], expected, "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn test_no_lods_writes_level_zero_only() {
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width: 8,
        height: 8,
        num_slices: 2,
        voxel: hashed_voxel,
    };
    let opts = WriteOptions {
        generate_lods: false,
        ..png_opts()
    };
    let (container, stack) = build_stack(store.clone(), 2, &source, 4, &opts);

    assert_eq!(stack.num_levels, 1);
    assert!(container.store().has("bbic/stacks/2/levels/0"));
    assert!(!container.store().has("bbic/stacks/2/levels/1"));
}

#[test]
fn test_level_zero_round_trips_the_source() {
    // Edge tiles narrower and shorter than the tile size.
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width: 5,
        height: 3,
        num_slices: 4,
        voxel: hashed_voxel,
    };
    let (_, stack) = build_stack(store, 2, &source, 2, &png_opts());

    let level0 = stack.get_level(0).unwrap();
    for s in 0..4 {
        for y in 0..3 {
            for x in 0..5 {
                assert_eq!(read_voxel(&level0, s, x, y), hashed_voxel(x, y, s));
            }
        }
    }
}

#[test]
fn test_lods_halve_the_previous_level() {
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width: 16,
        height: 8,
        num_slices: 1,
        voxel: hashed_voxel,
    };
    let (_, stack) = build_stack(store, 2, &source, 4, &png_opts());
    assert_eq!(stack.num_levels, 3);

    for level in 1..stack.num_levels {
        let fine = stack.get_level(level - 1).unwrap().get_image(0, 0).unwrap();
        let coarse = stack.get_level(level).unwrap().get_image(0, 0).unwrap();
        let expected = codec::resize(
            &fine,
            fine.width() >> 1,
            fine.height() >> 1,
            Interpolation::Nearest,
        );
        assert_eq!(coarse, expected, "level {}", level);
    }
}

#[test]
fn test_extract_round_trip() {
    // Extract level 0 to images, read them back as a new source and
    // rewrite: the tile data must come out identical.
    let source = FnSource {
        width: 6,
        height: 5,
        num_slices: 3,
        voxel: hashed_voxel,
    };
    let first_store = Arc::new(MemStore::new());
    let (_, stack) = build_stack(first_store.clone(), 2, &source, 2, &png_opts());

    let dir = tempfile::TempDir::new().unwrap();
    let level0 = stack.get_level(0).unwrap();
    level0.extract_slices(dir.path(), TileFormat::Png).unwrap();

    let pattern = dir.path().join("%d.png");
    let mut reread = ImageStack::from_pattern(pattern.to_str().unwrap()).unwrap();
    reread.determine_stack_size(&SingleProcess::new()).unwrap();
    assert_eq!(reread.dimensions(), (6, 5, 3));

    let second_store = Arc::new(MemStore::new());
    let comm = Arc::new(SingleProcess::new());
    let mut container = Container::open_rw(second_store.clone(), comm).unwrap();
    let mut rewritten = container.create_stack(2).unwrap();
    rewritten.width = 6;
    rewritten.height = 5;
    rewritten.num_slices = 3;
    rewritten.tile_size = 2;
    rewritten.format = TileFormat::Png;
    rewritten.orientation = "sagittal".to_string();
    rewritten.write_attrs().unwrap();
    StackWriter::new(container.comm())
        .write(&mut reread, &mut rewritten, &png_opts())
        .unwrap();

    assert_eq!(stable_dump(&first_store), stable_dump(&second_store));
}

#[test]
fn test_rewrite_is_idempotent() {
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width: 9,
        height: 7,
        num_slices: 3,
        voxel: hashed_voxel,
    };
    let (container, mut stack) = build_stack(store.clone(), 2, &source, 4, &png_opts());
    let first = stable_dump(&store);

    let mut source = source.clone();
    StackWriter::new(container.comm())
        .write(&mut source, &mut stack, &png_opts())
        .unwrap();
    assert_eq!(stable_dump(&store), first);
}
