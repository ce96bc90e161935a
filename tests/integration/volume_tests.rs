//! Volume pyramid end-to-end tests.

use std::sync::Arc;

use bbic::block::{BlockProvider, SliceToBlocks};
use bbic::cluster::SingleProcess;
use bbic::container::Container;
use bbic::stack::WriteOptions;
use bbic::store::MemStore;
use bbic::{Interpolation, TileFormat};

use super::test_utils::{build_stack, hashed_voxel, FnSource};

fn new_container() -> Container {
    Container::open_rw(Arc::new(MemStore::new()), Arc::new(SingleProcess::new())).unwrap()
}

fn fill_volume(container: &mut Container, source: FnSource, block_size: u32) -> bbic::Volume {
    let mut blocks = SliceToBlocks::new(source, block_size);
    let mut volume = container.create_volume(0).unwrap();
    volume.fill(&mut blocks, block_size).unwrap();
    volume
}

#[test]
fn test_volume_lod_dimensions() {
    // 100x64x48 at block size 32: L = floor(log2(min(4,2,2) * 32)) + 1 = 7.
    let mut container = new_container();
    let source = FnSource {
        width: 100,
        height: 64,
        num_slices: 48,
        voxel: hashed_voxel,
    };
    let volume = fill_volume(&mut container, source, 32);

    assert_eq!(volume.lod_count(), 7);
    assert_eq!(volume.blocks_count(0), (4, 2, 2));
    assert_eq!(volume.dimensions(1), (50, 32, 24));
    assert_eq!(volume.blocks_count(1), (2, 1, 1));
    assert_eq!(container.num_volumes, 1);

    // Every block dataset exists as a full cube, valid extent or not.
    let store = container.store();
    for level in 0..3 {
        let lod = volume.get_lod(level).unwrap();
        let (nx, ny, nz) = lod.num_blocks;
        for z in 0..nz {
            for v in 0..ny {
                for u in 0..nx {
                    let path = format!("bbic/volumes/0/levels/{}/{}/{}/{}", level, u, v, z);
                    assert!(store.has_dataset(&path), "{}", path);
                    assert_eq!(store.read_dataset(&path).unwrap().len(), 32 * 32 * 32);
                }
            }
        }
    }
}

#[test]
fn test_level_zero_holds_the_source_voxels() {
    let mut container = new_container();
    let source = FnSource {
        width: 10,
        height: 6,
        num_slices: 5,
        voxel: hashed_voxel,
    };
    let volume = fill_volume(&mut container, source, 4);

    let mut lod0 = volume.get_lod(0).unwrap();
    for (u, v, z) in [(0, 0, 0), (2, 1, 1)] {
        let block = lod0.get_block(u, v, z).unwrap();
        for bz in 0..block.depth {
            for by in 0..block.height {
                for bx in 0..block.width {
                    let (x, y, s) = (u * 4 + bx, v * 4 + by, z * 4 + bz);
                    let expected = if x < 10 && y < 6 && s < 5 {
                        hashed_voxel(x, y, s)
                    } else {
                        0
                    };
                    assert_eq!(block.get(bx, by, bz), expected);
                }
            }
        }
    }
}

#[test]
fn test_downsampled_lod_is_the_window_median() {
    let mut container = new_container();
    let source = FnSource {
        width: 8,
        height: 8,
        num_slices: 8,
        voxel: hashed_voxel,
    };
    let volume = fill_volume(&mut container, source, 4);
    assert_eq!(volume.lod_count(), 4);

    let mut lod1 = volume.get_lod(1).unwrap();
    let block = lod1.get_block(0, 0, 0).unwrap();
    for z in 0..4 {
        for y in 0..4 {
            for x in 0..4 {
                let mut window = Vec::with_capacity(8);
                for dz in 0..2 {
                    for dy in 0..2 {
                        for dx in 0..2 {
                            window.push(hashed_voxel(2 * x + dx, 2 * y + dy, 2 * z + dz));
                        }
                    }
                }
                window.sort_unstable();
                assert_eq!(
                    block.get(x, y, z),
                    window[4],
                    "voxel ({}, {}, {})",
                    x,
                    y,
                    z
                );
            }
        }
    }
}

#[test]
fn test_extract_slices_matches_source() {
    let mut container = new_container();
    let source = FnSource {
        width: 6,
        height: 5,
        num_slices: 4,
        voxel: hashed_voxel,
    };
    let volume = fill_volume(&mut container, source, 4);
    let lod0 = volume.get_lod(0).unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    lod0.extract_slices(dir.path(), TileFormat::Png, 0).unwrap();

    for s in 0..4 {
        let img = image::open(dir.path().join(format!("{}.png", s)))
            .unwrap()
            .to_luma8();
        assert_eq!(img.dimensions(), (6, 5));
        for y in 0..5 {
            for x in 0..6 {
                assert_eq!(img.get_pixel(x, y)[0], hashed_voxel(x, y, s));
            }
        }
    }
}

#[test]
fn test_extract_slices_along_inner_axis() {
    let mut container = new_container();
    let source = FnSource {
        width: 6,
        height: 5,
        num_slices: 4,
        voxel: hashed_voxel,
    };
    let volume = fill_volume(&mut container, source, 4);
    let lod0 = volume.get_lod(0).unwrap();

    // Axis 1 slices along the height: image (x, z) at fixed y.
    let dir = tempfile::TempDir::new().unwrap();
    lod0.extract_slices(dir.path(), TileFormat::Png, 1).unwrap();

    for y in 0..5 {
        let img = image::open(dir.path().join(format!("{}.png", y)))
            .unwrap()
            .to_luma8();
        assert_eq!(img.dimensions(), (6, 4));
        for z in 0..4 {
            for x in 0..6 {
                assert_eq!(img.get_pixel(x, z)[0], hashed_voxel(x, y, z));
            }
        }
    }
}

#[test]
fn test_volume_from_stack_level_blocks() {
    // A fully written stack level doubles as the block source of a
    // volume.
    let store = Arc::new(MemStore::new());
    let source = FnSource {
        width: 8,
        height: 8,
        num_slices: 8,
        voxel: hashed_voxel,
    };
    let opts = WriteOptions {
        interp: Interpolation::Nearest,
        generate_lods: false,
        ..WriteOptions::default()
    };
    let (mut container, stack) = build_stack(store, 2, &source, 4, &opts);

    let mut level0 = stack.get_level(0).unwrap();
    let mut volume = container.create_volume(0).unwrap();
    volume.fill(&mut level0, 4).unwrap();

    let mut lod0 = volume.get_lod(0).unwrap();
    let block = lod0.get_block(1, 1, 1).unwrap();
    assert_eq!(block.get(2, 3, 1), hashed_voxel(4 + 2, 4 + 3, 4 + 1));
}

#[test]
fn test_volume_attrs_round_trip() {
    let mut container = new_container();
    let source = FnSource {
        width: 8,
        height: 8,
        num_slices: 8,
        voxel: hashed_voxel,
    };
    fill_volume(&mut container, source, 4);

    let volume = container.get_volume(0).unwrap();
    assert_eq!(
        (volume.width, volume.height, volume.depth),
        (8, 8, 8)
    );
    assert_eq!(volume.block_size, 4);
    assert_eq!(volume.version, bbic::volume::VOLUME_CURRENT_VERSION);
    assert!(matches!(
        container.get_volume(3),
        Err(bbic::BbicError::MissingEntity(_))
    ));
}
