//! Multi-worker collective protocol tests.

use std::sync::Arc;
use std::thread;

use bbic::cluster::{ClusterComm, LocalCluster, SingleProcess};
use bbic::container::Container;
use bbic::stack::{make_all_stacks, StackWriter, WriteOptions};
use bbic::store::{MemStore, StoreRef};
use bbic::{Interpolation, TileFormat};

use super::test_utils::{hashed_voxel, read_voxel, stable_dump, FnSource, RecordingStore};

fn nearest_opts() -> WriteOptions {
    WriteOptions {
        interp: Interpolation::Nearest,
        ..WriteOptions::default()
    }
}

fn test_source() -> FnSource {
    FnSource {
        width: 8,
        height: 8,
        num_slices: 5,
        voxel: hashed_voxel,
    }
}

/// Run the full stack write on one worker of a shared store.
fn write_stack_worker(
    store: StoreRef,
    comm: Arc<dyn ClusterComm>,
    opts: &WriteOptions,
) -> Container {
    let mut container = Container::open_rw(store, comm).unwrap();
    let mut stack = container.create_stack(2).unwrap();
    let source = test_source();
    stack.width = source.width;
    stack.height = source.height;
    stack.num_slices = source.num_slices;
    stack.tile_size = 4;
    stack.format = TileFormat::Png;
    stack.orientation = "sagittal".to_string();
    stack.write_attrs().unwrap();

    let mut source = source;
    StackWriter::new(container.comm())
        .write(&mut source, &mut stack, opts)
        .unwrap();
    container
}

#[test]
fn test_two_workers_issue_identical_allocations() {
    let shared = Arc::new(MemStore::new());
    let comms = LocalCluster::new(2);

    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let shared = shared.clone();
            thread::spawn(move || {
                let recorder = Arc::new(RecordingStore::new(shared));
                let store: StoreRef = recorder.clone();
                write_stack_worker(store, Arc::new(comm), &nearest_opts());
                recorder.allocations()
            })
        })
        .collect();

    let logs: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(!logs[0].is_empty());
    // Every allocation issued on worker 0 is issued in the same order on
    // worker 1 (and vice versa).
    assert_eq!(logs[0], logs[1]);

    // The written stack is complete and correct.
    let comm: Arc<dyn ClusterComm> = Arc::new(SingleProcess::new());
    let container = Container::open(shared, comm).unwrap();
    let level0 = container.get_stack(2).unwrap().get_level(0).unwrap();
    for s in 0..5 {
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(read_voxel(&level0, s, x, y), hashed_voxel(x, y, s));
            }
        }
    }
}

#[test]
fn test_two_worker_pipeline_matches_single_worker() {
    // The cluster size must not change the produced container.
    let single_store = Arc::new(MemStore::new());
    {
        let comm: Arc<dyn ClusterComm> = Arc::new(SingleProcess::new());
        let mut container = write_stack_worker(single_store.clone(), comm, &nearest_opts());
        let source_stack = container.get_stack(2).unwrap();
        make_all_stacks(
            &mut container,
            &source_stack,
            0,
            Interpolation::Nearest,
            true,
        )
        .unwrap();
    }

    let dual_store = Arc::new(MemStore::new());
    let handles: Vec<_> = LocalCluster::new(2)
        .into_iter()
        .map(|comm| {
            let store: StoreRef = dual_store.clone();
            thread::spawn(move || {
                let comm: Arc<dyn ClusterComm> = Arc::new(comm);
                let mut container = write_stack_worker(store, comm, &nearest_opts());
                let source_stack = container.get_stack(2).unwrap();
                make_all_stacks(
                    &mut container,
                    &source_stack,
                    0,
                    Interpolation::Nearest,
                    true,
                )
                .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(stable_dump(&single_store), stable_dump(&dual_store));
}

#[test]
fn test_three_workers_with_uneven_slices() {
    // 5 slices over 3 workers: the final round has idle workers that must
    // still join the collective allocation.
    let shared = Arc::new(MemStore::new());
    let handles: Vec<_> = LocalCluster::new(3)
        .into_iter()
        .map(|comm| {
            let store: StoreRef = shared.clone();
            thread::spawn(move || {
                write_stack_worker(store, Arc::new(comm), &nearest_opts());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let comm: Arc<dyn ClusterComm> = Arc::new(SingleProcess::new());
    let container = Container::open(shared, comm).unwrap();
    let stack = container.get_stack(2).unwrap();
    assert_eq!(stack.num_levels, 2);
    let level1 = stack.get_level(1).unwrap();
    for s in 0..5 {
        // Every slice of every level is present.
        level1.get_image(s, 0).unwrap();
    }
}
