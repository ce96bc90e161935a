//! BBIC volume tool.
//!
//! Creates a block-pyramid volume from a collection of slice images (or
//! from another container's stack) and extracts any level of detail back
//! to per-slice images along a chosen axis.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bbic::block::{BlockProvider, SliceToBlocks};
use bbic::cluster::{ClusterComm, SingleProcess};
use bbic::container::Container;
use bbic::error::BbicError;
use bbic::source::ImageStack;
use bbic::store::{DirStore, StoreRef};
use bbic::VolumeCli;

fn main() -> ExitCode {
    let cli = VolumeCli::parse();
    init_logging();

    let start_time = Instant::now();
    let result = run(&cli);
    info!(elapsed_s = start_time.elapsed().as_secs(), "execution time");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(BbicError::AlreadyExists(_)) => {
            eprintln!("Couldn't start task because output file already exists");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bbic=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn run(cli: &VolumeCli) -> Result<(), BbicError> {
    cli.validate()?;
    let comm: Arc<dyn ClusterComm> = Arc::new(SingleProcess::new());
    let store: StoreRef = Arc::new(DirStore::open(&cli.file));

    match &cli.create_from {
        Some(pattern) => run_create(cli, pattern, store, comm),
        None => run_read(cli, store, comm),
    }
}

fn run_read(
    cli: &VolumeCli,
    store: StoreRef,
    comm: Arc<dyn ClusterComm>,
) -> Result<(), BbicError> {
    let container = Container::open(store, comm)?;
    println!("{}", container);

    let volume = container.get_volume(cli.volume)?;
    println!("{}", volume);
    println!("detailed structure:");
    for level in 0..volume.lod_count() {
        println!(
            "Level {}: #blocks {:?}, size {:?}",
            level,
            volume.blocks_count(level),
            volume.dimensions(level)
        );
    }

    if let Some(dir) = &cli.to_images {
        let lod = volume.get_lod(cli.level)?;
        info!(%lod, "exporting to images");
        lod.extract_slices(dir, cli.format.into(), cli.axis)?;
        println!("Done.");
    }
    Ok(())
}

fn run_create(
    cli: &VolumeCli,
    pattern: &str,
    store: StoreRef,
    comm: Arc<dyn ClusterComm>,
) -> Result<(), BbicError> {
    let mut source = open_block_source(pattern, cli.block_size, &comm)?;

    let mut container = Container::open_rw(store, comm)?;
    let mut volume = container.create_volume(cli.volume)?;
    volume.fill(source.as_mut(), cli.block_size)?;
    println!("Done.");
    Ok(())
}

/// Resolve the `--create-from` argument: an existing container serves its
/// stack 0 level 0 as a block source, anything else is read as an image
/// stack through the slice-to-blocks adapter.
fn open_block_source(
    pattern: &str,
    block_size: u32,
    comm: &Arc<dyn ClusterComm>,
) -> Result<Box<dyn BlockProvider>, BbicError> {
    let path = Path::new(pattern);
    if DirStore::is_container(path) {
        let source_store: StoreRef = Arc::new(DirStore::open(path));
        let source_container = Container::open(source_store, comm.clone())?;
        let level = source_container.get_stack(0)?.get_level(0)?;
        Ok(Box::new(level))
    } else {
        let mut stack = ImageStack::from_pattern(pattern)?;
        stack.determine_stack_size(comm.as_ref())?;
        Ok(Box::new(SliceToBlocks::new(stack, block_size)))
    }
}
