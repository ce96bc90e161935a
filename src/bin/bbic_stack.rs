//! BBIC image stack tool.
//!
//! Creates a tiled image stack container from a collection of slice
//! images, optionally generates the two perpendicular projection stacks,
//! and extracts stacks back to per-slice images.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bbic::cluster::{ClusterComm, SingleProcess};
use bbic::container::Container;
use bbic::error::BbicError;
use bbic::source::{ImageSource, ImageStack};
use bbic::stack::{make_all_stacks, StackWriter, WriteOptions};
use bbic::store::{DirStore, StoreRef};
use bbic::StackCli;

fn main() -> ExitCode {
    let cli = StackCli::parse();
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

fn run(cli: &StackCli) -> Result<(), BbicError> {
    cli.validate()?;
    let comm: Arc<dyn ClusterComm> = Arc::new(SingleProcess::new());
    let store: StoreRef = Arc::new(DirStore::open(&cli.file));

    match &cli.create_from {
        Some(pattern) => run_create(cli, pattern, store, comm),
        None => run_read(cli, store, comm),
    }
}

/// Print the structure of an existing container, or extract one of its
/// levels to images.
fn run_read(
    cli: &StackCli,
    store: StoreRef,
    comm: Arc<dyn ClusterComm>,
) -> Result<(), BbicError> {
    let container = Container::open(store, comm)?;
    println!("{}", container);

    let stack = container.get_stack(cli.orientation.axis_index())?;
    println!("{}", stack);

    if let Some(dir) = &cli.to_images {
        let level = stack.get_level(cli.level)?;
        info!(%level, "exporting to images");
        level.extract_slices(dir, cli.format.into())?;
        println!("Done.");
    } else {
        for level in 0..stack.num_levels {
            println!("{}", stack.get_level(level)?);
        }
    }
    Ok(())
}

/// Build a stack (and optionally its projections) from slice images or
/// from another container's primary stack.
fn run_create(
    cli: &StackCli,
    pattern: &str,
    store: StoreRef,
    comm: Arc<dyn ClusterComm>,
) -> Result<(), BbicError> {
    let stack_index = cli.orientation.axis_index();
    let mut source = open_source(pattern, &comm)?;

    let mut container = Container::open_rw(store, comm)?;
    let mut stack = container.create_stack(stack_index)?;
    let (width, height, num_slices) = source.dimensions();
    stack.width = width;
    stack.height = height;
    stack.num_slices = num_slices;
    stack.tile_size = cli.tile_size;
    stack.format = cli.format.into();
    stack.description = cli.description.clone();
    stack.original_filenames = absolute(pattern);
    stack.orientation = cli.orientation.name().to_string();
    stack.set_axis(cli.mat.into());
    if let Some(positions) = &cli.slice_positions {
        stack.set_slice_positions(positions)?;
    }
    stack.write_attrs()?;

    let opts = WriteOptions {
        padding_value: cli.padding_value,
        interp: cli.interp.into(),
        start_offset: cli.from,
        level_offset: 0,
        generate_lods: !cli.no_lods,
        reverse: cli.orientation.reverse(),
    };
    StackWriter::new(container.comm()).write(source.as_mut(), &mut stack, &opts)?;

    if cli.all_stacks {
        let source_stack = container.get_stack(stack_index)?;
        make_all_stacks(
            &mut container,
            &source_stack,
            opts.padding_value,
            opts.interp,
            opts.generate_lods,
        )?;
    }
    Ok(())
}

/// Resolve the `--create-from` argument: an existing container directory
/// serves its stack 0 level 0, anything else is a filename pattern or
/// list file.
fn open_source(
    pattern: &str,
    comm: &Arc<dyn ClusterComm>,
) -> Result<Box<dyn ImageSource>, BbicError> {
    let path = Path::new(pattern);
    if DirStore::is_container(path) {
        let source_store: StoreRef = Arc::new(DirStore::open(path));
        let source_container = Container::open(source_store, comm.clone())?;
        let level = source_container.get_stack(0)?.get_level(0)?;
        Ok(Box::new(level))
    } else {
        let mut stack = ImageStack::from_pattern(pattern)?;
        stack.determine_stack_size(comm.as_ref())?;
        Ok(Box::new(stack))
    }
}

/// Best-effort absolute form of the source pattern, stored as metadata.
fn absolute(pattern: &str) -> String {
    let path = PathBuf::from(pattern);
    if path.is_absolute() {
        return pattern.to_string();
    }
    std::env::current_dir()
        .map(|dir| dir.join(&path).display().to_string())
        .unwrap_or_else(|_| pattern.to_string())
}
