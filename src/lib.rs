//! # BBIC
//!
//! Builder for hierarchical, tiled, multi-resolution containers of large
//! volumetric microscopy and atlas data.
//!
//! The container holds two parallel representations of the same voxels:
//!
//! - **Stacks**: up to three tiled 2D image pyramids, one per principal
//!   axis. Each pyramid is a sequence of resolution levels; each level is
//!   a grid of fixed-size compressed tiles addressed `(u, v, slice)`.
//! - **Volumes**: a 3D block pyramid where each level is a grid of raw
//!   cubic `u8` blocks addressed `(u, v, z)`.
//!
//! ## Architecture
//!
//! - [`store`] - hierarchical key-value store with typed attributes (the
//!   persistence seam; in-memory and directory backends ship here)
//! - [`codec`] - luminance raster codec over the `image` crate
//! - [`cluster`] - worker coordination (collective gathers, barriers)
//! - [`source`] - slice image sources (filename patterns, list files)
//! - [`block`] - cubic block algebra and block providers
//! - [`container`] - the `bbic/` root entity
//! - [`stack`] - tiled stacks, the pyramid writer and the cross-axis
//!   projector
//! - [`volume`] - block volumes and the median downsampler
//! - [`config`] - command-line types for the `bbic_stack` and
//!   `bbic_volume` tools
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bbic::cluster::SingleProcess;
//! use bbic::container::Container;
//! use bbic::source::{ImageSource, ImageStack};
//! use bbic::stack::{Axis, StackWriter, WriteOptions};
//! use bbic::store::DirStore;
//!
//! # fn main() -> Result<(), bbic::error::BbicError> {
//! let comm = Arc::new(SingleProcess::new());
//! let store = Arc::new(DirStore::open("brain.bbic"));
//!
//! let mut source = ImageStack::from_pattern("slices/brain_%04d.png")?;
//! source.determine_stack_size(comm.as_ref())?;
//!
//! let mut container = Container::open_rw(store, comm.clone())?;
//! let mut stack = container.create_stack(Axis::Z.index())?;
//! let (width, height, num_slices) = source.dimensions();
//! stack.width = width;
//! stack.height = height;
//! stack.num_slices = num_slices;
//! stack.tile_size = 256;
//! stack.write_attrs()?;
//!
//! StackWriter::new(comm.as_ref()).write(&mut source, &mut stack, &WriteOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod source;
pub mod stack;
pub mod store;
pub mod volume;

// Re-export commonly used types
pub use block::{BlockIndex, BlockProvider, DataBlock, SliceToBlocks};
pub use cluster::{ClusterComm, LocalCluster, SingleProcess};
pub use codec::{Interpolation, TileFormat};
pub use config::{StackCli, VolumeCli};
pub use container::Container;
pub use error::{BbicError, CodecError, StoreError};
pub use source::{ImageSource, ImageStack};
pub use stack::{make_all_stacks, Axis, Stack, StackLevel, StackWriter, WriteOptions};
pub use store::{AttrValue, DirStore, GroupStore, MemStore, StoreRef};
pub use volume::{Downsampler, Volume, VolumeLod};
