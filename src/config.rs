//! Command-line configuration for the container tools.
//!
//! Two binaries share these types: `bbic_stack` builds and extracts tiled
//! image stacks, `bbic_volume` builds and extracts block volumes. Both
//! take the container path as their first argument and exit non-zero with
//! an error message on any failure.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::codec::{Interpolation, TileFormat};
use crate::error::BbicError;
use crate::stack::Axis;

/// Default tile side for stacks.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default block side for volumes.
pub const DEFAULT_BLOCK_SIZE: u32 = 64;

/// Default padding value for pixels outside the source raster.
pub const DEFAULT_PADDING_VALUE: u8 = 255;

// =============================================================================
// Argument enums
// =============================================================================

/// Stack orientation, optionally with reversed slice order.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationArg {
    Coronal,
    Axial,
    Sagittal,
    CoronalReverse,
    AxialReverse,
    SagittalReverse,
}

impl OrientationArg {
    /// Index of the axis the slices are stacked along.
    pub fn axis_index(self) -> u32 {
        match self {
            OrientationArg::Coronal | OrientationArg::CoronalReverse => 0,
            OrientationArg::Axial | OrientationArg::AxialReverse => 1,
            OrientationArg::Sagittal | OrientationArg::SagittalReverse => 2,
        }
    }

    /// Is the slice order reversed?
    pub fn reverse(self) -> bool {
        matches!(
            self,
            OrientationArg::CoronalReverse
                | OrientationArg::AxialReverse
                | OrientationArg::SagittalReverse
        )
    }

    /// Name stored in the stack `orientation` attribute.
    pub fn name(self) -> &'static str {
        match self {
            OrientationArg::Coronal => "coronal",
            OrientationArg::Axial => "axial",
            OrientationArg::Sagittal => "sagittal",
            OrientationArg::CoronalReverse => "coronal-reverse",
            OrientationArg::AxialReverse => "axial-reverse",
            OrientationArg::SagittalReverse => "sagittal-reverse",
        }
    }
}

/// Tile image format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    #[value(name = "PNG", alias = "png")]
    Png,
    #[value(name = "JPEG", alias = "jpeg")]
    Jpeg,
    #[value(name = "TIFF", alias = "tiff")]
    Tiff,
}

impl From<FormatArg> for TileFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Png => TileFormat::Png,
            FormatArg::Jpeg => TileFormat::Jpeg,
            FormatArg::Tiff => TileFormat::Tiff,
        }
    }
}

/// Downsampling filter.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpArg {
    Nearest,
    Linear,
}

impl From<InterpArg> for Interpolation {
    fn from(arg: InterpArg) -> Self {
        match arg {
            InterpArg::Nearest => Interpolation::Nearest,
            InterpArg::Linear => Interpolation::Linear,
        }
    }
}

/// Viewing axis for the voxel-to-world matrix.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatArg {
    #[value(name = "X")]
    X,
    #[value(name = "Y")]
    Y,
    #[value(name = "Z")]
    Z,
}

impl From<MatArg> for Axis {
    fn from(arg: MatArg) -> Self {
        match arg {
            MatArg::X => Axis::X,
            MatArg::Y => Axis::Y,
            MatArg::Z => Axis::Z,
        }
    }
}

// =============================================================================
// bbic_stack
// =============================================================================

/// Create a tiled image stack container from a collection of slice
/// images, or extract one back to images.
#[derive(Parser, Debug, Clone)]
#[command(name = "bbic_stack")]
#[command(version, about, long_about = None)]
pub struct StackCli {
    /// Container file.
    pub file: PathBuf,

    /// Pattern of slice filenames, e.g. `foo_%03d_bar.png`, or the path
    /// of a text file listing one image per line, or an existing
    /// container whose stack 0 serves as the source.
    #[arg(long = "create-from", value_name = "PATTERN")]
    pub create_from: Option<String>,

    /// Extract the stack as a collection of images to the given folder.
    #[arg(long = "to-images", value_name = "DIR")]
    pub to_images: Option<PathBuf>,

    /// Orientation of the input stack (when creating), or of the stack to
    /// read (when extracting).
    #[arg(long, value_enum, default_value_t = OrientationArg::Sagittal)]
    pub orientation: OrientationArg,

    /// Also generate the stacks along the two perpendicular axes.
    #[arg(long = "all-stacks")]
    pub all_stacks: bool,

    /// Stack description attribute.
    #[arg(long, default_value = "Imported image stack")]
    pub description: String,

    /// Tile image side in pixels.
    #[arg(long = "tile-size", default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    /// Resolution level to extract.
    #[arg(long, default_value_t = 0)]
    pub level: u32,

    /// Do not generate LODs, only level 0.
    #[arg(long = "no-lods")]
    pub no_lods: bool,

    /// Tile image format.
    #[arg(long, value_enum, default_value_t = FormatArg::Jpeg)]
    pub format: FormatArg,

    /// Viewing axis applied to the voxel-based local-to-world matrix.
    #[arg(long, value_enum, default_value_t = MatArg::Z)]
    pub mat: MatArg,

    /// Text file with one slice position per line.
    #[arg(long = "slice-positions", value_name = "FILE")]
    pub slice_positions: Option<PathBuf>,

    /// Interpolation used when downsampling between levels.
    #[arg(long, value_enum, default_value_t = InterpArg::Linear)]
    pub interp: InterpArg,

    /// Start from the given slice (for resuming).
    #[arg(long = "from", default_value_t = 0)]
    pub from: u32,

    /// Padding value for pixels outside the source raster.
    #[arg(long = "padding-value", default_value_t = DEFAULT_PADDING_VALUE)]
    pub padding_value: u8,
}

impl StackCli {
    pub fn validate(&self) -> Result<(), BbicError> {
        if self.tile_size == 0 {
            return Err(BbicError::InvalidArgument(
                "tile-size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// bbic_volume
// =============================================================================

/// Create a block-pyramid volume container from slice images, or extract
/// one back to images.
#[derive(Parser, Debug, Clone)]
#[command(name = "bbic_volume")]
#[command(version, about, long_about = None)]
pub struct VolumeCli {
    /// Container file.
    pub file: PathBuf,

    /// Volume index.
    #[arg(long, default_value_t = 0)]
    pub volume: u32,

    /// Resolution level to extract.
    #[arg(long, default_value_t = 0)]
    pub level: u32,

    /// Extract the volume as a stack of images to the given folder.
    #[arg(long = "to-images", value_name = "DIR")]
    pub to_images: Option<PathBuf>,

    /// Pattern of slice filenames, a list file, or an existing container
    /// whose stack 0 serves as the block source.
    #[arg(long = "create-from", value_name = "PATTERN")]
    pub create_from: Option<String>,

    /// Output format for extracted images.
    #[arg(long, value_enum, default_value_t = FormatArg::Png)]
    pub format: FormatArg,

    /// Axis along which to take slices when extracting.
    #[arg(long, default_value_t = 0)]
    pub axis: u32,

    /// Block side in voxels.
    #[arg(long = "block-size", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: u32,
}

impl VolumeCli {
    pub fn validate(&self) -> Result<(), BbicError> {
        if self.block_size == 0 {
            return Err(BbicError::InvalidArgument(
                "block-size must be at least 1".to_string(),
            ));
        }
        if self.axis > 2 {
            return Err(BbicError::InvalidArgument(format!(
                "axis must be 0, 1 or 2, got {}",
                self.axis
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
