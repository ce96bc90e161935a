//! Image codec adapter.
//!
//! This module wraps the `image` crate behind the narrow set of raster
//! operations the pyramid builders need: encode/decode of 8-bit luminance
//! tiles, cropping, centred pasting, factor-2 resizing and the exact
//! rotations and flips used by the cross-axis projector.
//!
//! All rasters are grayscale ([`GrayImage`]); colour input is converted to
//! luminance at the source boundary.

use std::io::Cursor;

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, Luma};

use crate::error::CodecError;

/// Compressed tile formats supported by the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    Jpeg,
    Png,
    Tiff,
}

impl TileFormat {
    /// MIME type stored in the stack `type` attribute (`image/{lower}`).
    pub fn mime(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
            TileFormat::Tiff => "image/tiff",
        }
    }

    /// File extension used by the slice extractors.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpeg",
            TileFormat::Png => "png",
            TileFormat::Tiff => "tiff",
        }
    }

    /// Parse the MIME type back into a format.
    pub fn from_mime(mime: &str) -> Result<Self, CodecError> {
        match mime {
            "image/jpeg" => Ok(TileFormat::Jpeg),
            "image/png" => Ok(TileFormat::Png),
            "image/tiff" => Ok(TileFormat::Tiff),
            other => Err(CodecError::UnsupportedFormat(other.to_string())),
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            TileFormat::Jpeg => ImageFormat::Jpeg,
            TileFormat::Png => ImageFormat::Png,
            TileFormat::Tiff => ImageFormat::Tiff,
        }
    }
}

/// Downsampling filter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
}

impl Interpolation {
    pub(crate) fn filter(&self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Linear => FilterType::Triangle,
        }
    }
}

// =============================================================================
// Encode / Decode
// =============================================================================

/// Compress a raster into a serialised tile.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the encoder rejects the raster and
/// [`CodecError::EmptyOutput`] if it produces zero bytes.
pub fn encode(raster: &GrayImage, format: TileFormat) -> Result<Bytes, CodecError> {
    let mut buffer = Vec::new();
    raster
        .write_to(&mut Cursor::new(&mut buffer), format.image_format())
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    if buffer.is_empty() {
        return Err(CodecError::EmptyOutput);
    }
    Ok(Bytes::from(buffer))
}

/// Decode a serialised tile back into a luminance raster.
pub fn decode(data: &[u8]) -> Result<GrayImage, CodecError> {
    let img = image::load_from_memory(data).map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(img.to_luma8())
}

// =============================================================================
// Raster operations
// =============================================================================

/// Cut one tile out of a slice image and compress it.
///
/// The tile at `(x, y)` is clipped against the image border, so tiles on
/// the right/bottom edge may be narrower/shorter than `tile_size`.
pub fn compressed_tile(
    image: &GrayImage,
    x: u32,
    y: u32,
    tile_size: u32,
    format: TileFormat,
) -> Result<Bytes, CodecError> {
    let w = tile_size.min(image.width() - x);
    let h = tile_size.min(image.height() - y);
    let tile = imageops::crop_imm(image, x, y, w, h).to_image();
    encode(&tile, format)
}

/// Expand an image to `(width, height)` by pasting it centred on a canvas
/// filled with `padding`. Returns the input unchanged if it already has the
/// requested size.
pub fn expand(image: GrayImage, width: u32, height: u32, padding: u8) -> GrayImage {
    if image.width() == width && image.height() == height {
        return image;
    }
    let dx = width.saturating_sub(image.width()) >> 1;
    let dy = height.saturating_sub(image.height()) >> 1;
    let mut canvas = GrayImage::from_pixel(width, height, Luma([padding]));
    imageops::replace(&mut canvas, &image, i64::from(dx), i64::from(dy));
    canvas
}

/// Resize with the requested filter, clamping the target to 1x1 so that
/// repeated halving of a degenerate level never produces an empty raster.
pub fn resize(image: &GrayImage, width: u32, height: u32, interp: Interpolation) -> GrayImage {
    let w = width.max(1);
    let h = height.max(1);
    imageops::resize(image, w, h, interp.filter())
}

/// Rotate 90 degrees clockwise (the "-90" of the reorientation table).
pub fn rotate_cw(image: &GrayImage) -> GrayImage {
    imageops::rotate90(image)
}

/// Rotate 90 degrees counter-clockwise (the "+90" of the reorientation table).
pub fn rotate_ccw(image: &GrayImage) -> GrayImage {
    imageops::rotate270(image)
}

pub fn mirror(image: &GrayImage) -> GrayImage {
    imageops::flip_horizontal(image)
}

pub fn flip(image: &GrayImage) -> GrayImage {
    imageops::flip_vertical(image)
}

// =============================================================================
// Tests
// =============================================================================
