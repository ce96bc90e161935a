//! Slice image sources.
//!
//! An [`ImageSource`] yields the 2D slices a stack is built from. The
//! on-disk implementation, [`ImageStack`], resolves a printf-style filename
//! pattern (`brain_%04d.png`) or a list file with one path per line,
//! converts every image to 8-bit luminance and pads it to the common stack
//! dimensions with a centred paste.

use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;
use tracing::debug;

use crate::cluster::ClusterComm;
use crate::codec;
use crate::error::{BbicError, CodecError, StoreError};

/// A source of equally-sized luminance slice images.
pub trait ImageSource {
    /// Dimensions `(width, height, num_slices)` of the source.
    fn dimensions(&self) -> (u32, u32, u32);

    /// Fetch the slice at `slice_index`, padded to the source dimensions
    /// with `padding` on a centred paste.
    fn get_image(&mut self, slice_index: u32, padding: u8) -> Result<GrayImage, BbicError>;
}

// =============================================================================
// Filename patterns
// =============================================================================

/// Expand a printf-style pattern (`%d`, `%0Nd`, `%%`) for one slice index.
/// Anything that does not parse as an integer conversion is kept verbatim.
fn format_pattern(pattern: &str, index: u32) -> String {
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut spec = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                spec.push(d);
                chars.next();
            } else {
                break;
            }
        }
        if chars.peek() == Some(&'d') {
            chars.next();
            let zero_padded = spec.starts_with('0');
            let width: usize = spec.trim_start_matches('0').parse().unwrap_or(0);
            if zero_padded && width > 0 {
                out.push_str(&format!("{:0width$}", index));
            } else if width > 0 {
                out.push_str(&format!("{:width$}", index));
            } else {
                out.push_str(&index.to_string());
            }
        } else {
            out.push('%');
            out.push_str(&spec);
        }
    }
    out
}

// =============================================================================
// ImageStack
// =============================================================================

/// Reader over a collection of slice image files.
pub struct ImageStack {
    filenames: Vec<PathBuf>,
    width: u32,
    height: u32,
}

impl ImageStack {
    /// Resolve the slice filenames. A pattern containing `%` is a
    /// printf-style template over the slice index, starting at 0 or 1,
    /// whichever exists on disk; anything else is the path of a text file
    /// listing one image path per line.
    pub fn from_pattern(pattern: &str) -> Result<Self, BbicError> {
        let filenames = if pattern.contains('%') {
            let start = if Path::new(&format_pattern(pattern, 0)).exists() {
                0
            } else {
                1
            };
            let mut names = Vec::new();
            let mut index = start;
            loop {
                let candidate = PathBuf::from(format_pattern(pattern, index));
                if !candidate.exists() {
                    break;
                }
                names.push(candidate);
                index += 1;
            }
            names
        } else {
            let listing = fs::read_to_string(pattern).map_err(StoreError::from)?;
            listing
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect()
        };

        if filenames.is_empty() {
            return Err(BbicError::MissingEntity(format!(
                "no slice images match '{}'",
                pattern
            )));
        }
        debug!(slices = filenames.len(), pattern, "resolved slice filenames");
        Ok(Self {
            filenames,
            width: 0,
            height: 0,
        })
    }

    /// Compute the overall stack width and height by reading every image
    /// header, rank-striped over the cluster workers.
    pub fn determine_stack_size(&mut self, comm: &dyn ClusterComm) -> Result<(), BbicError> {
        let (mut width, mut height) = (0u32, 0u32);
        for filename in self.filenames.iter().skip(comm.rank()).step_by(comm.size()) {
            let (w, h) = image::image_dimensions(filename)
                .map_err(|e| CodecError::Decode(format!("{}: {}", filename.display(), e)))?;
            width = width.max(w);
            height = height.max(h);
        }
        self.width = comm.all_reduce_max(width);
        self.height = comm.all_reduce_max(height);
        Ok(())
    }

    pub fn num_slices(&self) -> u32 {
        self.filenames.len() as u32
    }
}

impl ImageSource for ImageStack {
    fn dimensions(&self) -> (u32, u32, u32) {
        (self.width, self.height, self.filenames.len() as u32)
    }

    fn get_image(&mut self, slice_index: u32, padding: u8) -> Result<GrayImage, BbicError> {
        let filename = self
            .filenames
            .get(slice_index as usize)
            .ok_or_else(|| BbicError::OutOfRange(format!("slice {}", slice_index)))?;
        let img = image::open(filename)
            .map_err(|e| CodecError::Decode(format!("{}: {}", filename.display(), e)))?
            .to_luma8();
        Ok(codec::expand(img, self.width, self.height, padding))
    }
}

// =============================================================================
// Tests
// =============================================================================
