//! Pixel-budget fitting for images sent to the remote compositor
//!
//! The same routine computes the shared output box from the background
//! (budget only) and fits every foreground into that box (budget + box).
//! Scale is capped at 1.0: images are only ever downscaled.

use bytes::Bytes;
use image::{imageops::FilterType, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;

use crate::error::{Error, Result};

/// Maximum width/height an image may be fitted into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Result of fitting native dimensions to a budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// Already within budget and box; the original bytes are reused
    Unchanged { width: u32, height: u32 },
    /// Must be downscaled to exactly these dimensions
    Resize { width: u32, height: u32 },
}

impl Fit {
    pub fn width(&self) -> u32 {
        match self {
            Fit::Unchanged { width, .. } | Fit::Resize { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Fit::Unchanged { height, .. } | Fit::Resize { height, .. } => *height,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, Fit::Unchanged { .. })
    }

    pub fn as_box(&self) -> BoundingBox {
        BoundingBox::new(self.width(), self.height())
    }
}

/// Compute the largest aspect-preserving size within `max_pixels` and `bounds`
pub fn fit_dimensions(
    width: u32,
    height: u32,
    bounds: Option<BoundingBox>,
    max_pixels: u64,
) -> Fit {
    if width == 0 || height == 0 {
        return Fit::Unchanged { width, height };
    }

    let w = width as f64;
    let h = height as f64;

    let scale_box = bounds
        .map(|b| (b.width as f64 / w).min(b.height as f64 / h))
        .unwrap_or(1.0);

    let pixels = w * h;
    let scale_pixels = if pixels > max_pixels as f64 {
        (max_pixels as f64 / pixels).sqrt()
    } else {
        1.0
    };

    let scale = scale_box.min(scale_pixels).min(1.0);
    if scale >= 1.0 {
        return Fit::Unchanged { width, height };
    }

    Fit::Resize {
        width: ((w * scale).floor() as u32).max(1),
        height: ((h * scale).floor() as u32).max(1),
    }
}

/// Image bytes after fitting
#[derive(Debug, Clone)]
pub struct FittedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// False when the original bytes were passed through untouched
    pub resized: bool,
}

/// Read width/height from the image header without decoding pixels
pub fn read_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// Read width/height from an image file header
pub fn read_dimensions_from_path(path: &Path) -> Result<(u32, u32)> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// Fit encoded image bytes, reading native dimensions from the header
///
/// Blocking: decoding and resizing are CPU-bound, run this on the resize pool.
pub fn fit_image(
    name: &str,
    data: Bytes,
    bounds: Option<BoundingBox>,
    max_pixels: u64,
) -> Result<FittedImage> {
    let (width, height) = read_dimensions(&data)
        .map_err(|e| Error::local_io(name, format!("unreadable image header: {}", e)))?;
    fit_image_with_dimensions(name, data, width, height, bounds, max_pixels)
}

/// Fit encoded image bytes whose native dimensions are already known
pub fn fit_image_with_dimensions(
    name: &str,
    data: Bytes,
    width: u32,
    height: u32,
    bounds: Option<BoundingBox>,
    max_pixels: u64,
) -> Result<FittedImage> {
    match fit_dimensions(width, height, bounds, max_pixels) {
        Fit::Unchanged { width, height } => Ok(FittedImage {
            data,
            width,
            height,
            resized: false,
        }),
        Fit::Resize {
            width: target_w,
            height: target_h,
        } => {
            let decoded = image::load_from_memory(&data)
                .map_err(|e| Error::local_io(name, format!("decode failed: {}", e)))?;
            let resized = decoded.resize_exact(target_w, target_h, FilterType::Lanczos3);

            let mut encoded = Vec::new();
            resized
                .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
                .map_err(|e| Error::local_io(name, format!("encode failed: {}", e)))?;

            tracing::debug!(
                "[{}] Resized {}x{} -> {}x{} ({} bytes)",
                name,
                width,
                height,
                target_w,
                target_h,
                encoded.len()
            );

            Ok(FittedImage {
                data: Bytes::from(encoded),
                width: target_w,
                height: target_h,
                resized: true,
            })
        }
    }
}
