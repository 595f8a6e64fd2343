//! Per-chunk background loading
//!
//! The background is read and fitted once per chunk and the resulting buffer
//! is shared by every task in that chunk. Nothing outlives the chunk: the
//! next chunk loads it again from disk.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::dimensions::{fit_dimensions, fit_image, BoundingBox};
use super::pool::ResizePool;
use crate::error::{Error, Result};

/// Background image as submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundSpec {
    pub path: PathBuf,
    /// Native width reported at submission
    pub width: u32,
    /// Native height reported at submission
    pub height: u32,
}

impl BackgroundSpec {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
        }
    }

    fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "background".to_string())
    }
}

/// Background fitted to the output box, shared within one chunk
#[derive(Debug, Clone)]
pub struct FittedBackground {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pixel_budget: u64,
}

impl FittedBackground {
    /// Box every foreground of the chunk is fitted into
    pub fn output_box(&self) -> BoundingBox {
        BoundingBox::new(self.width, self.height)
    }
}

/// Loads and fits the background for a chunk
#[derive(Clone)]
pub struct BackgroundCache {
    pool: ResizePool,
}

impl BackgroundCache {
    pub fn new(pool: ResizePool) -> Self {
        Self { pool }
    }

    /// Read the background from disk and fit it to the pixel budget
    pub async fn load(&self, spec: &BackgroundSpec, pixel_budget: u64) -> Result<FittedBackground> {
        let name = spec.display_name();
        let output_box = fit_dimensions(spec.width, spec.height, None, pixel_budget).as_box();

        let raw = tokio::fs::read(&spec.path)
            .await
            .map_err(|e| Error::local_io(&name, format!("read failed: {}", e)))?;

        let fitted = self
            .pool
            .run(move || fit_image(&name, Bytes::from(raw), Some(output_box), pixel_budget))
            .await?;

        tracing::debug!(
            "Background {} fitted to {}x{} (budget {} px)",
            spec.path.display(),
            fitted.width,
            fitted.height,
            pixel_budget
        );

        Ok(FittedBackground {
            data: fitted.data,
            width: fitted.width,
            height: fitted.height,
            pixel_budget,
        })
    }
}
