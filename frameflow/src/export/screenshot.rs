//! Single-frame image capture

use crate::error::PipelineError;
use crate::utils::{timestamp_tag, unique_path};
use opencv::core::{Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_JPEG_QUALITY: i32 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// Guess from a file extension, case-insensitive.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

fn screenshot_stem() -> String {
    format!("screenshot_{}", timestamp_tag())
}

/// `screenshot_<timestamp>.<ext>`
pub fn screenshot_filename(format: ImageFormat) -> String {
    format!("{}.{}", screenshot_stem(), format.extension())
}

/// Write `frame` into `dir` under a fresh timestamped name.
pub fn save_screenshot(
    frame: &Mat,
    dir: &Path,
    format: ImageFormat,
    jpeg_quality: i32,
) -> Result<PathBuf, PipelineError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        PipelineError::Persistence(format!("Cannot create screenshot directory {:?}: {}", dir, e))
    })?;
    let path = unique_path(dir, &screenshot_stem(), format.extension());
    save_screenshot_to(frame, &path, jpeg_quality)?;
    Ok(path)
}

/// Encode `frame` to `path`; the format follows the extension (PNG unless
/// it names JPEG). Quality is clamped to 0..=100.
pub fn save_screenshot_to(frame: &Mat, path: &Path, jpeg_quality: i32) -> Result<(), PipelineError> {
    if frame.cols() <= 0 || frame.rows() <= 0 {
        return Err(PipelineError::Processing("Cannot save an empty frame".to_string()));
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| PipelineError::Persistence(format!("Non UTF-8 screenshot path {:?}", path)))?;

    let mut params = Vector::<i32>::new();
    if ImageFormat::from_path(path) == Some(ImageFormat::Jpeg) {
        params.push(imgcodecs::IMWRITE_JPEG_QUALITY);
        params.push(jpeg_quality.clamp(0, 100));
    }

    if !imgcodecs::imwrite(path_str, frame, &params)? {
        return Err(PipelineError::Persistence(format!("Failed to write screenshot {:?}", path)));
    }
    info!("Screenshot saved: {:?}", path);
    Ok(())
}
