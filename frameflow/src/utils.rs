//! Utility functions for frame processing

use crate::error::PipelineError;
use opencv::core::{self, Mat, Scalar};
use opencv::imgproc;
use opencv::prelude::*;
use std::path::{Path, PathBuf};

/// Smallest odd value that is `>= max(size, minimum)`.
///
/// `minimum` is expected to be odd itself (1 for kernels, 3 for adaptive
/// block sizes).
pub fn normalize_odd(size: i32, minimum: i32) -> i32 {
    let size = size.max(minimum);
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

/// Kernel sizes are odd and at least 1.
pub fn normalize_kernel_size(size: i32) -> i32 {
    normalize_odd(size, 1)
}

/// Adaptive threshold block sizes are odd and at least 3.
pub fn normalize_block_size(size: i32) -> i32 {
    normalize_odd(size, 3)
}

/// Convert a BGR frame to a single luma channel.
pub fn to_gray(src: &Mat) -> Result<Mat, PipelineError> {
    match src.channels() {
        1 => Ok(src.try_clone()?),
        3 => {
            let mut gray = Mat::default();
            imgproc::cvt_color(src, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
            Ok(gray)
        }
        4 => {
            let mut gray = Mat::default();
            imgproc::cvt_color(src, &mut gray, imgproc::COLOR_BGRA2GRAY, 0)?;
            Ok(gray)
        }
        n => Err(PipelineError::Processing(format!("Unsupported channel count: {}", n))),
    }
}

/// Promote a single-channel image back to 3-channel BGR so every stage of the
/// pipeline sees the same pixel format.
pub fn gray_to_bgr(gray: &Mat) -> Result<Mat, PipelineError> {
    let mut bgr = Mat::default();
    imgproc::cvt_color(gray, &mut bgr, imgproc::COLOR_GRAY2BGR, 0)?;
    Ok(bgr)
}

/// Allocate a BGR frame filled with a single color.
pub fn solid_frame(width: i32, height: i32, color: Scalar) -> Result<Mat, PipelineError> {
    if width <= 0 || height <= 0 {
        return Err(PipelineError::Processing(format!(
            "Invalid frame dimensions {}x{}",
            width, height
        )));
    }
    Ok(Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, color)?)
}

/// Convert a continuous BGR u8 frame into an RGB float32 tensor in CHW order,
/// normalized to [0, 1].
pub fn mat_to_chw_tensor(mat: &Mat) -> Result<Vec<f32>, PipelineError> {
    let (width, height) = (mat.cols(), mat.rows());
    if width <= 0 || height <= 0 {
        return Err(PipelineError::Processing("Invalid image dimensions".to_string()));
    }
    if mat.typ() != core::CV_8UC3 {
        return Err(PipelineError::Processing(format!(
            "Expected CV_8UC3 input, got type {}",
            mat.typ()
        )));
    }

    // Rows of a sub-matrix are not contiguous; data_bytes needs a continuous buffer.
    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };
    let bytes = mat.data_bytes()?;

    let plane = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| PipelineError::Processing("Tensor size overflow".to_string()))?;
    if bytes.len() < plane * 3 {
        return Err(PipelineError::Processing("Frame buffer shorter than expected".to_string()));
    }

    let mut chw = vec![0.0f32; plane * 3];
    for (i, px) in bytes.chunks_exact(3).take(plane).enumerate() {
        // BGR in, RGB planes out
        chw[i] = px[2] as f32 / 255.0;
        chw[plane + i] = px[1] as f32 / 255.0;
        chw[2 * plane + i] = px[0] as f32 / 255.0;
    }

    Ok(chw)
}

/// Local timestamp with millisecond resolution, safe for file names.
pub fn timestamp_tag() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// `dir/stem.ext`, or `dir/stem_N.ext` for the first N that does not exist yet.
pub fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{}.{}", stem, extension));
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}.{}", stem, n, extension));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
