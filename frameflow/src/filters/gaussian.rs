//! Gaussian blur

use super::{mismatched, passthrough, Filter, FilterParams};
use crate::error::PipelineError;
use crate::utils::normalize_kernel_size;
use opencv::core::{self, Mat, Size};
use opencv::imgproc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub const ID: &str = "gaussian";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianParams {
    /// Normalized to odd and >= 1 before use
    pub kernel_size: i32,
    /// 0 derives sigma from the kernel size
    pub sigma_x: f64,
    /// 0 means "same as sigma_x"
    pub sigma_y: f64,
}

impl Default for GaussianParams {
    fn default() -> Self {
        Self {
            kernel_size: 5,
            sigma_x: 1.0,
            sigma_y: 0.0,
        }
    }
}

pub struct GaussianFilter {
    params: Mutex<GaussianParams>,
    enabled: AtomicBool,
}

impl GaussianFilter {
    pub fn new(params: GaussianParams) -> Self {
        Self {
            params: Mutex::new(params),
            enabled: AtomicBool::new(true),
        }
    }

    /// Kernel size actually handed to OpenCV.
    pub fn effective_kernel_size(&self) -> i32 {
        normalize_kernel_size(self.params.lock().kernel_size)
    }
}

impl Default for GaussianFilter {
    fn default() -> Self {
        Self::new(GaussianParams::default())
    }
}

impl Filter for GaussianFilter {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        "Gaussian Blur"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn apply(&self, src: &Mat) -> Result<Mat, PipelineError> {
        if !self.is_enabled() {
            return passthrough(src);
        }

        let p = self.params.lock().clone();
        let k = normalize_kernel_size(p.kernel_size);

        let mut dst = Mat::default();
        imgproc::gaussian_blur(
            src,
            &mut dst,
            Size::new(k, k),
            p.sigma_x.max(0.0),
            p.sigma_y.max(0.0),
            core::BORDER_DEFAULT,
        )?;
        Ok(dst)
    }

    fn params(&self) -> FilterParams {
        FilterParams::Gaussian(self.params.lock().clone())
    }

    fn set_params(&self, params: FilterParams) -> Result<(), PipelineError> {
        match params {
            FilterParams::Gaussian(p) => {
                *self.params.lock() = p;
                Ok(())
            }
            other => Err(mismatched(ID, &other)),
        }
    }
}
