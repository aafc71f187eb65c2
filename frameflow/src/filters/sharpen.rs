//! Unsharp-mask sharpening

use super::{mismatched, passthrough, Filter, FilterParams};
use crate::error::PipelineError;
use opencv::core::{self, Mat, Size};
use opencv::imgproc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub const ID: &str = "sharpen";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharpenParams {
    /// Weight of the detail layer, 0 leaves the frame unchanged
    pub strength: f64,
    /// Sigma of the blur used to extract detail
    pub sigma: f64,
}

impl Default for SharpenParams {
    fn default() -> Self {
        Self {
            strength: 1.0,
            sigma: 1.0,
        }
    }
}

pub struct SharpenFilter {
    params: Mutex<SharpenParams>,
    enabled: AtomicBool,
}

impl SharpenFilter {
    pub fn new(params: SharpenParams) -> Self {
        Self {
            params: Mutex::new(params),
            enabled: AtomicBool::new(true),
        }
    }
}

impl Default for SharpenFilter {
    fn default() -> Self {
        Self::new(SharpenParams::default())
    }
}

impl Filter for SharpenFilter {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        "Sharpen"
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
        let strength = p.strength.max(0.0);
        let sigma = if p.sigma > 0.0 { p.sigma } else { 1.0 };

        let mut blurred = Mat::default();
        imgproc::gaussian_blur(
            src,
            &mut blurred,
            Size::new(0, 0),
            sigma,
            sigma,
            core::BORDER_DEFAULT,
        )?;

        let mut dst = Mat::default();
        core::add_weighted(src, 1.0 + strength, &blurred, -strength, 0.0, &mut dst, -1)?;
        Ok(dst)
    }

    fn params(&self) -> FilterParams {
        FilterParams::Sharpen(self.params.lock().clone())
    }

    fn set_params(&self, params: FilterParams) -> Result<(), PipelineError> {
        match params {
            FilterParams::Sharpen(p) => {
                *self.params.lock() = p;
                Ok(())
            }
            other => Err(mismatched(ID, &other)),
        }
    }
}
