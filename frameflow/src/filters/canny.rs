//! Canny edge detection

use super::{mismatched, passthrough, Filter, FilterParams};
use crate::error::PipelineError;
use crate::utils::{gray_to_bgr, to_gray};
use opencv::core::Mat;
use opencv::imgproc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub const ID: &str = "canny";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CannyParams {
    pub threshold1: f64,
    pub threshold2: f64,
    /// Sobel aperture, one of 3, 5, 7
    pub aperture_size: i32,
    pub l2_gradient: bool,
}

impl Default for CannyParams {
    fn default() -> Self {
        Self {
            threshold1: 50.0,
            threshold2: 150.0,
            aperture_size: 3,
            l2_gradient: false,
        }
    }
}

/// OpenCV only accepts Sobel apertures of 3, 5 or 7.
pub fn normalize_aperture(aperture: i32) -> i32 {
    let odd = if aperture % 2 == 0 { aperture + 1 } else { aperture };
    odd.clamp(3, 7)
}

pub struct CannyFilter {
    params: Mutex<CannyParams>,
    enabled: AtomicBool,
}

impl CannyFilter {
    pub fn new(params: CannyParams) -> Self {
        Self {
            params: Mutex::new(params),
            enabled: AtomicBool::new(true),
        }
    }
}

impl Default for CannyFilter {
    fn default() -> Self {
        Self::new(CannyParams::default())
    }
}

impl Filter for CannyFilter {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        "Canny Edges"
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

        let gray = to_gray(src)?;
        let mut edges = Mat::default();
        imgproc::canny(
            &gray,
            &mut edges,
            p.threshold1,
            p.threshold2,
            normalize_aperture(p.aperture_size),
            p.l2_gradient,
        )?;
        gray_to_bgr(&edges)
    }

    fn params(&self) -> FilterParams {
        FilterParams::Canny(self.params.lock().clone())
    }

    fn set_params(&self, params: FilterParams) -> Result<(), PipelineError> {
        match params {
            FilterParams::Canny(p) => {
                *self.params.lock() = p;
                Ok(())
            }
            other => Err(mismatched(ID, &other)),
        }
    }
}
