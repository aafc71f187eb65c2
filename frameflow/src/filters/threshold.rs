//! Binary thresholding: fixed cutoff, adaptive local mean, or Otsu

use super::{mismatched, passthrough, Filter, FilterParams};
use crate::error::PipelineError;
use crate::utils::{gray_to_bgr, normalize_block_size, to_gray};
use opencv::core::Mat;
use opencv::imgproc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub const ID: &str = "threshold";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    Fixed,
    Adaptive,
    Otsu,
}

/// How the adaptive local mean is weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveMethod {
    Mean,
    Gaussian,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdParams {
    pub mode: ThresholdMode,
    /// Cutoff for `Fixed`
    pub value: f64,
    /// Neighborhood for `Adaptive`, normalized to odd and >= 3
    pub block_size: i32,
    /// Constant subtracted from the local mean
    pub c: f64,
    pub adaptive_method: AdaptiveMethod,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            mode: ThresholdMode::Fixed,
            value: 127.0,
            block_size: 11,
            c: 2.0,
            adaptive_method: AdaptiveMethod::Gaussian,
        }
    }
}

pub struct ThresholdFilter {
    params: Mutex<ThresholdParams>,
    enabled: AtomicBool,
}

impl ThresholdFilter {
    pub fn new(params: ThresholdParams) -> Self {
        Self {
            params: Mutex::new(params),
            enabled: AtomicBool::new(true),
        }
    }
}

impl Default for ThresholdFilter {
    fn default() -> Self {
        Self::new(ThresholdParams::default())
    }
}

impl Filter for ThresholdFilter {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        "Threshold"
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
        let mut thresh = Mat::default();

        match p.mode {
            ThresholdMode::Fixed => {
                imgproc::threshold(&gray, &mut thresh, p.value, 255.0, imgproc::THRESH_BINARY)?;
            }
            ThresholdMode::Adaptive => {
                let method = match p.adaptive_method {
                    AdaptiveMethod::Mean => imgproc::ADAPTIVE_THRESH_MEAN_C,
                    AdaptiveMethod::Gaussian => imgproc::ADAPTIVE_THRESH_GAUSSIAN_C,
                };
                imgproc::adaptive_threshold(
                    &gray,
                    &mut thresh,
                    255.0,
                    method,
                    imgproc::THRESH_BINARY,
                    normalize_block_size(p.block_size),
                    p.c,
                )?;
            }
            ThresholdMode::Otsu => {
                imgproc::threshold(
                    &gray,
                    &mut thresh,
                    0.0,
                    255.0,
                    imgproc::THRESH_BINARY | imgproc::THRESH_OTSU,
                )?;
            }
        }

        gray_to_bgr(&thresh)
    }

    fn params(&self) -> FilterParams {
        FilterParams::Threshold(self.params.lock().clone())
    }

    fn set_params(&self, params: FilterParams) -> Result<(), PipelineError> {
        match params {
            FilterParams::Threshold(p) => {
                *self.params.lock() = p;
                Ok(())
            }
            other => Err(mismatched(ID, &other)),
        }
    }
}
