use super::{mismatched, passthrough, Filter, FilterParams};
use crate::error::PipelineError;
use crate::utils::{gray_to_bgr, to_gray};
use opencv::core::Mat;
use std::sync::atomic::{AtomicBool, Ordering};

pub const ID: &str = "grayscale";

/// Luma conversion, re-promoted to 3 channels.
pub struct GrayscaleFilter {
    enabled: AtomicBool,
}

impl GrayscaleFilter {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }
}

impl Default for GrayscaleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for GrayscaleFilter {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        "Grayscale"
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
        gray_to_bgr(&to_gray(src)?)
    }

    fn params(&self) -> FilterParams {
        FilterParams::Grayscale
    }

    fn set_params(&self, params: FilterParams) -> Result<(), PipelineError> {
        match params {
            FilterParams::Grayscale => Ok(()),
            other => Err(mismatched(ID, &other)),
        }
    }
}
