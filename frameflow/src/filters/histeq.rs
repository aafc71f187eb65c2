//! Histogram equalization on the luma channel

use super::{mismatched, passthrough, Filter, FilterParams};
use crate::error::PipelineError;
use opencv::core::{self, Mat, Size, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

pub const ID: &str = "histeq";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistEqParams {
    pub use_clahe: bool,
    pub clip_limit: f64,
    pub tile_grid_width: i32,
    pub tile_grid_height: i32,
}

impl Default for HistEqParams {
    fn default() -> Self {
        Self {
            use_clahe: true,
            clip_limit: 2.0,
            tile_grid_width: 8,
            tile_grid_height: 8,
        }
    }
}

pub struct HistEqFilter {
    params: Mutex<HistEqParams>,
    enabled: AtomicBool,
}

impl HistEqFilter {
    pub fn new(params: HistEqParams) -> Self {
        Self {
            params: Mutex::new(params),
            enabled: AtomicBool::new(true),
        }
    }

    fn equalize_luma(p: &HistEqParams, luma: &Mat) -> Result<Mat, PipelineError> {
        let mut out = Mat::default();
        if p.use_clahe {
            let grid = Size::new(p.tile_grid_width.max(1), p.tile_grid_height.max(1));
            let mut clahe = imgproc::create_clahe(p.clip_limit.max(0.0), grid)?;
            clahe.apply(luma, &mut out)?;
        } else {
            imgproc::equalize_hist(luma, &mut out)?;
        }
        Ok(out)
    }
}

impl Default for HistEqFilter {
    fn default() -> Self {
        Self::new(HistEqParams::default())
    }
}

impl Filter for HistEqFilter {
    fn id(&self) -> &str {
        ID
    }

    fn name(&self) -> &str {
        "Histogram Equalization"
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
        if src.channels() != 3 {
            return Err(PipelineError::Processing(format!(
                "Histogram equalization expects 3 channels, got {}",
                src.channels()
            )));
        }

        let p = self.params.lock().clone();

        let mut ycrcb = Mat::default();
        imgproc::cvt_color(src, &mut ycrcb, imgproc::COLOR_BGR2YCrCb, 0)?;

        let mut channels = Vector::<Mat>::new();
        core::split(&ycrcb, &mut channels)?;
        let luma = channels.get(0)?;
        channels.set(0, Self::equalize_luma(&p, &luma)?)?;

        let mut merged = Mat::default();
        core::merge(&channels, &mut merged)?;

        let mut bgr = Mat::default();
        imgproc::cvt_color(&merged, &mut bgr, imgproc::COLOR_YCrCb2BGR, 0)?;
        Ok(bgr)
    }

    fn params(&self) -> FilterParams {
        FilterParams::HistEq(self.params.lock().clone())
    }

    fn set_params(&self, params: FilterParams) -> Result<(), PipelineError> {
        match params {
            FilterParams::HistEq(p) => {
                *self.params.lock() = p;
                Ok(())
            }
            other => Err(mismatched(ID, &other)),
        }
    }
}
