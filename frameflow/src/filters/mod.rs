//! Image filters and the ordered chain that applies them.
//!
//! Every filter owns its parameters behind its own lock, so a parameter
//! update from a control thread never waits on an unrelated filter.

pub mod canny;
pub mod chain;
pub mod gaussian;
pub mod grayscale;
pub mod histeq;
pub mod sharpen;
pub mod threshold;

pub use canny::{CannyFilter, CannyParams};
pub use chain::FilterChain;
pub use gaussian::{GaussianFilter, GaussianParams};
pub use grayscale::GrayscaleFilter;
pub use histeq::{HistEqFilter, HistEqParams};
pub use sharpen::{SharpenFilter, SharpenParams};
pub use threshold::{AdaptiveMethod, ThresholdFilter, ThresholdMode, ThresholdParams};

use crate::error::PipelineError;
use opencv::core::Mat;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single frame-to-frame transform.
pub trait Filter: Send + Sync {
    /// Stable identifier used for lookup and removal.
    fn id(&self) -> &str;

    /// Human readable name.
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Apply the filter. A disabled filter returns a copy of `src`.
    fn apply(&self, src: &Mat) -> Result<Mat, PipelineError>;

    /// Snapshot of the current parameters.
    fn params(&self) -> FilterParams;

    /// Replace the parameters. Fails when the variant belongs to another filter.
    fn set_params(&self, params: FilterParams) -> Result<(), PipelineError>;
}

/// Parameters of every filter kind, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterParams {
    Gaussian(GaussianParams),
    Canny(CannyParams),
    Threshold(ThresholdParams),
    #[serde(rename = "histeq")]
    HistEq(HistEqParams),
    Sharpen(SharpenParams),
    Grayscale,
}

impl FilterParams {
    /// Identifier of the filter these parameters belong to.
    pub fn filter_id(&self) -> &'static str {
        match self {
            FilterParams::Gaussian(_) => gaussian::ID,
            FilterParams::Canny(_) => canny::ID,
            FilterParams::Threshold(_) => threshold::ID,
            FilterParams::HistEq(_) => histeq::ID,
            FilterParams::Sharpen(_) => sharpen::ID,
            FilterParams::Grayscale => grayscale::ID,
        }
    }

    /// Build a filter initialized with these parameters.
    pub fn build(&self, enabled: bool) -> Arc<dyn Filter> {
        let filter: Arc<dyn Filter> = match self {
            FilterParams::Gaussian(p) => Arc::new(GaussianFilter::new(p.clone())),
            FilterParams::Canny(p) => Arc::new(CannyFilter::new(p.clone())),
            FilterParams::Threshold(p) => Arc::new(ThresholdFilter::new(p.clone())),
            FilterParams::HistEq(p) => Arc::new(HistEqFilter::new(p.clone())),
            FilterParams::Sharpen(p) => Arc::new(SharpenFilter::new(p.clone())),
            FilterParams::Grayscale => Arc::new(GrayscaleFilter::new()),
        };
        filter.set_enabled(enabled);
        filter
    }
}

/// One configured filter in chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEntry {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub params: FilterParams,
}

fn default_enabled() -> bool {
    true
}

/// Every filter kind with default parameters, disabled.
pub fn default_entries() -> Vec<FilterEntry> {
    vec![
        FilterParams::Gaussian(GaussianParams::default()),
        FilterParams::Sharpen(SharpenParams::default()),
        FilterParams::HistEq(HistEqParams::default()),
        FilterParams::Canny(CannyParams::default()),
        FilterParams::Threshold(ThresholdParams::default()),
        FilterParams::Grayscale,
    ]
    .into_iter()
    .map(|params| FilterEntry { enabled: false, params })
    .collect()
}

pub(crate) fn passthrough(src: &Mat) -> Result<Mat, PipelineError> {
    Ok(src.try_clone()?)
}

pub(crate) fn mismatched(expected: &str, got: &FilterParams) -> PipelineError {
    PipelineError::Config(format!(
        "Parameters for '{}' cannot be applied to filter '{}'",
        got.filter_id(),
        expected
    ))
}
