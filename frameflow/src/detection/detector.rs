//! Detector capability and the shared YOLO output decoder

use super::labels::LabelMap;
use super::{Detection, DetectionList};
use crate::error::PipelineError;
use opencv::core::{Mat, Rect2f};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Where inference runs. Changing it requires a model reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeBackend {
    #[default]
    Cpu,
    Cuda,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub input_width: i32,
    pub input_height: i32,
    pub conf_threshold: f32,
    /// IoU above which a same-class box is suppressed
    pub nms_threshold: f32,
    pub backend: ComputeBackend,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            conf_threshold: 0.5,
            nms_threshold: 0.45,
            backend: ComputeBackend::Cpu,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.input_width <= 0 || self.input_height <= 0 {
            return Err(PipelineError::Config(format!(
                "Detector input size must be positive, got {}x{}",
                self.input_width, self.input_height
            )));
        }
        check_threshold("conf_threshold", self.conf_threshold)?;
        check_threshold("nms_threshold", self.nms_threshold)?;
        Ok(())
    }
}

/// Reject thresholds outside [0, 1] (NaN included).
pub fn check_threshold(name: &str, value: f32) -> Result<(), PipelineError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

/// Turns a frame into detections.
///
/// `detect` on an unloaded detector returns an empty list and never touches
/// the model. Implementations serialize inference internally so one instance
/// can be shared across threads.
pub trait Detector: Send + Sync {
    /// Load a model and optional label file. On failure the detector stays
    /// (or becomes) unloaded.
    fn load_model(&self, model_path: &Path, labels_path: Option<&Path>) -> Result<(), PipelineError>;

    fn detect(&self, frame: &Mat) -> Result<DetectionList, PipelineError>;

    fn is_loaded(&self) -> bool;

    fn conf_threshold(&self) -> f32;
    fn set_conf_threshold(&self, value: f32) -> Result<(), PipelineError>;

    fn nms_threshold(&self) -> f32;
    fn set_nms_threshold(&self, value: f32) -> Result<(), PipelineError>;

    /// Wall-clock duration of the most recent inference, in milliseconds.
    fn last_inference_ms(&self) -> f64;

    fn labels(&self) -> Arc<LabelMap>;
}

/// Decode a raw YOLO output tensor into candidate boxes in network-input
/// coordinates. Labels are left empty.
///
/// Two layouts are accepted:
/// * `[1, N, 5 + C]` (v5): `cx, cy, w, h, objectness, class scores...`
/// * `[1, 4 + C, N]` (v8): attribute-major, no objectness
///
/// The longer of the two trailing axes is taken to be the box axis.
pub fn decode_yolo_output(
    dims: &[i64],
    data: &[f32],
    conf_threshold: f32,
) -> Result<DetectionList, PipelineError> {
    let (d1, d2) = match dims {
        [1, a, b] | [a, b] => (*a, *b),
        _ => {
            return Err(PipelineError::Model(format!(
                "Unsupported detector output shape {:?}",
                dims
            )))
        }
    };
    if d1 <= 0 || d2 <= 0 {
        return Ok(Vec::new());
    }
    let (d1, d2) = (d1 as usize, d2 as usize);
    let expected = d1
        .checked_mul(d2)
        .ok_or_else(|| PipelineError::Model("Output tensor size overflow".to_string()))?;
    if data.len() < expected {
        return Err(PipelineError::Model(format!(
            "Output tensor holds {} values, shape {:?} needs {}",
            data.len(),
            dims,
            expected
        )));
    }

    let mut candidates = Vec::new();
    if d1 > d2 {
        // Box-major v5 layout
        let attrs = d2;
        if attrs < 6 {
            return Err(PipelineError::Model(format!("Too few attributes per box: {}", attrs)));
        }
        for row in data[..expected].chunks_exact(attrs) {
            let objectness = row[4];
            let Some((class_id, class_score)) = best_class(row[5..].iter().copied()) else {
                continue;
            };
            let confidence = objectness * class_score;
            if confidence >= conf_threshold {
                candidates.push(candidate(row[0], row[1], row[2], row[3], class_id, confidence));
            }
        }
    } else {
        // Attribute-major v8 layout
        let (attrs, boxes) = (d1, d2);
        if attrs < 5 {
            return Err(PipelineError::Model(format!("Too few attributes per box: {}", attrs)));
        }
        let at = |attr: usize, i: usize| data[attr * boxes + i];
        for i in 0..boxes {
            let Some((class_id, confidence)) = best_class((4..attrs).map(|a| at(a, i))) else {
                continue;
            };
            if confidence >= conf_threshold {
                candidates.push(candidate(at(0, i), at(1, i), at(2, i), at(3, i), class_id, confidence));
            }
        }
    }

    Ok(candidates)
}

fn best_class(scores: impl Iterator<Item = f32>) -> Option<(i32, f32)> {
    scores
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, s)| (i as i32, s))
}

fn candidate(cx: f32, cy: f32, w: f32, h: f32, class_id: i32, confidence: f32) -> Detection {
    Detection::new(
        Rect2f::new(cx - w / 2.0, cy - h / 2.0, w, h),
        class_id,
        confidence.clamp(0.0, 1.0),
        "",
    )
}
