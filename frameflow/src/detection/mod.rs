//! Object detection: model wrapper, post-processing and overlay rendering

pub mod detector;
pub mod labels;
pub mod letterbox;
pub mod nms;
pub mod renderer;
pub mod yolo;

pub use detector::{ComputeBackend, Detector, DetectorConfig};
pub use labels::LabelMap;
pub use letterbox::Letterbox;
pub use renderer::{DetectionRenderer, RenderStyle};
pub use yolo::YoloDetector;

use opencv::core::Rect2f;

/// One inferred object instance in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: Rect2f,
    pub class_id: i32,
    /// In [0, 1]
    pub confidence: f32,
    pub label: String,
}

impl Detection {
    pub fn new(bbox: Rect2f, class_id: i32, confidence: f32, label: impl Into<String>) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
            label: label.into(),
        }
    }
}

/// Detections in the order the detector produced them.
pub type DetectionList = Vec<Detection>;
