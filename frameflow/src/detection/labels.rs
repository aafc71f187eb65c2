//! Class names and per-class overlay colors

use crate::error::PipelineError;
use opencv::core::Scalar;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// COCO class names (80 classes)
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

pub const UNKNOWN_LABEL: &str = "unknown";

/// Ordered class names plus a lazily filled color cache.
#[derive(Debug)]
pub struct LabelMap {
    names: Vec<String>,
    colors: Mutex<HashMap<i32, Scalar>>,
}

impl LabelMap {
    pub fn from_names(names: Vec<String>) -> Self {
        Self {
            names,
            colors: Mutex::new(HashMap::new()),
        }
    }

    /// The built-in 80-class COCO set.
    pub fn coco80() -> Self {
        Self::from_names(COCO_CLASSES.iter().map(|s| s.to_string()).collect())
    }

    /// One class name per line. Blank lines are skipped.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read label file {:?}: {}", path, e))
        })?;
        let map = Self::parse(&text)?;
        info!("Loaded {} labels from {:?}", map.len(), path);
        Ok(map)
    }

    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        let names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(PipelineError::Config("Label file contains no class names".to_string()));
        }
        Ok(Self::from_names(names))
    }

    /// Name for `class_id`, or "unknown" when out of range.
    pub fn name_of(&self, class_id: i32) -> &str {
        usize::try_from(class_id)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Stable BGR color for `class_id`.
    pub fn color_of(&self, class_id: i32) -> Scalar {
        let Ok(index) = usize::try_from(class_id) else {
            return Scalar::new(128.0, 128.0, 128.0, 0.0);
        };
        // One entry per distinct id seen
        *self
            .colors
            .lock()
            .entry(class_id)
            .or_insert_with(|| class_color(index))
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::coco80()
    }
}

/// Golden-ratio walk around the hue circle, full saturation, bright value.
fn class_color(index: usize) -> Scalar {
    const GOLDEN: f64 = 0.618_033_988_749_895;
    let hue = (index as f64 * GOLDEN).fract() * 6.0;
    let (s, v) = (0.85, 235.0);
    let sector = hue.floor();
    let f = hue - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as i32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Scalar::new(b.round(), g.round(), r.round(), 0.0)
}
