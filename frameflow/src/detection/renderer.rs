//! Bounding-box and label overlay

use super::labels::LabelMap;
use super::Detection;
use crate::error::PipelineError;
use opencv::core::{Mat, Point, Rect, Scalar};
use opencv::imgproc;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderStyle {
    pub box_thickness: i32,
    pub font_scale: f64,
    pub font_thickness: i32,
    pub show_label: bool,
    pub show_score: bool,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            box_thickness: 2,
            font_scale: 0.55,
            font_thickness: 1,
            show_label: true,
            show_score: true,
        }
    }
}

impl RenderStyle {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.box_thickness < 1 || self.font_thickness < 1 {
            return Err(PipelineError::Config("Render thickness must be at least 1".to_string()));
        }
        if self.font_scale.is_nan() || self.font_scale <= 0.0 {
            return Err(PipelineError::Config(format!(
                "Font scale must be positive, got {}",
                self.font_scale
            )));
        }
        Ok(())
    }
}

/// Draws detections in place. Holds only its style; the color of a class
/// comes from the [`LabelMap`] passed to each call.
#[derive(Debug, Clone, Default)]
pub struct DetectionRenderer {
    style: RenderStyle,
}

impl DetectionRenderer {
    pub fn new(style: RenderStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// Caption for one detection, or None when both label and score are off.
    pub fn caption(&self, detection: &Detection) -> Option<String> {
        match (self.style.show_label, self.style.show_score) {
            (true, true) => Some(format!("{} {:.2}", detection.label, detection.confidence)),
            (true, false) => Some(detection.label.clone()),
            (false, true) => Some(format!("{:.2}", detection.confidence)),
            (false, false) => None,
        }
    }

    pub fn render(
        &self,
        frame: &mut Mat,
        detections: &[Detection],
        labels: &LabelMap,
    ) -> Result<(), PipelineError> {
        for detection in detections {
            let color = labels.color_of(detection.class_id);
            let rect = to_pixel_rect(detection);
            if rect.width <= 0 || rect.height <= 0 {
                continue;
            }
            imgproc::rectangle(frame, rect, color, self.style.box_thickness, imgproc::LINE_8, 0)?;

            if let Some(text) = self.caption(detection) {
                self.draw_caption(frame, &text, rect, color)?;
            }
        }
        Ok(())
    }

    fn draw_caption(&self, frame: &mut Mat, text: &str, rect: Rect, color: Scalar) -> Result<(), PipelineError> {
        let mut baseline = 0;
        let text_size = imgproc::get_text_size(
            text,
            imgproc::FONT_HERSHEY_SIMPLEX,
            self.style.font_scale,
            self.style.font_thickness,
            &mut baseline,
        )?;
        let label_height = text_size.height + baseline + 4;

        // Above the box unless that would leave the frame
        let top = if rect.y - label_height >= 0 {
            rect.y - label_height
        } else {
            rect.y
        };
        let max_x = (frame.cols() - text_size.width - 4).max(0);
        let left = rect.x.clamp(0, max_x);

        let background = Rect::new(left, top, text_size.width + 4, label_height);
        imgproc::rectangle(frame, background, color, imgproc::FILLED, imgproc::LINE_8, 0)?;
        imgproc::put_text(
            frame,
            text,
            Point::new(left + 2, top + text_size.height + 2),
            imgproc::FONT_HERSHEY_SIMPLEX,
            self.style.font_scale,
            contrast_text_color(color),
            self.style.font_thickness,
            imgproc::LINE_AA,
            false,
        )?;
        Ok(())
    }
}

fn to_pixel_rect(detection: &Detection) -> Rect {
    let b = &detection.bbox;
    Rect::new(
        b.x.round() as i32,
        b.y.round() as i32,
        b.width.round() as i32,
        b.height.round() as i32,
    )
}

/// Black on light backgrounds, white on dark ones.
fn contrast_text_color(background: Scalar) -> Scalar {
    let luma = 0.114 * background[0] + 0.587 * background[1] + 0.299 * background[2];
    if luma > 140.0 {
        Scalar::new(0.0, 0.0, 0.0, 0.0)
    } else {
        Scalar::new(255.0, 255.0, 255.0, 0.0)
    }
}
