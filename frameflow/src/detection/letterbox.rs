//! Aspect-preserving resize to the network input, and the inverse mapping

use crate::error::PipelineError;
use opencv::core::{self, Mat, Rect2f, Scalar, Size};
use opencv::imgproc;
use opencv::prelude::*;

/// Padding color used by YOLO-family exporters.
pub const PAD_VALUE: f64 = 114.0;

/// Geometry of one letterbox operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    /// Size of the resized content inside the padded input
    pub scaled: Size,
    /// Size of the frame before letterboxing
    pub original: Size,
}

impl Letterbox {
    pub fn compute(original: Size, input: Size) -> Self {
        let scale = f32::min(
            input.width as f32 / original.width.max(1) as f32,
            input.height as f32 / original.height.max(1) as f32,
        );
        let scaled = Size::new(
            ((original.width as f32 * scale).round() as i32).clamp(1, input.width.max(1)),
            ((original.height as f32 * scale).round() as i32).clamp(1, input.height.max(1)),
        );
        Self {
            scale,
            pad_x: ((input.width - scaled.width) / 2) as f32,
            pad_y: ((input.height - scaled.height) / 2) as f32,
            scaled,
            original,
        }
    }

    /// Map a box from network-input coordinates back onto the original
    /// frame, clipped to its bounds.
    pub fn to_original(&self, rect: Rect2f) -> Rect2f {
        let w = self.original.width as f32;
        let h = self.original.height as f32;
        let scale = if self.scale > 0.0 { self.scale } else { 1.0 };

        let x1 = ((rect.x - self.pad_x) / scale).clamp(0.0, w);
        let y1 = ((rect.y - self.pad_y) / scale).clamp(0.0, h);
        let x2 = ((rect.x + rect.width - self.pad_x) / scale).clamp(0.0, w);
        let y2 = ((rect.y + rect.height - self.pad_y) / scale).clamp(0.0, h);

        Rect2f::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }
}

/// Resize `frame` into `input`, padding the remainder with [`PAD_VALUE`].
pub fn letterbox(frame: &Mat, input: Size) -> Result<(Mat, Letterbox), PipelineError> {
    if frame.cols() <= 0 || frame.rows() <= 0 {
        return Err(PipelineError::Processing("Cannot letterbox an empty frame".to_string()));
    }
    let geometry = Letterbox::compute(Size::new(frame.cols(), frame.rows()), input);

    let mut resized = Mat::default();
    imgproc::resize(frame, &mut resized, geometry.scaled, 0.0, 0.0, imgproc::INTER_LINEAR)?;

    let left = geometry.pad_x as i32;
    let top = geometry.pad_y as i32;
    let right = input.width - geometry.scaled.width - left;
    let bottom = input.height - geometry.scaled.height - top;

    let mut padded = Mat::default();
    core::copy_make_border(
        &resized,
        &mut padded,
        top,
        bottom,
        left,
        right,
        core::BORDER_CONSTANT,
        Scalar::all(PAD_VALUE),
    )?;

    Ok((padded, geometry))
}
