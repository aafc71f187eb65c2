//! Frame sources: the capability the frame loop pulls from, and an OpenCV
//! capture implementation for cameras and video files.

use crate::error::PipelineError;
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH, CAP_PROP_POS_MSEC,
    },
};
use std::path::PathBuf;
use tracing::{info, warn};

/// Anything that yields frames one at a time.
///
/// The seek-related methods default to a non-seekable source: `seek` fails,
/// positions and durations read as zero.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), PipelineError>;

    /// Next frame, or `Ok(None)` at end of stream.
    fn read(&mut self) -> Result<Option<Mat>, PipelineError>;

    fn close(&mut self);
    fn is_opened(&self) -> bool;
    fn width(&self) -> i32;
    fn height(&self) -> i32;
    /// Nominal frame rate; 0 when unknown.
    fn fps(&self) -> f64;
    fn description(&self) -> String;

    fn pause(&mut self) {}
    fn resume(&mut self) {}

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _position_ms: f64) -> bool {
        false
    }

    fn pos_msec(&self) -> f64 {
        0.0
    }

    fn duration_msec(&self) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    Camera(i32),
    File(PathBuf),
}

/// `FrameSource` over OpenCV's `VideoCapture`.
pub struct CaptureSource {
    target: CaptureTarget,
    requested_size: Option<(i32, i32)>,
    capture: Option<VideoCapture>,
}

impl CaptureSource {
    pub fn camera(index: i32) -> Self {
        Self::new(CaptureTarget::Camera(index))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(CaptureTarget::File(path.into()))
    }

    pub fn new(target: CaptureTarget) -> Self {
        Self {
            target,
            requested_size: None,
            capture: None,
        }
    }

    /// Ask a camera for a specific resolution. Ignored for files.
    pub fn with_resolution(mut self, width: i32, height: i32) -> Self {
        self.requested_size = Some((width, height));
        self
    }

    pub fn target(&self) -> &CaptureTarget {
        &self.target
    }

    fn prop(&self, prop: i32) -> f64 {
        self.capture
            .as_ref()
            .and_then(|c| c.get(prop).ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(0.0)
    }
}

impl FrameSource for CaptureSource {
    fn open(&mut self) -> Result<(), PipelineError> {
        self.close();

        let mut capture = match &self.target {
            CaptureTarget::Camera(index) => VideoCapture::new(*index, CAP_ANY)
                .map_err(|e| PipelineError::Source(format!("Failed to open camera {}: {}", index, e)))?,
            CaptureTarget::File(path) => {
                let path_str = path
                    .to_str()
                    .ok_or_else(|| PipelineError::Source(format!("Non UTF-8 video path {:?}", path)))?;
                VideoCapture::from_file(path_str, CAP_ANY)
                    .map_err(|e| PipelineError::Source(format!("Failed to open {:?}: {}", path, e)))?
            }
        };

        if !capture.is_opened()? {
            return Err(PipelineError::Source(format!("{} failed to open", self.description())));
        }

        if let (CaptureTarget::Camera(_), Some((w, h))) = (&self.target, self.requested_size) {
            if w > 0 && h > 0 {
                capture.set(CAP_PROP_FRAME_WIDTH, w as f64)?;
                capture.set(CAP_PROP_FRAME_HEIGHT, h as f64)?;
            } else {
                warn!("Ignoring invalid requested resolution {}x{}", w, h);
            }
        }

        self.capture = Some(capture);
        info!(
            "{} opened at {}x{} @ {:.1}fps",
            self.description(),
            self.width(),
            self.height(),
            self.fps()
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Mat>, PipelineError> {
        let Some(capture) = self.capture.as_mut() else {
            return Ok(None);
        };
        let mut frame = Mat::default();
        let got = capture
            .read(&mut frame)
            .map_err(|e| PipelineError::Source(format!("Failed to read frame: {}", e)))?;
        if !got || frame.cols() <= 0 || frame.rows() <= 0 {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                warn!("Failed to release {}: {}", self.description(), e);
            }
            info!("{} closed", self.description());
        }
    }

    fn is_opened(&self) -> bool {
        self.capture
            .as_ref()
            .and_then(|c| c.is_opened().ok())
            .unwrap_or(false)
    }

    fn width(&self) -> i32 {
        self.prop(CAP_PROP_FRAME_WIDTH) as i32
    }

    fn height(&self) -> i32 {
        self.prop(CAP_PROP_FRAME_HEIGHT) as i32
    }

    fn fps(&self) -> f64 {
        self.prop(CAP_PROP_FPS)
    }

    fn description(&self) -> String {
        match &self.target {
            CaptureTarget::Camera(index) => format!("Camera {}", index),
            CaptureTarget::File(path) => format!("File {}", path.display()),
        }
    }

    fn is_seekable(&self) -> bool {
        matches!(self.target, CaptureTarget::File(_))
    }

    fn seek(&mut self, position_ms: f64) -> bool {
        if !self.is_seekable() || !position_ms.is_finite() {
            return false;
        }
        let target = position_ms.max(0.0);
        self.capture
            .as_mut()
            .and_then(|c| c.set(CAP_PROP_POS_MSEC, target).ok())
            .unwrap_or(false)
    }

    fn pos_msec(&self) -> f64 {
        if self.is_seekable() {
            self.prop(CAP_PROP_POS_MSEC)
        } else {
            0.0
        }
    }

    fn duration_msec(&self) -> f64 {
        if !self.is_seekable() {
            return 0.0;
        }
        let (frames, fps) = (self.prop(CAP_PROP_FRAME_COUNT), self.fps());
        if fps > 0.0 {
            frames / fps * 1000.0
        } else {
            0.0
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.close();
    }
}
