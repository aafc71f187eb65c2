//! Outbound notifications from the frame loop

use crate::detection::DetectionList;
use opencv::core::Mat;
use std::fmt;
use std::path::PathBuf;

pub enum PipelineEvent {
    /// One processed tick: the raw source frame, the filtered frame with
    /// overlays, and the detections drawn on it.
    FrameReady {
        original: Mat,
        processed: Mat,
        detections: DetectionList,
    },
    FpsUpdated(f64),
    ResolutionChanged { width: i32, height: i32 },
    DurationMsec(f64),
    PositionMsec(f64),
    SourceOpened(String),
    SourceClosed,
    SourceError(String),
    RecordingStateChanged(bool),
    RecordingSaved(PathBuf),
    /// The encoder could not be opened; the session was stopped without a file.
    RecordingFailed(String),
    ScreenshotSaved(PathBuf),
    ExportStateChanged(bool),
    ModelLoaded { success: bool, message: String },
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::FrameReady { .. } => "frame_ready",
            PipelineEvent::FpsUpdated(_) => "fps_updated",
            PipelineEvent::ResolutionChanged { .. } => "resolution_changed",
            PipelineEvent::DurationMsec(_) => "duration_msec",
            PipelineEvent::PositionMsec(_) => "position_msec",
            PipelineEvent::SourceOpened(_) => "source_opened",
            PipelineEvent::SourceClosed => "source_closed",
            PipelineEvent::SourceError(_) => "source_error",
            PipelineEvent::RecordingStateChanged(_) => "recording_state_changed",
            PipelineEvent::RecordingSaved(_) => "recording_saved",
            PipelineEvent::RecordingFailed(_) => "recording_failed",
            PipelineEvent::ScreenshotSaved(_) => "screenshot_saved",
            PipelineEvent::ExportStateChanged(_) => "export_state_changed",
            PipelineEvent::ModelLoaded { .. } => "model_loaded",
        }
    }
}

impl fmt::Debug for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::FrameReady { detections, .. } => f
                .debug_struct("FrameReady")
                .field("detections", &detections.len())
                .finish_non_exhaustive(),
            PipelineEvent::FpsUpdated(v) => write!(f, "FpsUpdated({:.1})", v),
            PipelineEvent::ResolutionChanged { width, height } => {
                write!(f, "ResolutionChanged({}x{})", width, height)
            }
            PipelineEvent::DurationMsec(v) => write!(f, "DurationMsec({})", v),
            PipelineEvent::PositionMsec(v) => write!(f, "PositionMsec({})", v),
            PipelineEvent::SourceOpened(d) => write!(f, "SourceOpened({})", d),
            PipelineEvent::SourceClosed => write!(f, "SourceClosed"),
            PipelineEvent::SourceError(e) => write!(f, "SourceError({})", e),
            PipelineEvent::RecordingStateChanged(on) => write!(f, "RecordingStateChanged({})", on),
            PipelineEvent::RecordingSaved(p) => write!(f, "RecordingSaved({:?})", p),
            PipelineEvent::ScreenshotSaved(p) => write!(f, "ScreenshotSaved({:?})", p),
            PipelineEvent::ExportStateChanged(on) => write!(f, "ExportStateChanged({})", on),
            PipelineEvent::ModelLoaded { success, message } => {
                write!(f, "ModelLoaded({}, {})", success, message)
            }
        }
    }
}
