//! frameflow: real-time frame processing
//!
//! Pulls frames from a source, runs them through a configurable filter
//! chain, optionally detects objects with a YOLO model every Nth frame,
//! draws overlays and fans the result out to subscribers, a background
//! video recorder and a detection log.

pub mod config;
pub mod detection;
pub mod error;
pub mod export;
pub mod filters;
pub mod pipeline;
pub mod source;
pub mod utils;

pub use config::{ExportConfig, FrameLoopConfig, PipelineConfig, RecordSource, ScreenshotConfig};
pub use detection::{Detection, DetectionList, Detector, DetectorConfig, LabelMap, YoloDetector};
pub use error::PipelineError;
pub use export::{ExportFormat, ImageFormat, RecordConfig, RecordingSink, ResultExporter};
pub use filters::{Filter, FilterChain, FilterParams};
pub use pipeline::{FrameLoop, PipelineEvent, TickOutcome};
pub use source::{CaptureSource, FrameSource};
