//! Persistence: video recording, detection logs and screenshots

pub mod exporter;
pub mod queue;
pub mod recorder;
pub mod screenshot;

pub use exporter::{ExportFormat, FrameRecord, ResultExporter};
pub use queue::DropOldestQueue;
pub use recorder::{
    EncoderFactory, OpenCvEncoder, RecordConfig, RecorderState, RecordingSink, SizeMismatchPolicy,
    VideoEncoder,
};
pub use screenshot::{save_screenshot, save_screenshot_to, screenshot_filename, ImageFormat};
