//! Asynchronous video recording with drop-oldest backpressure

use super::queue::DropOldestQueue;
use crate::error::PipelineError;
use crate::utils::{timestamp_tag, unique_path};
use opencv::core::{Mat, Size};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// What to do with a frame whose size differs from the session's first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMismatchPolicy {
    #[default]
    Resize,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub output_dir: PathBuf,
    pub prefix: String,
    /// Four-character codec tag, e.g. "mp4v" or "MJPG"
    pub fourcc: String,
    pub extension: String,
    pub fps: f64,
    pub max_queue_size: usize,
    pub size_mismatch: SizeMismatchPolicy,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs::video_dir()
                .map(|d| d.join("frameflow"))
                .unwrap_or_else(|| PathBuf::from("recordings")),
            prefix: "record".to_string(),
            fourcc: "mp4v".to_string(),
            extension: "mp4".to_string(),
            fps: 30.0,
            max_queue_size: 8,
            size_mismatch: SizeMismatchPolicy::Resize,
        }
    }
}

impl RecordConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(PipelineError::Config(format!("Recording fps must be positive, got {}", self.fps)));
        }
        if self.max_queue_size == 0 {
            return Err(PipelineError::Config("Recording queue size must be at least 1".to_string()));
        }
        if self.prefix.is_empty() || self.extension.is_empty() {
            return Err(PipelineError::Config("Recording prefix and extension must not be empty".to_string()));
        }
        fourcc_chars(&self.fourcc)?;
        Ok(())
    }
}

fn fourcc_chars(tag: &str) -> Result<[char; 4], PipelineError> {
    let chars: Vec<char> = tag.chars().collect();
    match chars.as_slice() {
        [a, b, c, d] if chars.iter().all(char::is_ascii) => Ok([*a, *b, *c, *d]),
        _ => Err(PipelineError::Config(format!("Invalid fourcc codec tag '{}'", tag))),
    }
}

/// Sink for encoded frames, owned exclusively by the recorder's worker thread.
pub trait VideoEncoder: Send {
    fn open(&mut self, path: &Path, fourcc: &str, fps: f64, size: Size) -> Result<(), PipelineError>;
    fn write(&mut self, frame: &Mat) -> Result<(), PipelineError>;
    fn release(&mut self) -> Result<(), PipelineError>;
}

pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn VideoEncoder> + Send + Sync>;

/// [`VideoEncoder`] over OpenCV's `VideoWriter`.
#[derive(Default)]
pub struct OpenCvEncoder {
    writer: Option<VideoWriter>,
}

impl VideoEncoder for OpenCvEncoder {
    fn open(&mut self, path: &Path, fourcc: &str, fps: f64, size: Size) -> Result<(), PipelineError> {
        let [a, b, c, d] = fourcc_chars(fourcc)?;
        let code = VideoWriter::fourcc(a, b, c, d)?;
        let path_str = path
            .to_str()
            .ok_or_else(|| PipelineError::Persistence(format!("Non UTF-8 output path {:?}", path)))?;
        let writer = VideoWriter::new(path_str, code, fps, size, true)?;
        if !writer.is_opened()? {
            return Err(PipelineError::Persistence(format!(
                "Failed to open video writer for {:?} ({})",
                path, fourcc
            )));
        }
        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, frame: &Mat) -> Result<(), PipelineError> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer.write(frame)?),
            None => Err(PipelineError::Persistence("Video writer is not open".to_string())),
        }
    }

    fn release(&mut self) -> Result<(), PipelineError> {
        if let Some(mut writer) = self.writer.take() {
            writer.release()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Stopping,
    Stopped,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    encoded: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicBool,
    /// Open error not yet taken by the caller
    failure: Mutex<Option<String>>,
}

impl Counters {
    fn reset(&self) {
        for c in [&self.accepted, &self.dropped, &self.encoded, &self.rejected] {
            c.store(0, Ordering::Release);
        }
        self.failed.store(false, Ordering::Release);
        *self.failure.lock() = None;
    }

    fn fail(&self, message: String) {
        *self.failure.lock() = Some(message);
        self.failed.store(true, Ordering::Release);
    }
}

struct ActiveSession {
    queue: Arc<DropOldestQueue<Mat>>,
    worker: JoinHandle<bool>,
    path: PathBuf,
}

struct SinkInner {
    state: RecorderState,
    session: Option<ActiveSession>,
    last_path: Option<PathBuf>,
}

/// Records frames to one video file per session.
///
/// `write_frame` never blocks: frames go onto a bounded queue and the oldest
/// pending frame is evicted when it is full. A dedicated worker thread owns
/// the encoder and drains the queue in FIFO order.
pub struct RecordingSink {
    config: Mutex<RecordConfig>,
    inner: Mutex<SinkInner>,
    counters: Arc<Counters>,
    encoder_factory: EncoderFactory,
}

impl RecordingSink {
    pub fn new(config: RecordConfig) -> Result<Self, PipelineError> {
        Self::with_encoder(config, Arc::new(|| Box::new(OpenCvEncoder::default()) as Box<dyn VideoEncoder>))
    }

    pub fn with_encoder(config: RecordConfig, encoder_factory: EncoderFactory) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config: Mutex::new(config),
            inner: Mutex::new(SinkInner {
                state: RecorderState::Idle,
                session: None,
                last_path: None,
            }),
            counters: Arc::new(Counters::default()),
            encoder_factory,
        })
    }

    pub fn config(&self) -> RecordConfig {
        self.config.lock().clone()
    }

    /// Takes effect on the next `start`.
    pub fn set_output_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        info!("Recording output directory set to {:?}", dir);
        self.config.lock().output_dir = dir;
    }

    /// Begin a session and return the path the video will be written to.
    pub fn start(&self) -> Result<PathBuf, PipelineError> {
        let mut inner = self.inner.lock();
        match inner.state {
            RecorderState::Recording => {
                return Err(PipelineError::Config("Recording already in progress".to_string()))
            }
            RecorderState::Stopping => {
                return Err(PipelineError::Config("Previous recording is still finishing".to_string()))
            }
            RecorderState::Idle | RecorderState::Stopped => {}
        }

        let config = self.config();
        std::fs::create_dir_all(&config.output_dir).map_err(|e| {
            PipelineError::Persistence(format!(
                "Cannot create recording directory {:?}: {}",
                config.output_dir, e
            ))
        })?;
        let stem = format!("{}_{}", config.prefix, timestamp_tag());
        let path = unique_path(&config.output_dir, &stem, &config.extension);

        self.counters.reset();
        let queue = Arc::new(DropOldestQueue::new(config.max_queue_size));
        let encoder = (self.encoder_factory)();
        let worker = {
            let queue = Arc::clone(&queue);
            let counters = Arc::clone(&self.counters);
            let path = path.clone();
            thread::Builder::new()
                .name("frameflow-recorder".to_string())
                .spawn(move || encode_loop(queue, encoder, &path, &config, &counters))?
        };

        info!("Recording started: {:?}", path);
        inner.state = RecorderState::Recording;
        inner.last_path = Some(path.clone());
        inner.session = Some(ActiveSession {
            queue,
            worker,
            path: path.clone(),
        });
        Ok(path)
    }

    /// Queue a copy of `frame`. Ignored unless recording.
    pub fn write_frame(&self, frame: &Mat) -> Result<(), PipelineError> {
        let queue = match self.inner.lock().session.as_ref() {
            Some(session) => Arc::clone(&session.queue),
            None => return Ok(()),
        };

        let copy = frame.try_clone()?;
        match queue.push(copy) {
            Ok(evicted) => {
                self.counters.accepted.fetch_add(1, Ordering::AcqRel);
                if evicted.is_some() {
                    let dropped = self.counters.dropped.fetch_add(1, Ordering::AcqRel) + 1;
                    debug!("Recording queue full, dropped oldest frame ({} total)", dropped);
                }
            }
            Err(_) => debug!("Frame arrived after recording stopped"),
        }
        Ok(())
    }

    /// Drain the queue, finalize the file and join the worker. Returns the
    /// file path, or None if no session was running, nothing was written or
    /// the encoder failed to open.
    pub fn stop(&self) -> Option<PathBuf> {
        let session = {
            let mut inner = self.inner.lock();
            if inner.state != RecorderState::Recording {
                return None;
            }
            inner.state = RecorderState::Stopping;
            inner.session.take()
        }?;

        session.queue.close();
        let wrote_file = match session.worker.join() {
            Ok(opened) => opened,
            Err(_) => {
                error!("Recording worker panicked");
                false
            }
        };

        self.inner.lock().state = RecorderState::Stopped;
        if self.has_failed() {
            warn!(
                "Recording {:?} failed, {} frames discarded",
                session.path,
                self.rejected_frames()
            );
            return None;
        }
        info!(
            "Recording stopped: {:?} ({} frames encoded, {} dropped, {} rejected)",
            session.path,
            self.encoded_frames(),
            self.dropped_frames(),
            self.rejected_frames()
        );
        wrote_file.then_some(session.path)
    }

    pub fn state(&self) -> RecorderState {
        self.inner.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Path of the current or most recent session.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.inner.lock().last_path.clone()
    }

    /// Frames accepted this session and not evicted.
    pub fn frame_count(&self) -> u64 {
        let accepted = self.counters.accepted.load(Ordering::Acquire);
        accepted.saturating_sub(self.dropped_frames())
    }

    /// Estimated from `frame_count` and the configured fps.
    pub fn duration_sec(&self) -> f64 {
        self.frame_count() as f64 / self.config.lock().fps
    }

    pub fn dropped_frames(&self) -> u64 {
        self.counters.dropped.load(Ordering::Acquire)
    }

    pub fn encoded_frames(&self) -> u64 {
        self.counters.encoded.load(Ordering::Acquire)
    }

    pub fn rejected_frames(&self) -> u64 {
        self.counters.rejected.load(Ordering::Acquire)
    }

    /// True once the current or most recent session could not open its encoder.
    pub fn has_failed(&self) -> bool {
        self.counters.failed.load(Ordering::Acquire)
    }

    /// The session's failure message, handed out once.
    pub fn take_failure(&self) -> Option<String> {
        self.counters.failure.lock().take()
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker body. Returns true if the encoder was opened.
fn encode_loop(
    queue: Arc<DropOldestQueue<Mat>>,
    mut encoder: Box<dyn VideoEncoder>,
    path: &Path,
    config: &RecordConfig,
    counters: &Counters,
) -> bool {
    let mut frame_size: Option<Size> = None;
    let mut failed = false;

    while let Some(frame) = queue.pop_blocking() {
        if failed {
            counters.rejected.fetch_add(1, Ordering::AcqRel);
            continue;
        }
        let size = match frame.size() {
            Ok(size) => size,
            Err(e) => {
                warn!("Skipping unreadable frame: {}", e);
                counters.rejected.fetch_add(1, Ordering::AcqRel);
                continue;
            }
        };

        let expected = match frame_size {
            Some(expected) => expected,
            None => match encoder.open(path, &config.fourcc, config.fps, size) {
                Ok(()) => {
                    debug!("Encoder opened at {}x{}", size.width, size.height);
                    frame_size = Some(size);
                    size
                }
                Err(e) => {
                    let message = format!("Failed to open recording {:?}: {}", path, e);
                    error!("{}", message);
                    counters.fail(message);
                    counters.rejected.fetch_add(1, Ordering::AcqRel);
                    failed = true;
                    continue;
                }
            },
        };

        let result = if size == expected {
            encoder.write(&frame)
        } else {
            match config.size_mismatch {
                SizeMismatchPolicy::Reject => {
                    counters.rejected.fetch_add(1, Ordering::AcqRel);
                    continue;
                }
                SizeMismatchPolicy::Resize => resize_to(&frame, expected).and_then(|f| encoder.write(&f)),
            }
        };

        match result {
            Ok(()) => {
                counters.encoded.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => {
                warn!("Failed to encode frame: {}", e);
                counters.rejected.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    if frame_size.is_some() {
        if let Err(e) = encoder.release() {
            error!("Failed to finalize recording {:?}: {}", path, e);
        }
    }
    frame_size.is_some()
}

fn resize_to(frame: &Mat, size: Size) -> Result<Mat, PipelineError> {
    let mut resized = Mat::default();
    imgproc::resize(frame, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
    Ok(resized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RecordConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_fourcc_rejected() {
        let config = RecordConfig {
            fourcc: "h264x".to_string(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config());
        assert_eq!(fourcc_chars("MJPG").unwrap(), ['M', 'J', 'P', 'G']);
    }

    #[test]
    fn test_zero_queue_rejected() {
        let config = RecordConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(RecordingSink::new(config).is_err());
    }

    #[test]
    fn test_stop_before_start_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("never");
        let sink = RecordingSink::new(RecordConfig {
            output_dir: out.clone(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(sink.state(), RecorderState::Idle);
        assert!(sink.stop().is_none());
        assert!(sink.stop().is_none());
        assert!(!out.exists());
        assert_eq!(sink.frame_count(), 0);
    }

    #[test]
    fn test_write_ignored_when_idle() {
        let sink = RecordingSink::new(RecordConfig::default()).unwrap();
        sink.write_frame(&Mat::default()).unwrap();
        assert_eq!(sink.frame_count(), 0);
        assert_eq!(sink.dropped_frames(), 0);
    }
}
