//! Tick-driven orchestration: source → filters → detection → overlay → fan-out

use super::events::PipelineEvent;
use super::fps::FpsCounter;
use crate::config::{ExportConfig, FrameLoopConfig, PipelineConfig, RecordSource, ScreenshotConfig};
use crate::detection::{DetectionList, DetectionRenderer, Detector};
use crate::error::PipelineError;
use crate::export::{save_screenshot, ExportFormat, RecordingSink, ResultExporter};
use crate::filters::{FilterChain, FilterParams};
use crate::source::FrameSource;
use crate::utils::{timestamp_tag, unique_path};
use opencv::core::{Mat, Size};
use opencv::prelude::*;
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Capacity of the outbound event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Result of one [`FrameLoop::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No source is open
    Idle,
    Paused,
    Processed(TickReport),
    /// The source ran out or failed and has been closed
    SourceClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// True when the detector ran on this tick rather than reusing the
    /// previous result
    pub detection_ran: bool,
    pub detections: DetectionList,
}

struct OpenSource {
    source: Box<dyn FrameSource>,
    opened_at: Instant,
    size: Size,
}

/// Drives one frame per tick through the pipeline and fans the result out
/// to the event channel, the recorder and the exporter.
///
/// Each piece of shared state has its own narrowly held lock. None of them
/// is held across the filter pass or the detector call.
pub struct FrameLoop {
    config: FrameLoopConfig,
    export_config: Mutex<ExportConfig>,
    screenshot_config: Mutex<ScreenshotConfig>,

    chain: Arc<FilterChain>,
    detector: Arc<dyn Detector>,
    renderer: DetectionRenderer,
    recorder: Arc<RecordingSink>,
    exporter: Mutex<Option<Arc<ResultExporter>>>,
    source: Mutex<Option<OpenSource>>,

    latest_detections: Mutex<DetectionList>,
    detect_counter: AtomicU64,
    skip_frames: AtomicU32,
    detection_enabled: AtomicBool,
    paused: AtomicBool,
    running: AtomicBool,

    fps: Mutex<FpsCounter>,
    last_fps_emit: Mutex<Option<Instant>>,
    last_frame: Mutex<Option<Mat>>,
    events: mpsc::Sender<PipelineEvent>,
}

impl FrameLoop {
    pub fn new(
        config: PipelineConfig,
        detector: Arc<dyn Detector>,
    ) -> Result<(Self, mpsc::Receiver<PipelineEvent>), PipelineError> {
        let recorder = Arc::new(RecordingSink::new(config.record.clone())?);
        Self::with_recorder(config, detector, recorder)
    }

    /// Build around an existing recorder, e.g. one with a custom encoder.
    pub fn with_recorder(
        config: PipelineConfig,
        detector: Arc<dyn Detector>,
        recorder: Arc<RecordingSink>,
    ) -> Result<(Self, mpsc::Receiver<PipelineEvent>), PipelineError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let frame_loop = Self {
            skip_frames: AtomicU32::new(config.frame_loop.skip_frames.max(1)),
            detection_enabled: AtomicBool::new(config.frame_loop.detection_enabled),
            fps: Mutex::new(FpsCounter::new(Duration::from_millis(config.frame_loop.fps_window_ms))),
            export_config: Mutex::new(config.export),
            screenshot_config: Mutex::new(config.screenshot),
            chain: Arc::new(FilterChain::from_entries(&config.filters)),
            renderer: DetectionRenderer::new(config.render),
            config: config.frame_loop,
            detector,
            recorder,
            exporter: Mutex::new(None),
            source: Mutex::new(None),
            latest_detections: Mutex::new(Vec::new()),
            detect_counter: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(false),
            last_fps_emit: Mutex::new(None),
            last_frame: Mutex::new(None),
            events: tx,
        };
        Ok((frame_loop, rx))
    }

    pub fn chain(&self) -> &Arc<FilterChain> {
        &self.chain
    }

    pub fn detector(&self) -> &Arc<dyn Detector> {
        &self.detector
    }

    pub fn recorder(&self) -> &Arc<RecordingSink> {
        &self.recorder
    }

    /// Snapshot of the detection list drawn on the latest frame.
    pub fn latest_detections(&self) -> DetectionList {
        self.latest_detections.lock().clone()
    }

    pub fn current_fps(&self) -> f64 {
        self.fps.lock().current()
    }

    pub fn has_source(&self) -> bool {
        self.source.lock().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_exporting(&self) -> bool {
        self.exporter.lock().is_some()
    }

    /// Open `source` and make it the active one, closing any previous source.
    pub fn open_source(&self, mut source: Box<dyn FrameSource>) -> Result<(), PipelineError> {
        self.close_source();

        if let Err(e) = source.open() {
            error!("Failed to open {}: {}", source.description(), e);
            self.emit(PipelineEvent::SourceError(e.to_string()));
            return Err(e);
        }

        let description = source.description();
        let size = Size::new(source.width(), source.height());
        let duration = source.duration_msec();

        self.reset_detection_state();
        self.fps.lock().reset();
        self.paused.store(false, Ordering::Release);
        *self.source.lock() = Some(OpenSource {
            source,
            opened_at: Instant::now(),
            size,
        });

        info!("Source opened: {}", description);
        self.emit(PipelineEvent::SourceOpened(description));
        if size.width > 0 && size.height > 0 {
            self.emit(PipelineEvent::ResolutionChanged {
                width: size.width,
                height: size.height,
            });
        }
        if duration > 0.0 {
            self.emit(PipelineEvent::DurationMsec(duration));
        }
        Ok(())
    }

    pub fn close_source(&self) {
        let previous = self.source.lock().take();
        if let Some(mut open) = previous {
            open.source.close();
            info!("Source closed: {}", open.source.description());
            self.emit(PipelineEvent::SourceClosed);
        }
    }

    /// Toggle pause; returns the new paused state.
    pub fn play_pause(&self) -> bool {
        let paused = !self.paused.load(Ordering::Acquire);
        self.paused.store(paused, Ordering::Release);
        if let Some(open) = self.source.lock().as_mut() {
            if paused {
                open.source.pause();
            } else {
                open.source.resume();
            }
        }
        debug!("Frame loop {}", if paused { "paused" } else { "resumed" });
        paused
    }

    /// Seek a seekable source. False when there is no source or it refused.
    pub fn seek(&self, position_ms: f64) -> bool {
        let moved = match self.source.lock().as_mut() {
            Some(open) => open.source.seek(position_ms),
            None => false,
        };
        if moved {
            self.emit(PipelineEvent::PositionMsec(position_ms.max(0.0)));
        }
        moved
    }

    pub fn set_filter_enabled(&self, id: &str, enabled: bool) -> Result<(), PipelineError> {
        let filter = self
            .chain
            .find(id)
            .ok_or_else(|| PipelineError::Config(format!("No filter with id '{}'", id)))?;
        filter.set_enabled(enabled);
        Ok(())
    }

    pub fn set_filter_params(&self, id: &str, params: FilterParams) -> Result<(), PipelineError> {
        let filter = self
            .chain
            .find(id)
            .ok_or_else(|| PipelineError::Config(format!("No filter with id '{}'", id)))?;
        filter.set_params(params)
    }

    /// Load a model into the detector and report the outcome as an event.
    pub fn load_model(&self, model_path: &Path, labels_path: Option<&Path>) -> Result<(), PipelineError> {
        let result = self.detector.load_model(model_path, labels_path);
        self.reset_detection_state();
        let (success, message) = match &result {
            Ok(()) => (true, format!("Loaded {}", model_path.display())),
            Err(e) => (false, e.to_string()),
        };
        if success {
            info!("{}", message);
        } else {
            error!("Model load failed: {}", message);
        }
        self.emit(PipelineEvent::ModelLoaded { success, message });
        result
    }

    /// Disabling clears the cached detections so stale boxes are not drawn.
    pub fn set_detection_enabled(&self, enabled: bool) {
        self.detection_enabled.store(enabled, Ordering::Release);
        self.reset_detection_state();
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::Acquire)
    }

    pub fn set_conf_threshold(&self, value: f32) -> Result<(), PipelineError> {
        self.detector.set_conf_threshold(value)
    }

    pub fn set_nms_threshold(&self, value: f32) -> Result<(), PipelineError> {
        self.detector.set_nms_threshold(value)
    }

    /// Values below 1 are treated as 1 (detect every frame).
    pub fn set_skip_frames(&self, every: u32) {
        self.skip_frames.store(every.max(1), Ordering::Release);
    }

    pub fn skip_frames(&self) -> u32 {
        self.skip_frames.load(Ordering::Acquire)
    }

    fn reset_detection_state(&self) {
        self.latest_detections.lock().clear();
        self.detect_counter.store(0, Ordering::Release);
    }

    /// Start or stop recording; returns whether recording is now active.
    pub fn toggle_recording(&self) -> Result<bool, PipelineError> {
        if self.recorder.is_recording() {
            self.finish_recording();
            Ok(false)
        } else {
            self.recorder.start()?;
            self.emit(PipelineEvent::RecordingStateChanged(true));
            Ok(true)
        }
    }

    /// Stop recording if active, returning the saved file.
    pub fn stop_recording(&self) -> Option<PathBuf> {
        if !self.recorder.is_recording() {
            return None;
        }
        self.finish_recording()
    }

    fn finish_recording(&self) -> Option<PathBuf> {
        let saved = self.recorder.stop();
        self.emit(PipelineEvent::RecordingStateChanged(false));
        if let Some(message) = self.recorder.take_failure() {
            self.emit(PipelineEvent::RecordingFailed(message));
        }
        if let Some(path) = &saved {
            self.emit(PipelineEvent::RecordingSaved(path.clone()));
        }
        saved
    }

    pub fn set_record_output_dir(&self, dir: impl Into<PathBuf>) {
        self.recorder.set_output_dir(dir);
    }

    /// Open a new export file in the configured directory. Any running
    /// export is closed first.
    pub fn start_export(&self, format: Option<ExportFormat>) -> Result<PathBuf, PipelineError> {
        self.stop_export();
        let config = self.export_config.lock().clone();
        let format = format.unwrap_or(config.format);

        std::fs::create_dir_all(&config.output_dir).map_err(|e| {
            PipelineError::Persistence(format!(
                "Cannot create export directory {:?}: {}",
                config.output_dir, e
            ))
        })?;
        let path = unique_path(
            &config.output_dir,
            &format!("detections_{}", timestamp_tag()),
            format.extension(),
        );
        let exporter = Arc::new(ResultExporter::new(&path, format));
        exporter.open()?;

        *self.exporter.lock() = Some(exporter);
        self.emit(PipelineEvent::ExportStateChanged(true));
        Ok(path)
    }

    /// Close the running export, returning its file.
    pub fn stop_export(&self) -> Option<PathBuf> {
        let exporter = self.exporter.lock().take()?;
        if let Err(e) = exporter.close() {
            error!("Failed to close export {:?}: {}", exporter.path(), e);
        }
        self.emit(PipelineEvent::ExportStateChanged(false));
        Some(exporter.path().to_path_buf())
    }

    pub fn set_export_output_dir(&self, dir: impl Into<PathBuf>) {
        self.export_config.lock().output_dir = dir.into();
    }

    /// Save the most recent rendered frame.
    pub fn screenshot(&self) -> Result<PathBuf, PipelineError> {
        let frame = match self.last_frame.lock().as_ref() {
            Some(frame) => frame.try_clone()?,
            None => return Err(PipelineError::Processing("No frame to capture yet".to_string())),
        };
        let config = self.screenshot_config.lock().clone();
        let path = save_screenshot(&frame, &config.output_dir, config.format, config.jpeg_quality)?;
        self.emit(PipelineEvent::ScreenshotSaved(path.clone()));
        Ok(path)
    }

    pub fn set_screenshot_output_dir(&self, dir: impl Into<PathBuf>) {
        self.screenshot_config.lock().output_dir = dir.into();
    }

    /// Process exactly one frame from the active source.
    pub fn tick(&self) -> Result<TickOutcome, PipelineError> {
        if self.is_paused() {
            return Ok(TickOutcome::Paused);
        }

        let Some(pulled) = self.pull_frame() else {
            return Ok(TickOutcome::Idle);
        };
        let Pulled {
            frame,
            timestamp_ms,
            position_ms,
            resized,
        } = match pulled {
            PullResult::Frame(pulled) => pulled,
            PullResult::Closed => return Ok(TickOutcome::SourceClosed),
        };

        if let Some(size) = resized {
            self.emit(PipelineEvent::ResolutionChanged {
                width: size.width,
                height: size.height,
            });
        }

        let filtered = self.chain.process(&frame)?;
        let (detections, detection_ran) = self.detections_for(&filtered);

        let mut rendered = filtered;
        if !detections.is_empty() {
            self.renderer
                .render(&mut rendered, &detections, &self.detector.labels())?;
        }

        self.fan_out(&frame, &rendered, &detections, timestamp_ms)?;

        if let Some(position) = position_ms {
            self.emit(PipelineEvent::PositionMsec(position));
        }
        self.update_fps();

        *self.last_frame.lock() = Some(rendered.try_clone()?);
        self.emit(PipelineEvent::FrameReady {
            original: frame,
            processed: rendered,
            detections: detections.clone(),
        });

        Ok(TickOutcome::Processed(TickReport {
            detection_ran,
            detections,
        }))
    }

    /// Tick at the source frame rate until stopped or the source ends.
    /// Each tick runs on the blocking pool.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::Release);
        let fps = self.tick_rate();
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / fps));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Frame loop running at {:.1} ticks/s", fps);

        while self.is_running() {
            interval.tick().await;
            if !self.is_running() {
                break;
            }
            let this = Arc::clone(&self);
            let outcome = match tokio::task::spawn_blocking(move || this.tick()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Frame loop tick panicked: {}", e);
                    break;
                }
            };
            match outcome {
                Ok(TickOutcome::SourceClosed) | Ok(TickOutcome::Idle) => break,
                Ok(_) => {}
                Err(e) => warn!("Frame dropped: {}", e),
            }
        }

        self.running.store(false, Ordering::Release);
        info!("Frame loop stopped");
    }

    /// Ask a running loop to exit after its current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stop everything and finalize recording and export.
    pub fn shutdown(&self) {
        self.stop();
        self.stop_recording();
        self.stop_export();
        self.close_source();
    }

    fn tick_rate(&self) -> f64 {
        let reported = self
            .source
            .lock()
            .as_ref()
            .map(|open| open.source.fps())
            .unwrap_or(0.0);
        if reported.is_finite() && reported > 0.0 && reported <= 240.0 {
            reported
        } else {
            self.config.fallback_fps
        }
    }

    fn pull_frame(&self) -> Option<PullResult> {
        let mut guard = self.source.lock();
        let open = guard.as_mut()?;

        let frame = match open.source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Some(self.end_of_source(guard, None)),
            Err(e) => return Some(self.end_of_source(guard, Some(e))),
        };

        let size = Size::new(frame.cols(), frame.rows());
        let resized = (size != open.size).then(|| {
            open.size = size;
            size
        });

        // Seekable sources always carry media time, including 0 after a rewind
        let position_ms = open
            .source
            .is_seekable()
            .then(|| open.source.pos_msec())
            .filter(|p| p.is_finite())
            .map(|p| p.max(0.0));
        let timestamp_ms = match position_ms {
            Some(position) => position.round() as i64,
            None => open.opened_at.elapsed().as_millis() as i64,
        };

        Some(PullResult::Frame(Pulled {
            frame,
            timestamp_ms,
            position_ms,
            resized,
        }))
    }

    fn end_of_source(
        &self,
        mut guard: MutexGuard<'_, Option<OpenSource>>,
        failure: Option<PipelineError>,
    ) -> PullResult {
        let taken = guard.take();
        drop(guard);
        if let Some(e) = failure {
            error!("Source read failed: {}", e);
            self.emit(PipelineEvent::SourceError(e.to_string()));
        }
        if let Some(mut open) = taken {
            info!("End of stream: {}", open.source.description());
            open.source.close();
        }
        self.emit(PipelineEvent::SourceClosed);
        PullResult::Closed
    }

    /// Fresh detections on every Nth call, the cached list otherwise.
    fn detections_for(&self, frame: &Mat) -> (DetectionList, bool) {
        if !self.detection_enabled() || !self.detector.is_loaded() {
            return (Vec::new(), false);
        }

        let every = u64::from(self.skip_frames().max(1));
        let index = self.detect_counter.fetch_add(1, Ordering::AcqRel);
        if index % every != 0 {
            return (self.latest_detections.lock().clone(), false);
        }

        match self.detector.detect(frame) {
            Ok(fresh) => {
                debug!(
                    "Detection produced {} objects in {:.1} ms",
                    fresh.len(),
                    self.detector.last_inference_ms()
                );
                *self.latest_detections.lock() = fresh.clone();
                (fresh, true)
            }
            Err(e) => {
                warn!("Detection failed, reusing previous result: {}", e);
                (self.latest_detections.lock().clone(), false)
            }
        }
    }

    fn fan_out(
        &self,
        raw: &Mat,
        rendered: &Mat,
        detections: &DetectionList,
        timestamp_ms: i64,
    ) -> Result<(), PipelineError> {
        // Encoder failures surface on the worker thread; end the session here
        if self.recorder.has_failed() && self.recorder.is_recording() {
            self.stop_recording();
        }
        if self.recorder.is_recording() {
            let frame = match self.config.record_source {
                RecordSource::Rendered => rendered,
                RecordSource::Raw => raw,
            };
            self.recorder.write_frame(frame)?;
        }

        let exporter = self.exporter.lock().clone();
        if let Some(exporter) = exporter {
            if let Err(e) = exporter.append_frame(timestamp_ms, detections) {
                warn!("Failed to export frame at {} ms: {}", timestamp_ms, e);
            }
        }
        Ok(())
    }

    fn update_fps(&self) {
        let now = Instant::now();
        let fps = {
            let mut counter = self.fps.lock();
            counter.tick_at(now);
            counter.current()
        };
        let mut last = self.last_fps_emit.lock();
        let due = last.map_or(true, |t| now.duration_since(t) >= Duration::from_millis(500));
        if due {
            *last = Some(now);
            drop(last);
            self.emit(PipelineEvent::FpsUpdated(fps));
        }
    }

    fn emit(&self, event: PipelineEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!("Event channel full, dropping {}", event.kind());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

struct Pulled {
    frame: Mat,
    timestamp_ms: i64,
    position_ms: Option<f64>,
    resized: Option<Size>,
}

enum PullResult {
    Frame(Pulled),
    Closed,
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.stop_export();
        self.recorder.stop();
    }
}
