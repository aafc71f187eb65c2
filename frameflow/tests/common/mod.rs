//! Test doubles shared by the integration tests
#![allow(dead_code)]

use frameflow::detection::{Detection, DetectionList, Detector, LabelMap};
use frameflow::export::{EncoderFactory, VideoEncoder};
use frameflow::utils::solid_frame;
use frameflow::{FrameSource, PipelineError};
use opencv::core::{Mat, Rect2f, Scalar, Size, Vec3b, VecN};
use opencv::prelude::*;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A BGR frame filled with `value` in every channel.
pub fn frame(width: i32, height: i32, value: u8) -> Mat {
    solid_frame(width, height, Scalar::all(value as f64)).unwrap()
}

/// Blue channel of the top-left pixel.
pub fn pixel(frame: &Mat) -> u8 {
    frame.at_2d::<Vec3b>(0, 0).unwrap()[0]
}

/// Frame with a per-pixel pattern that compresses poorly.
pub fn textured(width: i32, height: i32) -> Mat {
    let mut frame = Mat::new_rows_cols_with_default(height, width, opencv::core::CV_8UC3, Scalar::all(0.0)).unwrap();
    for row in 0..height {
        for col in 0..width {
            let (r, c) = (row as u32, col as u32);
            *frame.at_2d_mut::<Vec3b>(row, col).unwrap() = VecN([
                ((r * 31 + c * 17) % 256) as u8,
                ((r * c + 7) % 256) as u8,
                ((r ^ c) * 9 % 256) as u8,
            ]);
        }
    }
    frame
}

/// Finite in-memory source.
pub struct VecSource {
    frames: VecDeque<Mat>,
    size: Size,
    fps: f64,
    opened: bool,
    seekable: bool,
    position_ms: f64,
    next_ms: f64,
}

impl VecSource {
    pub fn new(frames: Vec<Mat>, fps: f64) -> Self {
        let size = frames
            .first()
            .map(|f| Size::new(f.cols(), f.rows()))
            .unwrap_or_default();
        Self {
            frames: frames.into(),
            size,
            fps,
            opened: false,
            seekable: false,
            position_ms: 0.0,
            next_ms: 0.0,
        }
    }

    /// `count` frames of `width`x`height`, the nth filled with n.
    pub fn numbered(count: usize, width: i32, height: i32) -> Self {
        Self::new((0..count).map(|i| frame(width, height, i as u8)).collect(), 30.0)
    }

    /// Reports the position of the frame just read: 0 ms for the first,
    /// then 40 ms per frame.
    pub fn seekable(mut self) -> Self {
        self.seekable = true;
        self
    }
}

impl FrameSource for VecSource {
    fn open(&mut self) -> Result<(), PipelineError> {
        self.opened = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Mat>, PipelineError> {
        if !self.opened {
            return Ok(None);
        }
        let next = self.frames.pop_front();
        if next.is_some() {
            self.position_ms = self.next_ms;
            self.next_ms += 40.0;
        }
        Ok(next)
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn width(&self) -> i32 {
        self.size.width
    }

    fn height(&self) -> i32 {
        self.size.height
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn description(&self) -> String {
        "vec source".to_string()
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn seek(&mut self, position_ms: f64) -> bool {
        if self.seekable {
            self.position_ms = position_ms;
            self.next_ms = position_ms;
        }
        self.seekable
    }

    fn pos_msec(&self) -> f64 {
        if self.seekable {
            self.position_ms
        } else {
            0.0
        }
    }
}

/// Source whose `open` always fails.
pub struct BrokenSource;

impl FrameSource for BrokenSource {
    fn open(&mut self) -> Result<(), PipelineError> {
        Err(PipelineError::Source("device unplugged".to_string()))
    }
    fn read(&mut self) -> Result<Option<Mat>, PipelineError> {
        Ok(None)
    }
    fn close(&mut self) {}
    fn is_opened(&self) -> bool {
        false
    }
    fn width(&self) -> i32 {
        0
    }
    fn height(&self) -> i32 {
        0
    }
    fn fps(&self) -> f64 {
        0.0
    }
    fn description(&self) -> String {
        "broken".to_string()
    }
}

/// Detector that returns one box per call, tagged with the call number,
/// and remembers the top-left pixel of every frame it saw.
pub struct CountingDetector {
    calls: AtomicUsize,
    loaded: AtomicBool,
    seen: Mutex<Vec<u8>>,
    labels: Arc<LabelMap>,
    conf: Mutex<f32>,
    nms: Mutex<f32>,
}

impl CountingDetector {
    pub fn loaded() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            loaded: AtomicBool::new(true),
            seen: Mutex::new(Vec::new()),
            labels: Arc::new(LabelMap::coco80()),
            conf: Mutex::new(0.5),
            nms: Mutex::new(0.45),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<u8> {
        self.seen.lock().clone()
    }
}

impl Detector for CountingDetector {
    fn load_model(&self, _model: &Path, _labels: Option<&Path>) -> Result<(), PipelineError> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn detect(&self, frame: &Mat) -> Result<DetectionList, PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as i32;
        self.seen.lock().push(pixel(frame));
        Ok(vec![Detection::new(
            Rect2f::new(4.0, 4.0, 8.0, 8.0),
            call,
            0.9,
            self.labels.name_of(call),
        )])
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn conf_threshold(&self) -> f32 {
        *self.conf.lock()
    }

    fn set_conf_threshold(&self, value: f32) -> Result<(), PipelineError> {
        *self.conf.lock() = value;
        Ok(())
    }

    fn nms_threshold(&self) -> f32 {
        *self.nms.lock()
    }

    fn set_nms_threshold(&self, value: f32) -> Result<(), PipelineError> {
        *self.nms.lock() = value;
        Ok(())
    }

    fn last_inference_ms(&self) -> f64 {
        0.0
    }

    fn labels(&self) -> Arc<LabelMap> {
        Arc::clone(&self.labels)
    }
}

#[derive(Default)]
struct GateState {
    open: bool,
    in_flight: Option<u8>,
}

/// Lets a test hold the encoder inside `write` until released.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    pub fn opened() -> Arc<Self> {
        let gate = Arc::new(Self::default());
        gate.open();
        gate
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }

    /// Wait until the encoder is blocked writing the frame tagged `id`.
    pub fn wait_in_flight(&self, id: u8) -> bool {
        let mut state = self.state.lock();
        while state.in_flight != Some(id) {
            if self
                .changed
                .wait_for(&mut state, Duration::from_secs(5))
                .timed_out()
            {
                return false;
            }
        }
        true
    }

    fn enter(&self, id: u8) {
        let mut state = self.state.lock();
        state.in_flight = Some(id);
        self.changed.notify_all();
        while !state.open {
            self.changed.wait(&mut state);
        }
        state.in_flight = None;
    }
}

/// Encoder that keeps the id (top-left pixel) and a copy of each frame.
pub struct RecordingEncoder {
    gate: Arc<Gate>,
    written: Arc<Mutex<Vec<u8>>>,
    frames: Arc<Mutex<Vec<Mat>>>,
    opened: Arc<AtomicBool>,
}

impl VideoEncoder for RecordingEncoder {
    fn open(&mut self, path: &Path, _fourcc: &str, _fps: f64, _size: Size) -> Result<(), PipelineError> {
        std::fs::write(path, b"")?;
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, frame: &Mat) -> Result<(), PipelineError> {
        let id = pixel(frame);
        self.gate.enter(id);
        self.written.lock().push(id);
        self.frames.lock().push(frame.try_clone()?);
        Ok(())
    }

    fn release(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Encoder whose `open` always fails.
pub struct UnopenableEncoder;

impl VideoEncoder for UnopenableEncoder {
    fn open(&mut self, _path: &Path, _fourcc: &str, _fps: f64, _size: Size) -> Result<(), PipelineError> {
        Err(PipelineError::Persistence("codec unavailable".to_string()))
    }

    fn write(&mut self, _frame: &Mat) -> Result<(), PipelineError> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Handles into every encoder a factory produced.
#[derive(Clone)]
pub struct EncoderSpy {
    pub gate: Arc<Gate>,
    pub written: Arc<Mutex<Vec<u8>>>,
    pub frames: Arc<Mutex<Vec<Mat>>>,
    pub opened: Arc<AtomicBool>,
}

impl EncoderSpy {
    pub fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            written: Arc::new(Mutex::new(Vec::new())),
            frames: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn factory(&self) -> EncoderFactory {
        let spy = self.clone();
        Arc::new(move || {
            Box::new(RecordingEncoder {
                gate: Arc::clone(&spy.gate),
                written: Arc::clone(&spy.written),
                frames: Arc::clone(&spy.frames),
                opened: Arc::clone(&spy.opened),
            }) as Box<dyn VideoEncoder>
        })
    }

    /// Like `factory`, but the first `failures` encoders cannot be opened.
    pub fn factory_failing_first(&self, failures: usize) -> EncoderFactory {
        let remaining = Arc::new(AtomicUsize::new(failures));
        let healthy = self.factory();
        Arc::new(move || {
            let fail = remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                Box::new(UnopenableEncoder) as Box<dyn VideoEncoder>
            } else {
                healthy()
            }
        })
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn sizes(&self) -> Vec<Size> {
        self.frames
            .lock()
            .iter()
            .map(|f| Size::new(f.cols(), f.rows()))
            .collect()
    }

    pub fn was_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }
}

/// True when every pixel of `frame` equals `value` in all channels.
pub fn is_uniform(frame: &Mat, value: u8) -> bool {
    (0..frame.rows()).all(|row| {
        (0..frame.cols()).all(|col| {
            frame
                .at_2d::<Vec3b>(row, col)
                .map(|px| px.0 == [value; 3])
                .unwrap_or(false)
        })
    })
}
