mod common;

use common::{frame, is_uniform, pixel, BrokenSource, CountingDetector, EncoderSpy, Gate, VecSource};
use frameflow::detection::{Detector, DetectorConfig};
use frameflow::export::{FrameRecord, RecordingSink};
use frameflow::pipeline::{TickOutcome, TickReport};
use frameflow::{ExportFormat, FrameLoop, PipelineConfig, PipelineEvent, PipelineError, RecordSource, YoloDetector};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn config_in(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.record.output_dir = dir.join("videos");
    config.export.output_dir = dir.join("exports");
    config.screenshot.output_dir = dir.join("shots");
    config
}

fn detecting(dir: &Path, skip_frames: u32) -> PipelineConfig {
    let mut config = config_in(dir);
    config.frame_loop.detection_enabled = true;
    config.frame_loop.skip_frames = skip_frames;
    config
}

fn build(config: PipelineConfig) -> (FrameLoop, mpsc::Receiver<PipelineEvent>, Arc<CountingDetector>) {
    let detector = Arc::new(CountingDetector::loaded());
    let (frame_loop, events) = FrameLoop::new(config, Arc::clone(&detector) as Arc<dyn Detector>).unwrap();
    (frame_loop, events, detector)
}

fn drain(events: &mut mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn kinds(events: &[PipelineEvent]) -> Vec<&'static str> {
    events.iter().map(PipelineEvent::kind).collect()
}

fn processed(outcome: Result<TickOutcome, PipelineError>) -> TickReport {
    match outcome.unwrap() {
        TickOutcome::Processed(report) => report,
        other => panic!("expected a processed frame, got {:?}", other),
    }
}

#[test]
fn test_detection_runs_every_nth_frame() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, detector) = build(detecting(dir.path(), 3));
    frame_loop.open_source(Box::new(VecSource::numbered(9, 32, 24))).unwrap();

    let reports: Vec<TickReport> = (0..9).map(|_| processed(frame_loop.tick())).collect();

    let ran: Vec<bool> = reports.iter().map(|r| r.detection_ran).collect();
    assert_eq!(ran, vec![true, false, false, true, false, false, true, false, false]);
    assert_eq!(detector.calls(), 3);

    let classes: Vec<i32> = reports.iter().map(|r| r.detections[0].class_id).collect();
    assert_eq!(classes, vec![0, 0, 0, 1, 1, 1, 2, 2, 2]);
    assert_eq!(reports[4].detections, reports[3].detections);
    assert_eq!(frame_loop.latest_detections(), reports[8].detections);
}

#[test]
fn test_skip_frames_change_applies_to_following_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, detector) = build(detecting(dir.path(), 3));
    frame_loop.open_source(Box::new(VecSource::numbered(4, 16, 16))).unwrap();

    processed(frame_loop.tick());
    frame_loop.set_skip_frames(0);
    assert_eq!(frame_loop.skip_frames(), 1);
    for _ in 0..3 {
        assert!(processed(frame_loop.tick()).detection_ran);
    }
    assert_eq!(detector.calls(), 4);
}

#[test]
fn test_detector_sees_filtered_frame() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, detector) = build(detecting(dir.path(), 1));
    frame_loop.set_filter_enabled("threshold", true).unwrap();
    frame_loop
        .open_source(Box::new(VecSource::new(vec![frame(32, 24, 200)], 30.0)))
        .unwrap();

    processed(frame_loop.tick());
    assert_eq!(detector.seen(), vec![255]);
}

#[test]
fn test_unknown_filter_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, _detector) = build(config_in(dir.path()));
    assert!(frame_loop.set_filter_enabled("sepia", true).unwrap_err().is_config());
}

#[test]
fn test_detection_disabled_never_calls_detector() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, detector) = build(config_in(dir.path()));
    frame_loop.open_source(Box::new(VecSource::numbered(3, 16, 16))).unwrap();

    for _ in 0..3 {
        let report = processed(frame_loop.tick());
        assert!(!report.detection_ran);
        assert!(report.detections.is_empty());
    }
    assert_eq!(detector.calls(), 0);
}

#[test]
fn test_disabling_detection_clears_cached_result() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, _detector) = build(detecting(dir.path(), 5));
    frame_loop.open_source(Box::new(VecSource::numbered(2, 16, 16))).unwrap();

    processed(frame_loop.tick());
    assert_eq!(frame_loop.latest_detections().len(), 1);

    frame_loop.set_detection_enabled(false);
    assert!(frame_loop.latest_detections().is_empty());
    assert!(processed(frame_loop.tick()).detections.is_empty());
}

#[test]
fn test_source_exhaustion_closes_source() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, mut events, _detector) = build(config_in(dir.path()));
    let source = VecSource::new(vec![frame(32, 24, 1), frame(16, 12, 2)], 30.0);
    frame_loop.open_source(Box::new(source)).unwrap();

    processed(frame_loop.tick());
    processed(frame_loop.tick());
    assert_eq!(frame_loop.tick().unwrap(), TickOutcome::SourceClosed);
    assert!(!frame_loop.has_source());
    assert_eq!(frame_loop.tick().unwrap(), TickOutcome::Idle);

    let events = drain(&mut events);
    let kinds = kinds(&events);
    assert_eq!(kinds.first(), Some(&"source_opened"));
    assert_eq!(kinds.last(), Some(&"source_closed"));
    assert_eq!(kinds.iter().filter(|k| **k == "frame_ready").count(), 2);

    let resolutions: Vec<(i32, i32)> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::ResolutionChanged { width, height } => Some((*width, *height)),
            _ => None,
        })
        .collect();
    assert_eq!(resolutions, vec![(32, 24), (16, 12)]);
}

#[test]
fn test_failed_open_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, mut events, _detector) = build(config_in(dir.path()));

    assert!(frame_loop.open_source(Box::new(BrokenSource)).is_err());
    assert!(!frame_loop.has_source());
    assert_eq!(kinds(&drain(&mut events)), vec!["source_error"]);
}

#[test]
fn test_frame_ready_carries_both_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, mut events, _detector) = build(config_in(dir.path()));
    frame_loop.set_filter_enabled("threshold", true).unwrap();
    frame_loop
        .open_source(Box::new(VecSource::new(vec![frame(16, 16, 90)], 30.0)))
        .unwrap();
    processed(frame_loop.tick());

    let ready = drain(&mut events)
        .into_iter()
        .find_map(|e| match e {
            PipelineEvent::FrameReady { original, processed, .. } => Some((original, processed)),
            _ => None,
        })
        .expect("frame_ready event");
    assert!(is_uniform(&ready.0, 90));
    assert!(is_uniform(&ready.1, 0));
}

#[test]
fn test_pause_holds_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, _detector) = build(config_in(dir.path()));
    frame_loop.open_source(Box::new(VecSource::numbered(2, 16, 16))).unwrap();

    assert!(frame_loop.play_pause());
    assert_eq!(frame_loop.tick().unwrap(), TickOutcome::Paused);
    assert!(!frame_loop.play_pause());
    processed(frame_loop.tick());
}

#[test]
fn test_export_uses_source_position() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, mut events, _detector) = build(detecting(dir.path(), 1));
    frame_loop
        .open_source(Box::new(VecSource::numbered(3, 16, 16).seekable()))
        .unwrap();

    let path = frame_loop.start_export(Some(ExportFormat::Json)).unwrap();
    assert!(path.starts_with(dir.path().join("exports")));
    assert!(frame_loop.is_exporting());
    for _ in 0..3 {
        processed(frame_loop.tick());
    }
    assert_eq!(frame_loop.stop_export(), Some(path.clone()));
    assert!(!frame_loop.is_exporting());

    let frames: Vec<FrameRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let timestamps: Vec<i64> = frames.iter().map(|f| f.timestamp_ms).collect();
    assert_eq!(timestamps, vec![0, 40, 80]);
    assert!(frames.iter().all(|f| f.detections.len() == 1));

    let kinds = kinds(&drain(&mut events));
    assert!(kinds.contains(&"export_state_changed"));
    assert!(kinds.contains(&"position_msec"));
}

#[test]
fn test_export_timestamps_follow_rewind_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, _detector) = build(config_in(dir.path()));
    frame_loop
        .open_source(Box::new(VecSource::numbered(4, 16, 16).seekable()))
        .unwrap();
    let path = frame_loop.start_export(Some(ExportFormat::Json)).unwrap();

    processed(frame_loop.tick());
    processed(frame_loop.tick());
    assert!(frame_loop.seek(0.0));
    processed(frame_loop.tick());
    processed(frame_loop.tick());
    frame_loop.stop_export();

    let frames: Vec<FrameRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let timestamps: Vec<i64> = frames.iter().map(|f| f.timestamp_ms).collect();
    assert_eq!(timestamps, vec![0, 40, 0, 40]);
}

fn record_three(record_source: RecordSource) -> EncoderSpy {
    let dir = tempfile::tempdir().unwrap();
    let mut config = detecting(dir.path(), 1);
    config.frame_loop.record_source = record_source;

    let spy = EncoderSpy::new(Gate::opened());
    let recorder = Arc::new(RecordingSink::with_encoder(config.record.clone(), spy.factory()).unwrap());
    let detector: Arc<dyn Detector> = Arc::new(CountingDetector::loaded());
    let (frame_loop, mut events) = FrameLoop::with_recorder(config, detector, recorder).unwrap();
    frame_loop.open_source(Box::new(VecSource::numbered(3, 32, 24))).unwrap();

    assert!(frame_loop.toggle_recording().unwrap());
    for _ in 0..3 {
        processed(frame_loop.tick());
    }
    assert!(!frame_loop.toggle_recording().unwrap());

    let saved = drain(&mut events).into_iter().any(|e| matches!(e, PipelineEvent::RecordingSaved(_)));
    assert!(saved);
    spy
}

#[test]
fn test_recorder_receives_raw_frames() {
    let spy = record_three(RecordSource::Raw);
    assert_eq!(spy.written(), vec![0, 1, 2]);
    let frames = spy.frames.lock();
    assert!(frames.iter().enumerate().all(|(i, f)| is_uniform(f, i as u8)));
}

#[test]
fn test_recorder_receives_rendered_frames() {
    let spy = record_three(RecordSource::Rendered);
    let frames = spy.frames.lock();
    assert_eq!(frames.len(), 3);
    for (i, f) in frames.iter().enumerate() {
        assert_eq!(pixel(f), i as u8);
        assert!(!is_uniform(f, i as u8), "overlay missing on frame {}", i);
    }
}

#[test]
fn test_encoder_failure_ends_recording_with_event() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let spy = EncoderSpy::new(Gate::opened());
    let recorder = Arc::new(RecordingSink::with_encoder(config.record.clone(), spy.factory_failing_first(1)).unwrap());
    let detector: Arc<dyn Detector> = Arc::new(CountingDetector::loaded());
    let (frame_loop, mut events) = FrameLoop::with_recorder(config, detector, Arc::clone(&recorder)).unwrap();
    frame_loop.open_source(Box::new(VecSource::numbered(4, 32, 24))).unwrap();

    assert!(frame_loop.toggle_recording().unwrap());
    processed(frame_loop.tick());
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !recorder.has_failed() {
        assert!(std::time::Instant::now() < deadline, "encoder failure never surfaced");
        std::thread::sleep(Duration::from_millis(5));
    }
    processed(frame_loop.tick());

    assert!(!recorder.is_recording());
    let events = drain(&mut events);
    let failures: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::RecordingFailed(message) => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("codec unavailable"));
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::RecordingStateChanged(false))));
    assert!(!events.iter().any(|e| matches!(e, PipelineEvent::RecordingSaved(_))));
    assert!(frame_loop.stop_recording().is_none());
    assert!(spy.written().is_empty());
}

#[test]
fn test_screenshot_needs_a_frame() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, mut events, _detector) = build(config_in(dir.path()));
    assert!(matches!(frame_loop.screenshot(), Err(PipelineError::Processing(_))));

    frame_loop.open_source(Box::new(VecSource::numbered(1, 16, 16))).unwrap();
    processed(frame_loop.tick());
    let path = frame_loop.screenshot().unwrap();
    assert!(path.exists());
    assert!(path.starts_with(dir.path().join("shots")));
    assert!(kinds(&drain(&mut events)).contains(&"screenshot_saved"));
}

#[test]
fn test_failed_model_load_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let detector = Arc::new(YoloDetector::new(DetectorConfig::default()).unwrap());
    let (frame_loop, mut events) = FrameLoop::new(config_in(dir.path()), detector).unwrap();

    assert!(frame_loop.load_model(&dir.path().join("missing.onnx"), None).is_err());
    assert!(!frame_loop.detector().is_loaded());

    let loaded = drain(&mut events).into_iter().find_map(|e| match e {
        PipelineEvent::ModelLoaded { success, .. } => Some(success),
        _ => None,
    });
    assert_eq!(loaded, Some(false));
}

#[test]
fn test_shutdown_finalizes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, _events, _detector) = build(config_in(dir.path()));
    frame_loop.open_source(Box::new(VecSource::numbered(2, 16, 16))).unwrap();
    let path = frame_loop.start_export(None).unwrap();
    assert_eq!(path.extension().unwrap(), "csv");
    processed(frame_loop.tick());

    frame_loop.shutdown();
    assert!(!frame_loop.has_source());
    assert!(!frame_loop.is_exporting());
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_drains_source() {
    let dir = tempfile::tempdir().unwrap();
    let (frame_loop, mut events, _detector) = build(config_in(dir.path()));
    let frames = (0..5).map(|i| frame(16, 16, i)).collect();
    frame_loop.open_source(Box::new(VecSource::new(frames, 200.0))).unwrap();

    let frame_loop = Arc::new(frame_loop);
    tokio::time::timeout(Duration::from_secs(10), Arc::clone(&frame_loop).run())
        .await
        .expect("frame loop did not finish");
    assert!(!frame_loop.is_running());
    assert!(!frame_loop.has_source());

    let kinds = kinds(&drain(&mut events));
    assert_eq!(kinds.iter().filter(|k| **k == "frame_ready").count(), 5);
    assert_eq!(kinds.last(), Some(&"source_closed"));
}
