// frameflow command line interface
// Headless runner: capture, filter, detect, record and export without a GUI

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use frameflow::detection::Detector;
use frameflow::{
    CaptureSource, ExportFormat, FrameLoop, PipelineConfig, PipelineEvent, YoloDetector,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "frameflow")]
#[command(about = "Real-time frame processing: filters, object detection, recording and export", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a camera or video file
    Run(RunArgs),

    /// Parse and validate a configuration file
    CheckConfig {
        /// TOML configuration file
        file: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Camera index
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    camera: Option<i32>,

    /// Video file
    #[arg(long)]
    file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// ONNX model for object detection
    #[arg(long)]
    model: Option<PathBuf>,

    /// Class names, one per line (defaults to COCO)
    #[arg(long, requires = "model")]
    labels: Option<PathBuf>,

    /// Enable detection from the first frame
    #[arg(long)]
    detect: bool,

    /// Record the output video
    #[arg(long)]
    record: bool,

    /// Export detections (csv or json)
    #[arg(long)]
    export: Option<ExportFormat>,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::CheckConfig { file } => check_config(&file),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Invalid configuration in {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(Some(path))?;
    println!("✅ {} is valid", path.display());
    println!(
        "   detection: {} (every {} frames, conf {:.2}, nms {:.2}, {:?})",
        if config.frame_loop.detection_enabled { "on" } else { "off" },
        config.frame_loop.skip_frames,
        config.detector.conf_threshold,
        config.detector.nms_threshold,
        config.detector.backend
    );
    let enabled: Vec<&str> = config
        .filters
        .iter()
        .filter(|f| f.enabled)
        .map(|f| f.params.filter_id())
        .collect();
    println!("   filters:   {}", if enabled.is_empty() { "none".to_string() } else { enabled.join(" → ") });
    println!("   recording: {}", config.record.output_dir.display());
    println!("   exports:   {}", config.export.output_dir.display());
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;

    let detector = Arc::new(YoloDetector::new(config.detector.clone())?);
    let (frame_loop, events) = FrameLoop::new(config, detector)?;
    let frame_loop = Arc::new(frame_loop);

    if let Some(model) = &args.model {
        frame_loop
            .load_model(model, args.labels.as_deref())
            .with_context(|| format!("Failed to load model {}", model.display()))?;
    }
    if args.detect {
        if !frame_loop.detector().is_loaded() {
            warn!("--detect given without a loaded model; detection stays idle");
        }
        frame_loop.set_detection_enabled(true);
    }

    let source = match (&args.file, args.camera) {
        (Some(path), _) => CaptureSource::file(path),
        (None, Some(index)) => CaptureSource::camera(index),
        (None, None) => anyhow::bail!("Either --camera or --file is required"),
    };
    frame_loop.open_source(Box::new(source))?;

    if args.record {
        frame_loop.toggle_recording()?;
    }
    if let Some(format) = args.export {
        let path = frame_loop.start_export(Some(format))?;
        info!("Writing detections to {}", path.display());
    }

    let reporter = tokio::spawn(report_events(events, Arc::downgrade(&frame_loop), args.max_frames));
    let mut runner = tokio::spawn(Arc::clone(&frame_loop).run());

    tokio::select! {
        _ = &mut runner => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            frame_loop.stop();
            if let Err(e) = runner.await {
                error!("Frame loop task failed: {}", e);
            }
        }
    }

    frame_loop.shutdown();
    let recorder = frame_loop.recorder();
    if recorder.output_path().is_some() {
        info!(
            "Recorded {} frames ({:.1}s, {} dropped)",
            recorder.encoded_frames(),
            recorder.duration_sec(),
            recorder.dropped_frames()
        );
    }

    // Dropping the last sender ends the reporter
    drop(frame_loop);
    if let Err(e) = reporter.await {
        error!("Event reporter failed: {}", e);
    }
    Ok(())
}

async fn report_events(
    mut events: mpsc::Receiver<PipelineEvent>,
    frame_loop: Weak<FrameLoop>,
    max_frames: Option<u64>,
) {
    let mut frames = 0u64;
    let mut stop_requested = false;
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::FrameReady { detections, .. } => {
                frames += 1;
                if !detections.is_empty() {
                    let summary: Vec<String> = detections
                        .iter()
                        .map(|d| format!("{} {:.2}", d.label, d.confidence))
                        .collect();
                    info!("Frame {}: {}", frames, summary.join(", "));
                }
                if !stop_requested && max_frames.is_some_and(|max| frames >= max) {
                    info!("Reached {} frames", frames);
                    if let Some(frame_loop) = frame_loop.upgrade() {
                        frame_loop.stop();
                    }
                    stop_requested = true;
                }
            }
            PipelineEvent::FpsUpdated(fps) => info!("{:.1} fps", fps),
            PipelineEvent::SourceError(message) => error!("Source error: {}", message),
            PipelineEvent::ModelLoaded { success: false, message } => error!("{}", message),
            PipelineEvent::RecordingSaved(path) => info!("Recording saved to {}", path.display()),
            PipelineEvent::RecordingFailed(message) => error!("{}", message),
            PipelineEvent::ScreenshotSaved(path) => info!("Screenshot saved to {}", path.display()),
            other => info!("{:?}", other),
        }
    }
}
