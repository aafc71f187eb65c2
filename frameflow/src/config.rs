//! Configuration for frameflow

use crate::detection::{DetectorConfig, RenderStyle};
use crate::error::PipelineError;
use crate::export::{ExportFormat, ImageFormat, RecordConfig};
use crate::filters::{default_entries, FilterEntry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Which frame the recorder receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// Filtered frame with detection overlays
    #[default]
    Rendered,
    /// Frame exactly as read from the source
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameLoopConfig {
    /// Run detection on every Nth processed frame
    pub skip_frames: u32,
    pub detection_enabled: bool,
    pub record_source: RecordSource,
    /// Tick rate when the source does not report one
    pub fallback_fps: f64,
    pub fps_window_ms: u64,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            skip_frames: 3,
            detection_enabled: false,
            record_source: RecordSource::Rendered,
            fallback_fps: 30.0,
            fps_window_ms: 1000,
        }
    }
}

impl FrameLoopConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.fallback_fps.is_finite() && self.fallback_fps > 0.0 && self.fallback_fps <= 240.0) {
            return Err(PipelineError::Config(format!(
                "fallback_fps must be within (0, 240], got {}",
                self.fallback_fps
            )));
        }
        if self.fps_window_ms == 0 {
            return Err(PipelineError::Config("fps_window_ms must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub format: ExportFormat,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs::document_dir()
                .map(|d| d.join("frameflow"))
                .unwrap_or_else(|| PathBuf::from("exports")),
            format: ExportFormat::Csv,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotConfig {
    pub output_dir: PathBuf,
    pub format: ImageFormat,
    pub jpeg_quality: i32,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs::picture_dir()
                .map(|d| d.join("frameflow"))
                .unwrap_or_else(|| PathBuf::from("screenshots")),
            format: ImageFormat::Png,
            jpeg_quality: crate::export::screenshot::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Complete pipeline configuration, one TOML table per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub frame_loop: FrameLoopConfig,
    pub detector: DetectorConfig,
    pub record: RecordConfig,
    pub export: ExportConfig,
    pub screenshot: ScreenshotConfig,
    pub render: RenderStyle,
    /// Filter chain in processing order
    pub filters: Vec<FilterEntry>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_loop: FrameLoopConfig::default(),
            detector: DetectorConfig::default(),
            record: RecordConfig::default(),
            export: ExportConfig::default(),
            screenshot: ScreenshotConfig::default(),
            render: RenderStyle::default(),
            filters: default_entries(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml(&text)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, PipelineError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, PipelineError> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.frame_loop.validate()?;
        self.detector.validate()?;
        self.record.validate()?;
        self.render.validate()?;
        if !(0..=100).contains(&self.screenshot.jpeg_quality) {
            return Err(PipelineError::Config(format!(
                "jpeg_quality must be within [0, 100], got {}",
                self.screenshot.jpeg_quality
            )));
        }
        Ok(())
    }
}
