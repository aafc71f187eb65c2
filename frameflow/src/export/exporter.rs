//! Streaming CSV / JSON export of per-frame detections

use crate::detection::Detection;
use crate::error::PipelineError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(PipelineError::Config(format!("Unknown export format '{}'", other))),
        }
    }
}

pub const CSV_HEADER: &str = "timestamp_ms,class_id,label,confidence,x,y,w,h";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    #[serde(rename = "classId")]
    pub class_id: i32,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoxRecord,
}

impl From<&Detection> for DetectionRecord {
    fn from(d: &Detection) -> Self {
        Self {
            class_id: d.class_id,
            label: d.label.clone(),
            confidence: d.confidence,
            bbox: BoxRecord {
                x: d.bbox.x,
                y: d.bbox.y,
                w: d.bbox.width,
                h: d.bbox.height,
            },
        }
    }
}

/// One element of the top-level JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub timestamp_ms: i64,
    pub detections: Vec<DetectionRecord>,
}

enum ExporterState {
    Unopened,
    Open { writer: BufWriter<File>, first_frame: bool },
    Closed,
}

/// Incremental detection log. Every operation takes the same lock.
pub struct ResultExporter {
    path: PathBuf,
    format: ExportFormat,
    state: Mutex<ExporterState>,
}

impl ResultExporter {
    pub fn new(path: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            path: path.into(),
            format,
            state: Mutex::new(ExporterState::Unopened),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), ExporterState::Open { .. })
    }

    /// Create the file and write the leading structure. Only valid once.
    pub fn open(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        if !matches!(*state, ExporterState::Unopened) {
            return Err(PipelineError::Config(format!(
                "Exporter for {:?} was already opened",
                self.path
            )));
        }

        let persistence = |e: std::io::Error| {
            PipelineError::Persistence(format!("Cannot open export file {:?}: {}", self.path, e))
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(persistence)?;
        }
        let mut writer = BufWriter::new(File::create(&self.path).map_err(persistence)?);
        match self.format {
            ExportFormat::Csv => writeln!(writer, "{}", CSV_HEADER)?,
            ExportFormat::Json => writer.write_all(b"[\n")?,
        }

        info!("Exporting detections to {:?} ({:?})", self.path, self.format);
        *state = ExporterState::Open {
            writer,
            first_frame: true,
        };
        Ok(())
    }

    /// Append one frame's detections. A no-op unless open.
    pub fn append_frame(&self, timestamp_ms: i64, detections: &[Detection]) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        let ExporterState::Open { writer, first_frame } = &mut *state else {
            return Ok(());
        };

        match self.format {
            ExportFormat::Csv => {
                for d in detections {
                    writeln!(
                        writer,
                        "{},{},{},{},{},{},{},{}",
                        timestamp_ms,
                        d.class_id,
                        csv_field(&d.label),
                        d.confidence,
                        d.bbox.x,
                        d.bbox.y,
                        d.bbox.width,
                        d.bbox.height
                    )?;
                }
            }
            ExportFormat::Json => {
                if !*first_frame {
                    writer.write_all(b",\n")?;
                }
                let record = FrameRecord {
                    timestamp_ms,
                    detections: detections.iter().map(DetectionRecord::from).collect(),
                };
                serde_json::to_writer(&mut *writer, &record)?;
                *first_frame = false;
            }
        }
        Ok(())
    }

    /// Write the trailing structure and flush. Safe to call repeatedly.
    pub fn close(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        if !matches!(*state, ExporterState::Open { .. }) {
            return Ok(());
        }
        let ExporterState::Open { mut writer, .. } = std::mem::replace(&mut *state, ExporterState::Closed) else {
            return Ok(());
        };

        if self.format == ExportFormat::Json {
            writer.write_all(b"\n]\n")?;
        }
        writer.flush()?;
        info!("Export closed: {:?}", self.path);
        Ok(())
    }
}

impl Drop for ResultExporter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close exporter {:?}: {}", self.path, e);
        }
    }
}

/// Quote a CSV field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
