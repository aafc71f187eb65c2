//! Error types for frameflow

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("ONNX Runtime error: {0}")]
    Ort(String),

    #[error("OpenCV error: {0}")]
    OpenCv(String),
}

impl From<opencv::Error> for PipelineError {
    fn from(err: opencv::Error) -> Self {
        PipelineError::OpenCv(err.message)
    }
}

impl PipelineError {
    /// True for the configuration class of failures, which callers report
    /// synchronously and never retry.
    pub fn is_config(&self) -> bool {
        matches!(self, PipelineError::Config(_) | PipelineError::Toml(_))
    }
}
