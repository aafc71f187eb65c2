//! YOLO object detection on ONNX Runtime

use super::detector::{check_threshold, decode_yolo_output, ComputeBackend, Detector, DetectorConfig};
use super::labels::LabelMap;
use super::letterbox::letterbox;
use super::nms::{filter_by_confidence, nms_per_class};
use super::DetectionList;
use crate::error::PipelineError;
use crate::utils::mat_to_chw_tensor;
use opencv::core::{Mat, Size};
use opencv::prelude::*;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

struct LoadedModel {
    session: Session,
    model_path: PathBuf,
}

/// YOLO detector backed by an ONNX Runtime session.
///
/// The session lives behind one lock: inference, reloads and backend swaps
/// never overlap.
pub struct YoloDetector {
    config: Mutex<DetectorConfig>,
    model: Mutex<Option<LoadedModel>>,
    labels: Mutex<Arc<LabelMap>>,
    loaded: AtomicBool,
    last_inference_ms: AtomicU64,
}

impl YoloDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config: Mutex::new(config),
            model: Mutex::new(None),
            labels: Mutex::new(Arc::new(LabelMap::coco80())),
            loaded: AtomicBool::new(false),
            last_inference_ms: AtomicU64::new(0f64.to_bits()),
        })
    }

    pub fn config(&self) -> DetectorConfig {
        self.config.lock().clone()
    }

    pub fn backend(&self) -> ComputeBackend {
        self.config.lock().backend
    }

    /// Switch compute backend. A loaded model is rebuilt from its original
    /// path; if that fails the detector ends up unloaded.
    pub fn set_backend(&self, backend: ComputeBackend) -> Result<(), PipelineError> {
        let mut model = self.model.lock();
        {
            let mut config = self.config.lock();
            if config.backend == backend {
                return Ok(());
            }
            config.backend = backend;
        }

        let Some(path) = model.as_ref().map(|m| m.model_path.clone()) else {
            return Ok(());
        };
        info!("Reloading {:?} for backend {:?}", path, backend);
        match build_session(&path, backend) {
            Ok(session) => {
                *model = Some(LoadedModel {
                    session,
                    model_path: path,
                });
                Ok(())
            }
            Err(e) => {
                *model = None;
                self.loaded.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn record_inference(&self, started: Instant) {
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        self.last_inference_ms.store(ms.to_bits(), Ordering::Relaxed);
        debug!("Inference took {:.2} ms", ms);
    }
}

impl Detector for YoloDetector {
    fn load_model(&self, model_path: &Path, labels_path: Option<&Path>) -> Result<(), PipelineError> {
        let mut model = self.model.lock();
        *model = None;
        self.loaded.store(false, Ordering::Release);

        if !model_path.is_file() {
            return Err(PipelineError::Config(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }
        let labels = match labels_path {
            Some(path) => LabelMap::from_file(path)?,
            None => LabelMap::coco80(),
        };

        let backend = self.backend();
        let session = build_session(model_path, backend)?;
        info!(
            "YOLO model loaded from {:?} ({} classes, {:?})",
            model_path,
            labels.len(),
            backend
        );

        *self.labels.lock() = Arc::new(labels);
        *model = Some(LoadedModel {
            session,
            model_path: model_path.to_path_buf(),
        });
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn detect(&self, frame: &Mat) -> Result<DetectionList, PipelineError> {
        let mut guard = self.model.lock();
        let Some(model) = guard.as_mut() else {
            return Ok(Vec::new());
        };
        if frame.cols() <= 0 || frame.rows() <= 0 {
            return Ok(Vec::new());
        }
        let config = self.config.lock().clone();

        let (input, geometry) = letterbox(frame, Size::new(config.input_width, config.input_height))?;
        let tensor_data = mat_to_chw_tensor(&input)?;
        let tensor = Tensor::from_array((
            [1usize, 3, config.input_height as usize, config.input_width as usize],
            tensor_data,
        ))
        .map_err(|e| PipelineError::Ort(format!("Failed to create input tensor: {}", e)))?;

        let started = Instant::now();
        let outputs = model
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| PipelineError::Ort(format!("YOLO inference failed: {}", e)))?;
        self.record_inference(started);

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Ort(format!("Failed to extract output tensor: {}", e)))?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        let candidates = decode_yolo_output(&dims, data, config.conf_threshold)?;
        let candidates = filter_by_confidence(candidates, config.conf_threshold);
        let kept = nms_per_class(&candidates, config.nms_threshold);
        drop(outputs);
        drop(guard);

        let labels = self.labels();
        let detections: DetectionList = kept
            .into_iter()
            .map(|mut d| {
                d.bbox = geometry.to_original(d.bbox);
                d.label = labels.name_of(d.class_id).to_string();
                d
            })
            .filter(|d| d.bbox.width > 0.0 && d.bbox.height > 0.0)
            .collect();

        debug!("Detected {} objects", detections.len());
        Ok(detections)
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    fn conf_threshold(&self) -> f32 {
        self.config.lock().conf_threshold
    }

    fn set_conf_threshold(&self, value: f32) -> Result<(), PipelineError> {
        check_threshold("conf_threshold", value)?;
        self.config.lock().conf_threshold = value;
        Ok(())
    }

    fn nms_threshold(&self) -> f32 {
        self.config.lock().nms_threshold
    }

    fn set_nms_threshold(&self, value: f32) -> Result<(), PipelineError> {
        check_threshold("nms_threshold", value)?;
        self.config.lock().nms_threshold = value;
        Ok(())
    }

    fn last_inference_ms(&self) -> f64 {
        f64::from_bits(self.last_inference_ms.load(Ordering::Relaxed))
    }

    fn labels(&self) -> Arc<LabelMap> {
        self.labels.lock().clone()
    }
}

fn build_session(model_path: &Path, backend: ComputeBackend) -> Result<Session, PipelineError> {
    let providers = match backend {
        ComputeBackend::Cpu => vec![CPUExecutionProvider::default().build()],
        ComputeBackend::Cuda => {
            warn!("CUDA requested; ONNX Runtime falls back to CPU if it is unavailable");
            vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ]
        }
    };

    Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_execution_providers(providers))
        .and_then(|b| b.commit_from_file(model_path))
        .map_err(|e| PipelineError::Model(format!("Failed to load YOLO model {:?}: {}", model_path, e)))
}
