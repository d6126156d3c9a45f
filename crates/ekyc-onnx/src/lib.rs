//! ekyc-onnx — Local ONNX Runtime backend for the ekyc-core inference
//! boundary.
//!
//! Loads every `.onnx` file in a model directory, keyed by file stem, and
//! serves [`Infer`] calls from in-process sessions. With local execution
//! the per-model timeout is advisory: a session run is synchronous and is
//! never interrupted mid-flight.

use ekyc_core::inference::{Infer, InferTensor, InferenceError, ModelIo, TensorSpec};
use ndarray::ArrayD;
use ort::session::{Session, SessionInputValue, SessionInputs};
use ort::value::{TensorRef, ValueType};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("model directory {0}: {1}")]
    ModelDir(String, std::io::Error),
    #[error("no .onnx models found in {0}")]
    NoModels(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

struct LoadedModel {
    session: Mutex<Session>,
    io: ModelIo,
}

/// ONNX Runtime implementation of the inference boundary.
pub struct OrtInference {
    models: HashMap<String, LoadedModel>,
}

impl OrtInference {
    /// Load every ONNX model found directly under `model_dir`. The model
    /// name seen by the pipeline is the file stem, so `scrfd.onnx` serves
    /// requests for model `"scrfd"`.
    pub fn load(model_dir: &Path) -> Result<Self, BackendError> {
        let dir_label = || model_dir.display().to_string();
        let entries =
            std::fs::read_dir(model_dir).map_err(|e| BackendError::ModelDir(dir_label(), e))?;

        let mut models = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackendError::ModelDir(dir_label(), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let session = Session::builder()?
                .with_intra_threads(2)?
                .commit_from_file(&path)?;
            let io = describe(&session);
            tracing::info!(
                model = name,
                path = %path.display(),
                inputs = io.inputs.len(),
                outputs = io.outputs.len(),
                "loaded ONNX model"
            );
            models.insert(
                name.to_string(),
                LoadedModel {
                    session: Mutex::new(session),
                    io,
                },
            );
        }

        if models.is_empty() {
            return Err(BackendError::NoModels(dir_label()));
        }
        Ok(Self { models })
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    fn model(&self, name: &str) -> Result<&LoadedModel, InferenceError> {
        self.models
            .get(name)
            .ok_or_else(|| InferenceError::Transport {
                model: name.to_string(),
                message: "model not loaded".to_string(),
            })
    }
}

impl Infer for OrtInference {
    fn model_config(&self, model: &str, _timeout: Duration) -> Result<ModelIo, InferenceError> {
        Ok(self.model(model)?.io.clone())
    }

    fn infer(
        &self,
        model: &str,
        _timeout: Duration,
        inputs: &[InferTensor],
    ) -> Result<Vec<InferTensor>, InferenceError> {
        let loaded = self.model(model)?;
        let transport = |message: String| InferenceError::Transport {
            model: model.to_string(),
            message,
        };

        let pairs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = inputs
            .iter()
            .map(|t| {
                let tensor =
                    TensorRef::from_array_view(t.data.view()).map_err(|e| transport(e.to_string()))?;
                Ok((Cow::from(t.name.as_str()), SessionInputValue::from(tensor)))
            })
            .collect::<Result<_, InferenceError>>()?;

        let mut session = loaded
            .session
            .lock()
            .map_err(|_| transport("session lock poisoned".to_string()))?;
        let outputs = session
            .run(SessionInputs::from(pairs))
            .map_err(|e| transport(e.to_string()))?;

        let mut result = Vec::with_capacity(loaded.io.outputs.len());
        for (idx, spec) in loaded.io.outputs.iter().enumerate() {
            let value = &outputs[idx];
            // Integer-typed outputs (detection counts, class ids) widen to
            // f32 per the boundary contract.
            let array = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
                build_array(shape, data.to_vec(), model, idx)?
            } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
                build_array(shape, data.iter().map(|&v| v as f32).collect(), model, idx)?
            } else if let Ok((shape, data)) = value.try_extract_tensor::<i32>() {
                build_array(shape, data.iter().map(|&v| v as f32).collect(), model, idx)?
            } else {
                return Err(transport(format!(
                    "output {} has an unsupported element type",
                    spec.name
                )));
            };
            result.push(InferTensor::new(spec.name.clone(), array));
        }
        Ok(result)
    }
}

fn build_array(
    shape: &ort::tensor::Shape,
    data: Vec<f32>,
    model: &str,
    idx: usize,
) -> Result<ArrayD<f32>, InferenceError> {
    let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    ArrayD::from_shape_vec(dims.clone(), data).map_err(|_| InferenceError::BadShape {
        model: model.to_string(),
        got: dims,
        wanted: format!("well-formed output {idx}"),
    })
}

/// Tensor layout of a loaded session, with dynamic axes dropped.
fn describe(session: &Session) -> ModelIo {
    let spec_of = |name: &str, dtype: &ValueType| {
        let dims = match dtype {
            ValueType::Tensor { shape, .. } => {
                shape.iter().filter(|&&d| d > 0).map(|&d| d as usize).collect()
            }
            _ => Vec::new(),
        };
        TensorSpec {
            name: name.to_string(),
            dims,
        }
    };

    ModelIo {
        inputs: session
            .inputs()
            .iter()
            .map(|i| spec_of(i.name(), i.dtype()))
            .collect(),
        outputs: session
            .outputs()
            .iter()
            .map(|o| spec_of(o.name(), o.dtype()))
            .collect(),
    }
}
