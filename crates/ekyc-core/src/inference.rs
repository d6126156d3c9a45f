//! The inference boundary.
//!
//! Every neural network the pipeline consumes sits behind a single trait:
//! named, shaped f32 tensors in, named, shaped f32 tensors out, bounded by a
//! per-model timeout. The core never learns whether a backend runs sessions
//! locally or forwards them to a remote serving endpoint.

use ndarray::ArrayD;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    /// Transport-level failure from the backend, surfaced verbatim.
    #[error("inference transport error for model {model}: {message}")]
    Transport { model: String, message: String },
    #[error("inference call for model {model} timed out after {timeout:?}")]
    Timeout { model: String, timeout: Duration },
    #[error("model {model} returned no output at index {index}")]
    MissingOutput { model: String, index: usize },
    #[error("model {model} returned tensor with unexpected shape {got:?} (wanted {wanted})")]
    BadShape {
        model: String,
        got: Vec<usize>,
        wanted: String,
    },
}

/// A named tensor crossing the inference boundary.
#[derive(Debug, Clone)]
pub struct InferTensor {
    pub name: String,
    pub data: ArrayD<f32>,
}

impl InferTensor {
    pub fn new(name: impl Into<String>, data: ArrayD<f32>) -> Self {
        Self { name: name.into(), data }
    }
}

/// Declared name and dimensions of one model input or output tensor.
#[derive(Debug, Clone)]
pub struct TensorSpec {
    pub name: String,
    /// Dimensions excluding any dynamic batch axis, e.g. `[3, 640, 640]`.
    pub dims: Vec<usize>,
}

/// Input/output tensor layout of one model, fetched once at pipeline
/// construction and cached for its lifetime.
#[derive(Debug, Clone)]
pub struct ModelIo {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

/// The opaque inference capability.
///
/// Implementations must be safe for concurrent calls; the pipeline shares
/// one client across all of its model wrappers. Integer-typed model outputs
/// (detection counts, class ids) are widened to f32 by the backend. Timeouts
/// propagate as [`InferenceError::Timeout`] and are never retried here.
pub trait Infer: Send + Sync {
    /// Fetch the tensor layout of `model`.
    fn model_config(&self, model: &str, timeout: Duration) -> Result<ModelIo, InferenceError>;

    /// Run `model` on `inputs`, returning its outputs in declaration order.
    fn infer(
        &self,
        model: &str,
        timeout: Duration,
        inputs: &[InferTensor],
    ) -> Result<Vec<InferTensor>, InferenceError>;
}
