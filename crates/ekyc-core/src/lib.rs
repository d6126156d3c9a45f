//! ekyc-core — Face verification pipeline for eKYC flows.
//!
//! Geometric face localization and alignment plus multi-signal decision
//! fusion: same-person consistency across far/mid/near shots, obstruction
//! scoring, liveness, and document-to-selfie matching. All neural models
//! run behind the [`inference::Infer`] boundary.

pub mod alignment;
pub mod antispoof;
pub mod config;
pub mod detector;
pub mod geometry;
pub mod imaging;
pub mod inference;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod selector;
pub mod types;

pub use config::PipelineConfig;
pub use inference::{Infer, InferTensor, InferenceError, ModelIo, TensorSpec};
pub use pipeline::{EkycPipeline, LocatedFace, PipelineError, VerifyFailure};
pub use types::{BoundingBox, FaceCandidate, Image, Landmark5, VerificationResult, UNSCORED};
