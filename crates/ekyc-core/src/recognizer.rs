//! Face identity embedding client.
//!
//! Consumes recognition-aligned square crops and produces one embedding per
//! crop. Embeddings are returned as the model emits them; callers compare
//! them with [`crate::geometry::cosine_similarity`], which normalizes
//! internally.

use crate::config::FaceIdParams;
use crate::imaging::resize_bilinear;
use crate::inference::{Infer, InferTensor, InferenceError, ModelIo};
use crate::types::Image;
use ndarray::Array4;
use std::sync::Arc;

pub struct FaceIdClient {
    client: Arc<dyn Infer>,
    params: FaceIdParams,
    io: ModelIo,
}

impl FaceIdClient {
    pub fn new(client: Arc<dyn Infer>, params: FaceIdParams) -> Result<Self, InferenceError> {
        let io = client.model_config(&params.model_name, params.timeout())?;
        if io.inputs.is_empty() || io.outputs.is_empty() {
            return Err(InferenceError::BadShape {
                model: params.model_name.clone(),
                got: vec![io.inputs.len(), io.outputs.len()],
                wanted: "1 input and 1 output".to_string(),
            });
        }
        tracing::info!(
            model = %params.model_name,
            output = ?io.outputs[0].dims,
            "face id client ready"
        );
        Ok(Self { client, params, io })
    }

    pub fn params(&self) -> &FaceIdParams {
        &self.params
    }

    fn preprocess(&self, crop: &Image) -> Array4<f32> {
        let size = self.params.input_size;
        let resized = if crop.width() == size && crop.height() == size {
            crop.clone()
        } else {
            resize_bilinear(crop, size, size)
        };

        let size = size as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                let rgb = resized.pixel(x as u32, y as u32);
                for c in 0..3 {
                    input[[0, c, y, x]] =
                        (rgb[c] as f32 - self.params.mean) * self.params.scale;
                }
            }
        }
        input
    }

    /// Embed one aligned crop.
    pub fn embed(&self, crop: &Image) -> Result<Vec<f32>, InferenceError> {
        let input = self.preprocess(crop);
        let outputs = self.client.infer(
            &self.params.model_name,
            self.params.timeout(),
            &[InferTensor::new(
                self.io.inputs[0].name.clone(),
                input.into_dyn(),
            )],
        )?;

        let embedding = outputs.first().ok_or_else(|| InferenceError::MissingOutput {
            model: self.params.model_name.clone(),
            index: 0,
        })?;
        Ok(embedding.data.iter().copied().collect())
    }

    /// Embed several crops, one inference call per crop.
    pub fn embed_all(&self, crops: &[Image]) -> Result<Vec<Vec<f32>>, InferenceError> {
        crops.iter().map(|crop| self.embed(crop)).collect()
    }
}
