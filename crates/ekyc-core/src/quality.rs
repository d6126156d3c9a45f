//! Face quality client.
//!
//! Scores recognition-aligned crops for obstruction. The model emits one
//! score row per crop; column 2 is the "cover" probability (mask, hand,
//! other occlusion), and the batch verdict is the worst crop.

use crate::config::FaceQualityParams;
use crate::imaging::resize_bilinear;
use crate::inference::{Infer, InferTensor, InferenceError, ModelIo};
use crate::types::Image;
use ndarray::Array4;
use std::sync::Arc;

/// Column of the quality output row holding the obstruction probability.
const COVER_COLUMN: usize = 2;

pub struct FaceQualityClient {
    client: Arc<dyn Infer>,
    params: FaceQualityParams,
    io: ModelIo,
}

impl FaceQualityClient {
    pub fn new(
        client: Arc<dyn Infer>,
        params: FaceQualityParams,
    ) -> Result<Self, InferenceError> {
        let io = client.model_config(&params.model_name, params.timeout())?;
        if io.inputs.is_empty() || io.outputs.is_empty() {
            return Err(InferenceError::BadShape {
                model: params.model_name.clone(),
                got: vec![io.inputs.len(), io.outputs.len()],
                wanted: "1 input and 1 output".to_string(),
            });
        }
        tracing::info!(model = %params.model_name, "face quality client ready");
        Ok(Self { client, params, io })
    }

    pub fn params(&self) -> &FaceQualityParams {
        &self.params
    }

    fn preprocess(&self, crop: &Image, batch: &mut Array4<f32>, batch_idx: usize) {
        let size = self.params.input_size;
        let resized = if crop.width() == size && crop.height() == size {
            crop.clone()
        } else {
            resize_bilinear(crop, size, size)
        };

        for y in 0..size as usize {
            for x in 0..size as usize {
                let rgb = resized.pixel(x as u32, y as u32);
                for c in 0..3 {
                    batch[[batch_idx, c, y, x]] =
                        (rgb[c] as f32 - self.params.mean[c]) * self.params.scale[c];
                }
            }
        }
    }

    /// Obstruction score over a batch of crops: the maximum per-crop cover
    /// probability, one inference call for the whole batch.
    pub fn mask_score(&self, crops: &[Image]) -> Result<f32, InferenceError> {
        if crops.is_empty() {
            return Ok(0.0);
        }

        let size = self.params.input_size as usize;
        let mut input = Array4::<f32>::zeros((crops.len(), 3, size, size));
        for (b, crop) in crops.iter().enumerate() {
            self.preprocess(crop, &mut input, b);
        }

        let outputs = self.client.infer(
            &self.params.model_name,
            self.params.timeout(),
            &[InferTensor::new(
                self.io.inputs[0].name.clone(),
                input.into_dyn(),
            )],
        )?;
        let scores = outputs.first().ok_or_else(|| InferenceError::MissingOutput {
            model: self.params.model_name.clone(),
            index: 0,
        })?;

        let shape = scores.data.shape().to_vec();
        if shape.len() != 2 || shape[0] != crops.len() || shape[1] <= COVER_COLUMN {
            return Err(InferenceError::BadShape {
                model: self.params.model_name.clone(),
                got: shape,
                wanted: format!("[{}, >{}]", crops.len(), COVER_COLUMN),
            });
        }

        let mut worst = f32::MIN;
        for b in 0..crops.len() {
            worst = worst.max(scores.data[[b, COVER_COLUMN]]);
        }
        Ok(worst)
    }
}
