//! Anti-spoofing (liveness) client.
//!
//! A liveness model consumes the far, mid and near shots of one challenge as
//! three named inputs and emits a two-class output; element 1 is the live
//! probability. Two instances run per verification: one over aligned face
//! crops and one over the raw full frames.

use crate::config::AntiSpoofParams;
use crate::imaging::resize_bilinear;
use crate::inference::{Infer, InferTensor, InferenceError, ModelIo};
use crate::types::Image;
use ndarray::Array4;
use std::sync::Arc;

/// Element of the output vector holding the live probability.
const LIVE_INDEX: usize = 1;

pub struct FaceAntiSpoofingClient {
    client: Arc<dyn Infer>,
    params: AntiSpoofParams,
    io: ModelIo,
}

impl FaceAntiSpoofingClient {
    pub fn new(client: Arc<dyn Infer>, params: AntiSpoofParams) -> Result<Self, InferenceError> {
        let io = client.model_config(&params.model_name, params.timeout())?;
        if io.inputs.len() != 3 || io.outputs.is_empty() {
            return Err(InferenceError::BadShape {
                model: params.model_name.clone(),
                got: vec![io.inputs.len(), io.outputs.len()],
                wanted: "3 inputs and 1 output".to_string(),
            });
        }
        tracing::info!(model = %params.model_name, "anti-spoofing client ready");
        Ok(Self { client, params, io })
    }

    pub fn params(&self) -> &AntiSpoofParams {
        &self.params
    }

    fn preprocess(&self, image: &Image) -> Array4<f32> {
        let size = self.params.input_size;
        let resized = if image.width() == size && image.height() == size {
            image.clone()
        } else {
            resize_bilinear(image, size, size)
        };

        let size = size as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                let rgb = resized.pixel(x as u32, y as u32);
                for c in 0..3 {
                    let unit = rgb[c] as f32 / 255.0;
                    input[[0, c, y, x]] = (unit - self.params.mean[c]) / self.params.std[c];
                }
            }
        }
        input
    }

    /// Live probability for one far/mid/near triplet.
    pub fn liveness_score(
        &self,
        far: &Image,
        mid: &Image,
        near: &Image,
    ) -> Result<f32, InferenceError> {
        let inputs: Vec<InferTensor> = [far, mid, near]
            .iter()
            .zip(self.io.inputs.iter())
            .map(|(image, spec)| {
                InferTensor::new(spec.name.clone(), self.preprocess(image).into_dyn())
            })
            .collect();

        let outputs =
            self.client
                .infer(&self.params.model_name, self.params.timeout(), &inputs)?;
        let scores = outputs.first().ok_or_else(|| InferenceError::MissingOutput {
            model: self.params.model_name.clone(),
            index: 0,
        })?;

        let flat: Vec<f32> = scores.data.iter().copied().collect();
        if flat.len() <= LIVE_INDEX {
            return Err(InferenceError::BadShape {
                model: self.params.model_name.clone(),
                got: scores.data.shape().to_vec(),
                wanted: format!("at least {} elements", LIVE_INDEX + 1),
            });
        }
        Ok(flat[LIVE_INDEX])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::TensorSpec;
    use ndarray::ArrayD;
    use std::sync::Mutex;
    use std::time::Duration;

    struct TripletBackend {
        output: Vec<f32>,
        seen_names: Mutex<Vec<Vec<String>>>,
    }

    impl Infer for TripletBackend {
        fn model_config(
            &self,
            _model: &str,
            _timeout: Duration,
        ) -> Result<ModelIo, InferenceError> {
            Ok(ModelIo {
                inputs: vec![
                    TensorSpec { name: "far".to_string(), dims: vec![3, 224, 224] },
                    TensorSpec { name: "mid".to_string(), dims: vec![3, 224, 224] },
                    TensorSpec { name: "near".to_string(), dims: vec![3, 224, 224] },
                ],
                outputs: vec![TensorSpec { name: "prob".to_string(), dims: vec![2] }],
            })
        }

        fn infer(
            &self,
            _model: &str,
            _timeout: Duration,
            inputs: &[InferTensor],
        ) -> Result<Vec<InferTensor>, InferenceError> {
            self.seen_names
                .lock()
                .unwrap()
                .push(inputs.iter().map(|t| t.name.clone()).collect());
            for t in inputs {
                assert_eq!(t.data.shape(), &[1, 3, 224, 224]);
            }
            Ok(vec![InferTensor::new(
                "prob",
                ArrayD::from_shape_vec(vec![1, self.output.len()], self.output.clone()).unwrap(),
            )])
        }
    }

    fn client(output: Vec<f32>) -> (Arc<TripletBackend>, FaceAntiSpoofingClient) {
        let backend = Arc::new(TripletBackend {
            output,
            seen_names: Mutex::new(Vec::new()),
        });
        let client =
            FaceAntiSpoofingClient::new(backend.clone(), AntiSpoofParams::crop_default()).unwrap();
        (backend, client)
    }

    #[test]
    fn test_score_is_second_element() {
        let (_, client) = client(vec![0.2, 0.8]);
        let img = Image::new(224, 224);
        let score = client.liveness_score(&img, &img, &img).unwrap();
        assert!((score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_inputs_follow_declared_names_and_order() {
        let (backend, client) = client(vec![0.5, 0.5]);
        let img = Image::new(64, 64);
        client.liveness_score(&img, &img, &img).unwrap();
        let seen = backend.seen_names.lock().unwrap();
        assert_eq!(seen[0], vec!["far", "mid", "near"]);
    }

    #[test]
    fn test_single_class_output_is_bad_shape() {
        let (_, client) = client(vec![0.9]);
        let img = Image::new(224, 224);
        let err = client.liveness_score(&img, &img, &img).unwrap_err();
        assert!(matches!(err, InferenceError::BadShape { .. }));
    }
}
