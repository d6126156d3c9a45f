//! Face detection client and landmark localizer.
//!
//! The detection model reports, per image, a detection count plus normalized
//! boxes, scores, class ids and 5-point landmarks. Pre-processing letterboxes
//! each image into the model canvas anchored at the top-left, which is why
//! post-processing scales normalized coordinates by the larger original
//! dimension. The localizer layers confidence and eye-distance filtering on
//! top, with a single zero-fill padding retry for images where the first
//! pass finds nothing.

use crate::config::FaceDetectionParams;
use crate::geometry::euclidean_distance;
use crate::imaging::{pad_image, resize_bilinear};
use crate::inference::{Infer, InferTensor, InferenceError, ModelIo};
use crate::types::{BoundingBox, FaceCandidate, Image, Landmark5};
use ndarray::{Array4, ArrayViewD, Axis};
use std::sync::Arc;

/// Ratio of the symmetric zero-fill border added before the retry pass.
pub const PADDING_RETRY_RATIO: f32 = 0.5;

/// Output tensor order of the detection model.
const OUT_NUM_DETS: usize = 0;
const OUT_BOXES: usize = 1;
const OUT_SCORES: usize = 2;
const OUT_CLASSES: usize = 3;
const OUT_LANDMARKS: usize = 4;

/// Thin wrapper over the detection model: preprocessing, one batched
/// inference call, coordinate de-normalization.
pub struct FaceDetectionClient {
    client: Arc<dyn Infer>,
    params: FaceDetectionParams,
    io: ModelIo,
}

impl FaceDetectionClient {
    pub fn new(
        client: Arc<dyn Infer>,
        params: FaceDetectionParams,
    ) -> Result<Self, InferenceError> {
        let io = client.model_config(&params.model_name, params.timeout())?;
        if io.inputs.is_empty() || io.outputs.len() <= OUT_LANDMARKS {
            return Err(InferenceError::BadShape {
                model: params.model_name.clone(),
                got: vec![io.inputs.len(), io.outputs.len()],
                wanted: "1 input and 5 outputs".to_string(),
            });
        }
        tracing::info!(
            model = %params.model_name,
            input = ?io.inputs[0].dims,
            outputs = io.outputs.len(),
            "face detection client ready"
        );
        Ok(Self { client, params, io })
    }

    /// Canvas height and width from the model input dims `[3, H, W]`.
    fn canvas_hw(&self) -> (usize, usize) {
        let dims = &self.io.inputs[0].dims;
        (dims[dims.len() - 2], dims[dims.len() - 1])
    }

    /// Resize preserving aspect ratio into the top-left of a zero canvas,
    /// normalize, and lay out as CHW.
    fn preprocess(&self, image: &Image, canvas: &mut Array4<f32>, batch_idx: usize) {
        let (canvas_h, canvas_w) = self.canvas_hw();
        let img_ratio = image.width() as f64 / image.height() as f64;
        let model_ratio = canvas_w as f64 / canvas_h as f64;

        let (new_w, new_h) = if img_ratio > model_ratio {
            let w = canvas_w;
            (w, (w as f64 / img_ratio) as usize)
        } else {
            let h = canvas_h;
            ((h as f64 * img_ratio) as usize, h)
        };

        let resized = resize_bilinear(image, new_w.max(1) as u32, new_h.max(1) as u32);
        for y in 0..resized.height() as usize {
            for x in 0..resized.width() as usize {
                let rgb = resized.pixel(x as u32, y as u32);
                for c in 0..3 {
                    canvas[[batch_idx, c, y, x]] =
                        (rgb[c] as f32 - self.params.mean) * self.params.scale;
                }
            }
        }
    }

    /// Detect faces in a batch of images with one inference call.
    ///
    /// Returns raw (unfiltered) candidates per image, in original-image
    /// pixel coordinates.
    pub fn detect_batch(
        &self,
        images: &[&Image],
    ) -> Result<Vec<Vec<FaceCandidate>>, InferenceError> {
        let (canvas_h, canvas_w) = self.canvas_hw();
        let mut input = Array4::<f32>::zeros((images.len(), 3, canvas_h, canvas_w));
        for (b, image) in images.iter().enumerate() {
            self.preprocess(image, &mut input, b);
        }

        let outputs = self.client.infer(
            &self.params.model_name,
            self.params.timeout(),
            &[InferTensor::new(
                self.io.inputs[0].name.clone(),
                input.into_dyn(),
            )],
        )?;

        if outputs.len() <= OUT_LANDMARKS {
            return Err(InferenceError::MissingOutput {
                model: self.params.model_name.clone(),
                index: OUT_LANDMARKS,
            });
        }

        let mut results = Vec::with_capacity(images.len());
        for (b, image) in images.iter().enumerate() {
            // Coordinates are normalized against the letterbox canvas, which
            // shares its long side with the original image.
            let scale = image.width().max(image.height()) as f32;
            results.push(self.decode_image(&outputs, b, scale)?);
        }
        Ok(results)
    }

    fn decode_image(
        &self,
        outputs: &[InferTensor],
        batch_idx: usize,
        scale: f32,
    ) -> Result<Vec<FaceCandidate>, InferenceError> {
        let num_dets = row(&outputs[OUT_NUM_DETS].data, batch_idx, 1, self, OUT_NUM_DETS)?[0];
        let num_dets = num_dets.max(0.0) as usize;

        let boxes_tensor = &outputs[OUT_BOXES].data;
        if boxes_tensor.ndim() < 2 || batch_idx >= boxes_tensor.len_of(Axis(0)) {
            return Err(bad_shape(boxes_tensor.view(), self, OUT_BOXES));
        }
        let boxes = boxes_tensor.index_axis(Axis(0), batch_idx);
        let capacity = boxes.shape().first().copied().unwrap_or(0);
        let count = num_dets.min(capacity);

        let mut candidates = Vec::with_capacity(count);
        for i in 0..count {
            let bbox = det_row(&outputs[OUT_BOXES].data, batch_idx, i, 4, self, OUT_BOXES)?;
            let score = det_row(&outputs[OUT_SCORES].data, batch_idx, i, 1, self, OUT_SCORES)?[0];
            let class = det_row(&outputs[OUT_CLASSES].data, batch_idx, i, 1, self, OUT_CLASSES)?[0];
            let lmk = det_row(&outputs[OUT_LANDMARKS].data, batch_idx, i, 10, self, OUT_LANDMARKS)?;

            let mut points = [[0.0f32; 2]; 5];
            for (p, point) in points.iter_mut().enumerate() {
                point[0] = lmk[p * 2] * scale;
                point[1] = lmk[p * 2 + 1] * scale;
            }

            candidates.push(FaceCandidate {
                bbox: BoundingBox {
                    left: bbox[0] * scale,
                    top: bbox[1] * scale,
                    right: bbox[2] * scale,
                    bottom: bbox[3] * scale,
                },
                landmark: Landmark5::new(points),
                score,
                class_id: class as i32,
            });
        }
        Ok(candidates)
    }
}

/// First `len` values of `tensor[batch_idx]`, flattened.
fn row(
    tensor: &ndarray::ArrayD<f32>,
    batch_idx: usize,
    len: usize,
    client: &FaceDetectionClient,
    out_idx: usize,
) -> Result<Vec<f32>, InferenceError> {
    if batch_idx >= tensor.len_of(Axis(0)) {
        return Err(bad_shape(tensor.view(), client, out_idx));
    }
    let view = tensor.index_axis(Axis(0), batch_idx);
    let values: Vec<f32> = view.iter().copied().take(len).collect();
    if values.len() < len {
        return Err(bad_shape(tensor.view(), client, out_idx));
    }
    Ok(values)
}

/// First `len` values of `tensor[batch_idx][det_idx]`, flattened.
fn det_row(
    tensor: &ndarray::ArrayD<f32>,
    batch_idx: usize,
    det_idx: usize,
    len: usize,
    client: &FaceDetectionClient,
    out_idx: usize,
) -> Result<Vec<f32>, InferenceError> {
    if batch_idx >= tensor.len_of(Axis(0)) {
        return Err(bad_shape(tensor.view(), client, out_idx));
    }
    let per_image = tensor.index_axis(Axis(0), batch_idx);
    if det_idx >= per_image.len_of(Axis(0)) {
        return Err(bad_shape(tensor.view(), client, out_idx));
    }
    let view = per_image.index_axis(Axis(0), det_idx);
    let values: Vec<f32> = view.iter().copied().take(len).collect();
    if values.len() < len {
        return Err(bad_shape(tensor.view(), client, out_idx));
    }
    Ok(values)
}

fn bad_shape(
    view: ArrayViewD<'_, f32>,
    client: &FaceDetectionClient,
    out_idx: usize,
) -> InferenceError {
    InferenceError::BadShape {
        model: client.params.model_name.clone(),
        got: view.shape().to_vec(),
        wanted: format!("detection output {out_idx} with per-detection rows"),
    }
}

/// Filtering options for [`LandmarkLocalizer::locate`].
#[derive(Debug, Clone, Default)]
pub struct LocateOptions {
    /// Overrides the configured detector confidence threshold.
    pub score_threshold: Option<f32>,
    /// Minimum inter-eye distance in pixels; candidates below it are
    /// rejected and counted separately from zero-detection outcomes.
    pub eye_distance_threshold: Option<f32>,
    /// Retry once on a zero-padded copy when the first pass finds nothing.
    pub try_padding: bool,
}

/// Per-image localization outcome.
#[derive(Debug, Clone, Default)]
pub struct ImageCandidates {
    pub candidates: Vec<FaceCandidate>,
    /// Candidates dropped by the eye-distance filter. Lets callers that
    /// require a face distinguish "poor landmarks" from "nothing there".
    pub eye_distance_rejections: usize,
}

/// Turns raw detector output into filtered [`FaceCandidate`] lists.
pub struct LandmarkLocalizer {
    det: FaceDetectionClient,
}

impl LandmarkLocalizer {
    pub fn new(
        client: Arc<dyn Infer>,
        params: FaceDetectionParams,
    ) -> Result<Self, InferenceError> {
        Ok(Self {
            det: FaceDetectionClient::new(client, params)?,
        })
    }

    /// Locate faces in a batch of images.
    ///
    /// An image with no face after any retry yields an empty candidate
    /// list, not an error; requiring a face is the caller's policy.
    pub fn locate(
        &self,
        images: &[&Image],
        opts: &LocateOptions,
    ) -> Result<Vec<ImageCandidates>, InferenceError> {
        let score_threshold = opts
            .score_threshold
            .unwrap_or(self.det.params.score_threshold);

        let raw = self.det.detect_batch(images)?;

        let mut results = Vec::with_capacity(images.len());
        for (idx, mut detections) in raw.into_iter().enumerate() {
            if detections.is_empty() && opts.try_padding {
                detections = self.retry_with_padding(images[idx])?;
            }

            let mut out = ImageCandidates::default();
            for cand in detections {
                let eye_dist =
                    euclidean_distance(cand.landmark.left_eye(), cand.landmark.right_eye());
                if let Some(min_dist) = opts.eye_distance_threshold {
                    if eye_dist < min_dist {
                        out.eye_distance_rejections += 1;
                        continue;
                    }
                }
                if cand.score < score_threshold {
                    continue;
                }
                out.candidates.push(cand);
            }
            results.push(out);
        }
        Ok(results)
    }

    /// Single fallback pass on a padded copy. Box and landmark coordinates
    /// are shifted back so they stay consistent with the unpadded image.
    fn retry_with_padding(&self, image: &Image) -> Result<Vec<FaceCandidate>, InferenceError> {
        let (padded, off_x, off_y) = pad_image(image, PADDING_RETRY_RATIO);
        tracing::debug!(
            off_x,
            off_y,
            "no detections on first pass, retrying on padded image"
        );

        let mut retried = self.det.detect_batch(&[&padded])?;
        let detections = retried.remove(0);
        Ok(detections
            .into_iter()
            .map(|cand| FaceCandidate {
                bbox: cand.bbox.offset_by(off_x as f32, off_y as f32),
                landmark: cand.landmark.offset_by(off_x as f32, off_y as f32),
                ..cand
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::TensorSpec;
    use ndarray::{Array, ArrayD, IxDyn};
    use std::sync::Mutex;

    /// Scripted detection backend: pops one canned response per infer call.
    struct ScriptedDetector {
        responses: Mutex<Vec<Vec<Vec<RawDet>>>>,
        calls: Mutex<usize>,
    }

    #[derive(Clone)]
    struct RawDet {
        bbox: [f32; 4],
        score: f32,
        landmark: [f32; 10],
    }

    impl ScriptedDetector {
        fn new(responses: Vec<Vec<Vec<RawDet>>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    fn encode(batch: &[Vec<RawDet>]) -> Vec<InferTensor> {
        let b = batch.len();
        let n = batch.iter().map(|d| d.len()).max().unwrap_or(0).max(1);

        let mut num_dets = Array::zeros(IxDyn(&[b, 1]));
        let mut boxes = Array::zeros(IxDyn(&[b, n, 4]));
        let mut scores = Array::zeros(IxDyn(&[b, n, 1]));
        let mut classes = Array::zeros(IxDyn(&[b, n, 1]));
        let mut landmarks = Array::zeros(IxDyn(&[b, n, 10]));

        for (bi, dets) in batch.iter().enumerate() {
            num_dets[[bi, 0]] = dets.len() as f32;
            for (di, det) in dets.iter().enumerate() {
                for k in 0..4 {
                    boxes[[bi, di, k]] = det.bbox[k];
                }
                scores[[bi, di, 0]] = det.score;
                for k in 0..10 {
                    landmarks[[bi, di, k]] = det.landmark[k];
                }
            }
        }

        vec![
            InferTensor::new("num_dets", num_dets),
            InferTensor::new("boxes", boxes),
            InferTensor::new("scores", scores),
            InferTensor::new("classes", classes),
            InferTensor::new("landmarks", landmarks),
        ]
    }

    impl Infer for ScriptedDetector {
        fn model_config(
            &self,
            _model: &str,
            _timeout: std::time::Duration,
        ) -> Result<ModelIo, InferenceError> {
            Ok(ModelIo {
                inputs: vec![TensorSpec {
                    name: "input".to_string(),
                    dims: vec![3, 640, 640],
                }],
                outputs: (0..5)
                    .map(|i| TensorSpec {
                        name: format!("out_{i}"),
                        dims: vec![],
                    })
                    .collect(),
            })
        }

        fn infer(
            &self,
            _model: &str,
            _timeout: std::time::Duration,
            _inputs: &[InferTensor],
        ) -> Result<Vec<InferTensor>, InferenceError> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            assert!(!responses.is_empty(), "more infer calls than scripted");
            Ok(encode(&responses.remove(0)))
        }
    }

    fn one_face(score: f32) -> RawDet {
        // Normalized against a 200×200 image (scale = 200).
        RawDet {
            bbox: [0.2, 0.2, 0.8, 0.9],
            score,
            landmark: [0.3, 0.35, 0.7, 0.35, 0.5, 0.55, 0.35, 0.75, 0.65, 0.75],
        }
    }

    fn localizer(backend: Arc<ScriptedDetector>) -> LandmarkLocalizer {
        LandmarkLocalizer::new(backend, FaceDetectionParams::default()).unwrap()
    }

    #[test]
    fn test_coordinates_scaled_by_larger_dimension() {
        let backend = Arc::new(ScriptedDetector::new(vec![vec![vec![one_face(0.9)]]]));
        let loc = localizer(backend);

        let img = Image::new(100, 200);
        let out = loc.locate(&[&img], &LocateOptions::default()).unwrap();
        let cand = &out[0].candidates[0];
        // scale = max(100, 200) = 200
        assert_eq!(cand.bbox.left, 0.2 * 200.0);
        assert_eq!(cand.bbox.bottom, 0.9 * 200.0);
        assert_eq!(cand.landmark.left_eye(), [60.0, 70.0]);
    }

    #[test]
    fn test_score_filter() {
        let backend = Arc::new(ScriptedDetector::new(vec![vec![vec![
            one_face(0.9),
            one_face(0.3),
        ]]]));
        let loc = localizer(backend);

        let img = Image::new(200, 200);
        let out = loc.locate(&[&img], &LocateOptions::default()).unwrap();
        assert_eq!(out[0].candidates.len(), 1);
        assert_eq!(out[0].eye_distance_rejections, 0);
    }

    #[test]
    fn test_eye_distance_filter_counts_rejections() {
        let backend = Arc::new(ScriptedDetector::new(vec![vec![vec![one_face(0.9)]]]));
        let loc = localizer(backend);

        let img = Image::new(200, 200);
        // Eye distance here is (0.7 − 0.3) × 200 = 80 px.
        let opts = LocateOptions {
            eye_distance_threshold: Some(100.0),
            ..Default::default()
        };
        let out = loc.locate(&[&img], &opts).unwrap();
        assert!(out[0].candidates.is_empty());
        assert_eq!(out[0].eye_distance_rejections, 1);
    }

    #[test]
    fn test_padding_retry_subtracts_offsets() {
        // First pass: nothing. Retry pass: one face in padded coordinates.
        let backend = Arc::new(ScriptedDetector::new(vec![
            vec![vec![]],
            vec![vec![one_face(0.9)]],
        ]));
        let loc = localizer(backend.clone());

        let img = Image::new(200, 200);
        let opts = LocateOptions {
            try_padding: true,
            ..Default::default()
        };
        let out = loc.locate(&[&img], &opts).unwrap();

        assert_eq!(backend.calls(), 2, "retry must run exactly once");
        let cand = &out[0].candidates[0];
        // Padded image is 400×400, offsets are (100, 100); raw coordinates
        // scale by 400 and then shift back by the offsets.
        assert_eq!(cand.bbox.left, 0.2 * 400.0 - 100.0);
        assert_eq!(cand.bbox.top, 0.2 * 400.0 - 100.0);
        assert_eq!(cand.landmark.left_eye(), [0.3 * 400.0 - 100.0, 0.35 * 400.0 - 100.0]);
    }

    #[test]
    fn test_no_retry_without_flag() {
        let backend = Arc::new(ScriptedDetector::new(vec![vec![vec![]]]));
        let loc = localizer(backend.clone());

        let img = Image::new(200, 200);
        let out = loc.locate(&[&img], &LocateOptions::default()).unwrap();
        assert_eq!(backend.calls(), 1);
        assert!(out[0].candidates.is_empty());
    }

    /// Backend whose boxes tensor covers fewer images than its detection
    /// counts claim.
    struct ShortBatchDetector;

    impl Infer for ShortBatchDetector {
        fn model_config(
            &self,
            _model: &str,
            _timeout: std::time::Duration,
        ) -> Result<ModelIo, InferenceError> {
            Ok(ModelIo {
                inputs: vec![TensorSpec {
                    name: "input".to_string(),
                    dims: vec![3, 640, 640],
                }],
                outputs: (0..5)
                    .map(|i| TensorSpec {
                        name: format!("out_{i}"),
                        dims: vec![],
                    })
                    .collect(),
            })
        }

        fn infer(
            &self,
            _model: &str,
            _timeout: std::time::Duration,
            _inputs: &[InferTensor],
        ) -> Result<Vec<InferTensor>, InferenceError> {
            let det = one_face(0.9);
            Ok(vec![
                InferTensor::new(
                    "num_dets",
                    ArrayD::from_shape_vec(vec![2, 1], vec![1.0, 1.0]).unwrap(),
                ),
                // One image worth of boxes for a two-image batch.
                InferTensor::new(
                    "boxes",
                    ArrayD::from_shape_vec(vec![1, 1, 4], det.bbox.to_vec()).unwrap(),
                ),
                InferTensor::new(
                    "scores",
                    ArrayD::from_shape_vec(vec![2, 1, 1], vec![det.score; 2]).unwrap(),
                ),
                InferTensor::new(
                    "classes",
                    ArrayD::from_shape_vec(vec![2, 1, 1], vec![0.0; 2]).unwrap(),
                ),
                InferTensor::new(
                    "landmarks",
                    ArrayD::from_shape_vec(
                        vec![2, 1, 10],
                        det.landmark.iter().chain(det.landmark.iter()).copied().collect(),
                    )
                    .unwrap(),
                ),
            ])
        }
    }

    #[test]
    fn test_boxes_batch_shorter_than_images_is_bad_shape() {
        let loc = LandmarkLocalizer::new(Arc::new(ShortBatchDetector), FaceDetectionParams::default())
            .unwrap();
        let (a, b) = (Image::new(200, 200), Image::new(200, 200));
        let err = loc.locate(&[&a, &b], &LocateOptions::default()).unwrap_err();
        assert!(matches!(err, InferenceError::BadShape { .. }), "got {err:?}");
    }

    #[test]
    fn test_empty_after_retry_is_not_an_error() {
        let backend = Arc::new(ScriptedDetector::new(vec![vec![vec![]], vec![vec![]]]));
        let loc = localizer(backend.clone());

        let img = Image::new(200, 200);
        let opts = LocateOptions {
            try_padding: true,
            ..Default::default()
        };
        let out = loc.locate(&[&img], &opts).unwrap();
        assert_eq!(backend.calls(), 2);
        assert!(out[0].candidates.is_empty());
    }
}
