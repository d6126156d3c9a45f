//! The verification engine tying every stage together.
//!
//! Each verb runs a sequential chain: locate landmarks, select one face,
//! align onto the purpose-specific template, score the external models,
//! fuse the scores. Verification flows accumulate into a
//! [`VerificationResult`] in stage order (same-person, quality, liveness);
//! when a later stage fails, the partially filled result travels with the
//! error instead of being discarded.

use crate::alignment::{AlignmentError, FaceAligner};
use crate::antispoof::FaceAntiSpoofingClient;
use crate::config::PipelineConfig;
use crate::detector::{LandmarkLocalizer, LocateOptions};
use crate::geometry::{cosine_similarity, GeometryError};
use crate::inference::{Infer, InferenceError};
use crate::quality::FaceQualityClient;
use crate::recognizer::FaceIdClient;
use crate::selector::{select, SelectionPolicy};
use crate::types::{BoundingBox, Image, Landmark5, VerificationResult};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no face detected in {0} image")]
    NoFaceDetected(&'static str),
    #[error("face in {0} image rejected by the eye-distance filter")]
    LowLandmarkQuality(&'static str),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// A verification-flow failure carrying whatever the completed stages
/// already scored.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct VerifyFailure {
    pub partial: VerificationResult,
    #[source]
    pub source: PipelineError,
}

fn fail(partial: &VerificationResult, source: impl Into<PipelineError>) -> VerifyFailure {
    VerifyFailure {
        partial: partial.clone(),
        source: source.into(),
    }
}

/// One selected face: its box and landmarks in original-image coordinates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LocatedFace {
    pub bbox: BoundingBox,
    pub landmark: Landmark5,
}

const TRIPLET_LABELS: [&str; 3] = ["far", "mid", "near"];

/// Face verification pipeline over a shared inference backend.
///
/// Construction fetches and caches every model's tensor layout; after that
/// the pipeline holds only read-only configuration and templates, so one
/// instance serves concurrent requests.
pub struct EkycPipeline {
    localizer: LandmarkLocalizer,
    aligner: FaceAligner,
    face_id: FaceIdClient,
    quality: FaceQualityClient,
    spoof_crop: FaceAntiSpoofingClient,
    spoof_full: FaceAntiSpoofingClient,
    eye_distance_threshold: Option<f32>,
}

impl EkycPipeline {
    pub fn new(client: Arc<dyn Infer>, config: PipelineConfig) -> Result<Self, InferenceError> {
        let aligner = FaceAligner::new(
            config.face_id.input_size,
            config.antispoof_crop.input_size,
        );
        let eye_distance_threshold = config.detection.eye_distance_threshold;
        Ok(Self {
            localizer: LandmarkLocalizer::new(client.clone(), config.detection)?,
            aligner,
            face_id: FaceIdClient::new(client.clone(), config.face_id)?,
            quality: FaceQualityClient::new(client.clone(), config.quality)?,
            spoof_crop: FaceAntiSpoofingClient::new(client.clone(), config.antispoof_crop)?,
            spoof_full: FaceAntiSpoofingClient::new(client, config.antispoof_full)?,
            eye_distance_threshold,
        })
    }

    fn locate_opts(&self, try_padding: bool) -> LocateOptions {
        LocateOptions {
            score_threshold: None,
            eye_distance_threshold: self.eye_distance_threshold,
            try_padding,
        }
    }

    /// Locate one face per image under a selection policy. `None` marks an
    /// image without any accepted face; whether that is an error is flow
    /// policy. The second tuple element counts eye-distance rejections, so
    /// requiring flows can tell poor landmarks from an empty frame.
    fn select_faces(
        &self,
        images: &[&Image],
        policy: SelectionPolicy,
        try_padding: bool,
    ) -> Result<Vec<(Option<LocatedFace>, usize)>, PipelineError> {
        let per_image = self
            .localizer
            .locate(images, &self.locate_opts(try_padding))?;

        Ok(images
            .iter()
            .zip(per_image.into_iter())
            .map(|(image, found)| {
                let picked = select(&found.candidates, policy, image.width(), image.height())
                    .map(|idx| LocatedFace {
                        bbox: found.candidates[idx].bbox,
                        landmark: found.candidates[idx].landmark,
                    });
                (picked, found.eye_distance_rejections)
            })
            .collect())
    }

    /// Like [`Self::select_faces`] but every image must contain a face.
    fn require_faces(
        &self,
        images: &[&Image],
        policy: SelectionPolicy,
        try_padding: bool,
    ) -> Result<Vec<LocatedFace>, PipelineError> {
        let faces = self.select_faces(images, policy, try_padding)?;
        faces
            .into_iter()
            .enumerate()
            .map(|(idx, (face, rejections))| match face {
                Some(face) => Ok(face),
                None if rejections > 0 => Err(PipelineError::LowLandmarkQuality(label_for(
                    images.len(),
                    idx,
                ))),
                None => Err(PipelineError::NoFaceDetected(label_for(images.len(), idx))),
            })
            .collect()
    }

    fn require_face(
        &self,
        image: &Image,
        policy: SelectionPolicy,
        try_padding: bool,
        label: &'static str,
    ) -> Result<LocatedFace, PipelineError> {
        let mut faces = self.select_faces(&[image], policy, try_padding)?;
        match faces.remove(0) {
            (Some(face), _) => Ok(face),
            (None, rejections) if rejections > 0 => {
                Err(PipelineError::LowLandmarkQuality(label))
            }
            (None, _) => Err(PipelineError::NoFaceDetected(label)),
        }
    }

    /// Landmarks for a batch of images, one center-selected face per image
    /// with the padding retry enabled. Images without a face yield `None`.
    pub fn locate_landmarks(
        &self,
        images: &[&Image],
    ) -> Result<Vec<Option<LocatedFace>>, PipelineError> {
        Ok(self
            .select_faces(images, SelectionPolicy::ClosestToCenter, true)?
            .into_iter()
            .map(|(face, _)| face)
            .collect())
    }

    /// Active verification: caller-supplied landmarks are trusted, missing
    /// ones are derived per image (largest face, padding retry).
    pub fn verify_active(
        &self,
        far: &Image,
        mid: &Image,
        near: &Image,
        far_landmark: Option<Landmark5>,
        mid_landmark: Option<Landmark5>,
        near_landmark: Option<Landmark5>,
    ) -> Result<VerificationResult, VerifyFailure> {
        let images = [far, mid, near];
        let supplied = [far_landmark, mid_landmark, near_landmark];

        let mut landmarks = Vec::with_capacity(3);
        for (idx, lmk) in supplied.into_iter().enumerate() {
            let lmk = match lmk {
                Some(lmk) => lmk,
                None => {
                    self.require_face(
                        images[idx],
                        SelectionPolicy::Largest,
                        true,
                        TRIPLET_LABELS[idx],
                    )
                    .map_err(|e| fail(&VerificationResult::default(), e))?
                    .landmark
                }
            };
            landmarks.push(lmk);
        }

        self.run_checks(images, [landmarks[0], landmarks[1], landmarks[2]])
    }

    /// Passive verification: landmarks are always re-derived per image
    /// (largest face, padding retry), no external landmark input is trusted.
    pub fn verify_passive(
        &self,
        far: &Image,
        mid: &Image,
        near: &Image,
    ) -> Result<VerificationResult, VerifyFailure> {
        let images = [far, mid, near];
        let faces = self
            .require_faces(&images, SelectionPolicy::Largest, true)
            .map_err(|e| fail(&VerificationResult::default(), e))?;

        self.run_checks(
            images,
            [faces[0].landmark, faces[1].landmark, faces[2].landmark],
        )
    }

    /// Stage chain shared by both verification flows.
    fn run_checks(
        &self,
        images: [&Image; 3],
        landmarks: [Landmark5; 3],
    ) -> Result<VerificationResult, VerifyFailure> {
        let mut result = VerificationResult::default();

        // Same-person: recognition-aligned crops, embeddings, adjacent-pair
        // cosine similarity. The crops are reused by the quality stage.
        let crops = self
            .aligner
            .align_batch(&images, &landmarks, self.aligner.recognition())
            .map_err(|e| fail(&result, e))?;
        let embeddings = self.face_id.embed_all(&crops).map_err(|e| fail(&result, e))?;

        let score_fm =
            cosine_similarity(&embeddings[0], &embeddings[1]).map_err(|e| fail(&result, e))?;
        let score_mn =
            cosine_similarity(&embeddings[1], &embeddings[2]).map_err(|e| fail(&result, e))?;
        result.score_fm = score_fm;
        result.score_mn = score_mn;
        let tau = self.face_id.params().threshold_same_person;
        result.is_same_person = score_fm >= tau && score_mn >= tau;

        // Quality (obstruction) over the same recognition crops.
        let mask_score = self.quality.mask_score(&crops).map_err(|e| fail(&result, e))?;
        result.face_mask_score = mask_score;
        result.is_face_mask = mask_score > self.quality.params().threshold_cover;

        // Liveness: the crop model sees anti-spoofing-aligned crops, the
        // full model sees the raw frames.
        let fas_crops = self
            .aligner
            .align_batch(&images, &landmarks, self.aligner.anti_spoofing())
            .map_err(|e| fail(&result, e))?;
        let crop_score = self
            .spoof_crop
            .liveness_score(&fas_crops[0], &fas_crops[1], &fas_crops[2])
            .map_err(|e| fail(&result, e))?;
        result.liveness_score_crop = crop_score;

        let full_score = self
            .spoof_full
            .liveness_score(images[0], images[1], images[2])
            .map_err(|e| fail(&result, e))?;
        result.liveness_score_full = full_score;

        result.is_liveness = crop_score > self.spoof_crop.params().threshold
            && full_score > self.spoof_full.params().threshold;

        Ok(result)
    }

    /// Match a document photo against a live selfie. The document face is
    /// largest-selected; the selfie landmark, when not supplied, is derived
    /// center-selected. Thresholded against the looser document threshold.
    pub fn match_document(
        &self,
        document: &Image,
        selfie: &Image,
        selfie_landmark: Option<Landmark5>,
    ) -> Result<(f32, bool), PipelineError> {
        let doc_face =
            self.require_face(document, SelectionPolicy::Largest, true, "document")?;
        let selfie_landmark = match selfie_landmark {
            Some(lmk) => lmk,
            None => {
                self.require_face(selfie, SelectionPolicy::ClosestToCenter, true, "selfie")?
                    .landmark
            }
        };

        let crops = self.aligner.align_batch(
            &[document, selfie],
            &[doc_face.landmark, selfie_landmark],
            self.aligner.recognition(),
        )?;
        let embeddings = self.face_id.embed_all(&crops)?;
        let score = cosine_similarity(&embeddings[0], &embeddings[1])?;
        let is_match = score >= self.face_id.params().threshold_document;
        Ok((score, is_match))
    }

    /// Obstruction check on a far/mid/near triplet. Missing landmarks are
    /// derived the same way the active verify flow derives them.
    pub fn check_quality(
        &self,
        far: &Image,
        mid: &Image,
        near: &Image,
        far_landmark: Option<Landmark5>,
        mid_landmark: Option<Landmark5>,
        near_landmark: Option<Landmark5>,
    ) -> Result<(f32, bool), PipelineError> {
        let images = [far, mid, near];
        let supplied = [far_landmark, mid_landmark, near_landmark];

        let mut landmarks = Vec::with_capacity(3);
        for (idx, lmk) in supplied.into_iter().enumerate() {
            landmarks.push(match lmk {
                Some(lmk) => lmk,
                None => {
                    self.require_face(
                        images[idx],
                        SelectionPolicy::Largest,
                        true,
                        TRIPLET_LABELS[idx],
                    )?
                    .landmark
                }
            });
        }

        let crops = self
            .aligner
            .align_batch(&images, &landmarks, self.aligner.recognition())?;
        let score = self.quality.mask_score(&crops)?;
        Ok((score, score > self.quality.params().threshold_cover))
    }

    /// Identity embedding for one image. A missing landmark is derived
    /// center-selected without the padding retry.
    pub fn extract_embedding(
        &self,
        image: &Image,
        landmark: Option<Landmark5>,
    ) -> Result<Vec<f32>, PipelineError> {
        let landmark = match landmark {
            Some(lmk) => lmk,
            None => {
                self.require_face(image, SelectionPolicy::ClosestToCenter, false, "input")?
                    .landmark
            }
        };
        let (crop, _) = self
            .aligner
            .align(image, &landmark, self.aligner.recognition())?;
        Ok(self.face_id.embed(&crop)?)
    }

    /// Document-photo crop of the largest face in a selfie.
    pub fn crop_selfie(&self, image: &Image) -> Result<Image, PipelineError> {
        let face = self.require_face(image, SelectionPolicy::Largest, false, "selfie")?;
        let (crop, _) = self
            .aligner
            .align_document(image, &face.landmark, &face.bbox)?;
        Ok(crop)
    }

    /// Document-photo crop of the face on an identity document, selected by
    /// proximity to the image center.
    pub fn crop_document_face(&self, image: &Image) -> Result<Image, PipelineError> {
        let face =
            self.require_face(image, SelectionPolicy::ClosestToCenter, false, "document")?;
        let (crop, _) = self
            .aligner
            .align_document(image, &face.landmark, &face.bbox)?;
        Ok(crop)
    }
}

/// Label for image `idx` in a call of `total` images. Verification triplets
/// get their distance names; everything else is positional.
fn label_for(total: usize, idx: usize) -> &'static str {
    if total == 3 {
        TRIPLET_LABELS[idx]
    } else {
        match idx {
            0 => "first",
            1 => "second",
            _ => "later",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AntiSpoofParams, FaceIdParams, PipelineConfig};
    use crate::inference::{InferTensor, ModelIo, TensorSpec};
    use crate::types::UNSCORED;
    use ndarray::ArrayD;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves all five models of the default configuration with canned
    /// outputs, one synthetic face per image.
    struct MockZoo {
        detect_face: bool,
        embedding: Vec<f32>,
        cover_score: f32,
        crop_live: f32,
        full_live: f32,
        fail_full_spoof: bool,
        detect_calls: Mutex<usize>,
    }

    impl Default for MockZoo {
        fn default() -> Self {
            Self {
                detect_face: true,
                embedding: vec![1.0, 0.0],
                cover_score: 0.12,
                crop_live: 0.7,
                full_live: 0.6,
                fail_full_spoof: false,
                detect_calls: Mutex::new(0),
            }
        }
    }

    // Normalized detection for a 200×200 test image: eyes at (80,60) and
    // (120,60), nose (100,85), mouth (85,110) and (115,110).
    const DET_BOX: [f32; 4] = [0.3, 0.2, 0.7, 0.65];
    const DET_LANDMARK: [f32; 10] = [
        0.4, 0.3, 0.6, 0.3, 0.5, 0.425, 0.425, 0.55, 0.575, 0.55,
    ];

    impl MockZoo {
        fn detection_outputs(&self, batch: usize) -> Vec<InferTensor> {
            let n = if self.detect_face { 1.0 } else { 0.0 };
            let mut num = Vec::new();
            let mut boxes = Vec::new();
            let mut scores = Vec::new();
            let mut classes = Vec::new();
            let mut lmks = Vec::new();
            for _ in 0..batch {
                num.push(n);
                boxes.extend_from_slice(&DET_BOX);
                scores.push(0.9);
                classes.push(0.0);
                lmks.extend_from_slice(&DET_LANDMARK);
            }
            vec![
                InferTensor::new("num", ArrayD::from_shape_vec(vec![batch, 1], num).unwrap()),
                InferTensor::new(
                    "boxes",
                    ArrayD::from_shape_vec(vec![batch, 1, 4], boxes).unwrap(),
                ),
                InferTensor::new(
                    "scores",
                    ArrayD::from_shape_vec(vec![batch, 1, 1], scores).unwrap(),
                ),
                InferTensor::new(
                    "classes",
                    ArrayD::from_shape_vec(vec![batch, 1, 1], classes).unwrap(),
                ),
                InferTensor::new(
                    "landmarks",
                    ArrayD::from_shape_vec(vec![batch, 1, 10], lmks).unwrap(),
                ),
            ]
        }
    }

    impl Infer for MockZoo {
        fn model_config(
            &self,
            model: &str,
            _timeout: Duration,
        ) -> Result<ModelIo, InferenceError> {
            let spec = |name: &str, dims: Vec<usize>| TensorSpec {
                name: name.to_string(),
                dims,
            };
            let io = match model {
                "scrfd" => ModelIo {
                    inputs: vec![spec("images", vec![3, 640, 640])],
                    outputs: vec![
                        spec("num", vec![1]),
                        spec("boxes", vec![1, 4]),
                        spec("scores", vec![1, 1]),
                        spec("classes", vec![1, 1]),
                        spec("landmarks", vec![1, 10]),
                    ],
                },
                "face_id" => ModelIo {
                    inputs: vec![spec("input", vec![3, 112, 112])],
                    outputs: vec![spec("embedding", vec![self.embedding.len()])],
                },
                "face_quality_vp" => ModelIo {
                    inputs: vec![spec("input", vec![3, 112, 112])],
                    outputs: vec![spec("scores", vec![4])],
                },
                "face_anti_spoofing_crop_l14" | "face_anti_spoofing_fi_l14" => ModelIo {
                    inputs: vec![
                        spec("far", vec![3, 224, 224]),
                        spec("mid", vec![3, 224, 224]),
                        spec("near", vec![3, 224, 224]),
                    ],
                    outputs: vec![spec("prob", vec![2])],
                },
                other => panic!("unexpected model {other}"),
            };
            Ok(io)
        }

        fn infer(
            &self,
            model: &str,
            _timeout: Duration,
            inputs: &[InferTensor],
        ) -> Result<Vec<InferTensor>, InferenceError> {
            match model {
                "scrfd" => {
                    *self.detect_calls.lock().unwrap() += 1;
                    let batch = inputs[0].data.shape()[0];
                    Ok(self.detection_outputs(batch))
                }
                "face_id" => Ok(vec![InferTensor::new(
                    "embedding",
                    ArrayD::from_shape_vec(
                        vec![1, self.embedding.len()],
                        self.embedding.clone(),
                    )
                    .unwrap(),
                )]),
                "face_quality_vp" => {
                    let batch = inputs[0].data.shape()[0];
                    let mut rows = Vec::new();
                    for _ in 0..batch {
                        rows.extend_from_slice(&[0.9, 0.05, self.cover_score, 0.01]);
                    }
                    Ok(vec![InferTensor::new(
                        "scores",
                        ArrayD::from_shape_vec(vec![batch, 4], rows).unwrap(),
                    )])
                }
                "face_anti_spoofing_crop_l14" => Ok(vec![InferTensor::new(
                    "prob",
                    ArrayD::from_shape_vec(vec![1, 2], vec![1.0 - self.crop_live, self.crop_live])
                        .unwrap(),
                )]),
                "face_anti_spoofing_fi_l14" => {
                    if self.fail_full_spoof {
                        return Err(InferenceError::Transport {
                            model: model.to_string(),
                            message: "connection reset".to_string(),
                        });
                    }
                    Ok(vec![InferTensor::new(
                        "prob",
                        ArrayD::from_shape_vec(
                            vec![1, 2],
                            vec![1.0 - self.full_live, self.full_live],
                        )
                        .unwrap(),
                    )])
                }
                other => panic!("unexpected model {other}"),
            }
        }
    }

    fn pipeline(zoo: MockZoo) -> (Arc<MockZoo>, EkycPipeline) {
        let backend = Arc::new(zoo);
        let pipeline = EkycPipeline::new(backend.clone(), PipelineConfig::default()).unwrap();
        (backend, pipeline)
    }

    fn frame() -> Image {
        Image::new(200, 200)
    }

    #[test]
    fn test_verify_passive_scores_every_field() {
        let (_, p) = pipeline(MockZoo::default());
        let (far, mid, near) = (frame(), frame(), frame());
        let result = p.verify_passive(&far, &mid, &near).unwrap();

        assert_ne!(result.score_fm, UNSCORED);
        assert_ne!(result.score_mn, UNSCORED);
        assert_ne!(result.face_mask_score, UNSCORED);
        assert_ne!(result.liveness_score_crop, UNSCORED);
        assert_ne!(result.liveness_score_full, UNSCORED);

        assert!(result.is_same_person);
        assert!(result.is_liveness);
        assert!(!result.is_face_mask);
    }

    #[test]
    fn test_same_person_threshold_is_inclusive() {
        // Identical unit embeddings give a cosine of exactly 1.0; with the
        // threshold raised to 1.0 the decision must still be positive.
        let mut config = PipelineConfig::default();
        config.face_id = FaceIdParams {
            threshold_same_person: 1.0,
            ..FaceIdParams::default()
        };
        let backend = Arc::new(MockZoo::default());
        let p = EkycPipeline::new(backend, config).unwrap();

        let (far, mid, near) = (frame(), frame(), frame());
        let result = p.verify_passive(&far, &mid, &near).unwrap();
        assert_eq!(result.score_fm, 1.0);
        assert!(result.is_same_person);
    }

    #[test]
    fn test_liveness_threshold_is_exclusive() {
        // A crop score exactly at the threshold must not count as live.
        let mut config = PipelineConfig::default();
        config.antispoof_crop = AntiSpoofParams {
            threshold: 0.7,
            ..AntiSpoofParams::crop_default()
        };
        let backend = Arc::new(MockZoo::default());
        let p = EkycPipeline::new(backend, config).unwrap();

        let (far, mid, near) = (frame(), frame(), frame());
        let result = p.verify_passive(&far, &mid, &near).unwrap();
        assert_eq!(result.liveness_score_crop, 0.7);
        assert!(!result.is_liveness);
    }

    #[test]
    fn test_failed_liveness_stage_keeps_earlier_scores() {
        let (_, p) = pipeline(MockZoo {
            fail_full_spoof: true,
            ..MockZoo::default()
        });
        let (far, mid, near) = (frame(), frame(), frame());
        let failure = p.verify_passive(&far, &mid, &near).unwrap_err();

        assert!(matches!(failure.source, PipelineError::Inference(_)));
        assert_ne!(failure.partial.score_fm, UNSCORED);
        assert_ne!(failure.partial.score_mn, UNSCORED);
        assert_ne!(failure.partial.face_mask_score, UNSCORED);
        assert_ne!(failure.partial.liveness_score_crop, UNSCORED);
        assert_eq!(failure.partial.liveness_score_full, UNSCORED);
    }

    #[test]
    fn test_verify_passive_no_face_is_error() {
        let (backend, p) = pipeline(MockZoo {
            detect_face: false,
            ..MockZoo::default()
        });
        let (far, mid, near) = (frame(), frame(), frame());
        let failure = p.verify_passive(&far, &mid, &near).unwrap_err();

        assert!(matches!(
            failure.source,
            PipelineError::NoFaceDetected("far")
        ));
        assert_eq!(failure.partial.score_fm, UNSCORED);
        // One batched pass plus one padding retry per image.
        assert_eq!(*backend.detect_calls.lock().unwrap(), 4);
    }

    #[test]
    fn test_eye_distance_rejection_is_distinct_from_no_face() {
        // The mock face's eyes sit 40 px apart; a 50 px floor rejects it,
        // which must surface as a landmark-quality failure, not "no face".
        let mut config = PipelineConfig::default();
        config.detection.eye_distance_threshold = Some(50.0);
        let backend = Arc::new(MockZoo::default());
        let p = EkycPipeline::new(backend, config).unwrap();

        let (far, mid, near) = (frame(), frame(), frame());
        let failure = p.verify_passive(&far, &mid, &near).unwrap_err();
        assert!(matches!(
            failure.source,
            PipelineError::LowLandmarkQuality("far")
        ));
        assert_eq!(failure.partial.score_fm, UNSCORED);
    }

    #[test]
    fn test_verify_active_skips_detection_with_landmarks() {
        let (backend, p) = pipeline(MockZoo::default());
        let lmk = Landmark5::new([
            [80.0, 60.0],
            [120.0, 60.0],
            [100.0, 85.0],
            [85.0, 110.0],
            [115.0, 110.0],
        ]);
        let (far, mid, near) = (frame(), frame(), frame());
        let result = p
            .verify_active(&far, &mid, &near, Some(lmk), Some(lmk), Some(lmk))
            .unwrap();
        assert!(result.is_same_person);
        assert_eq!(*backend.detect_calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_locate_landmarks_maps_to_pixel_coordinates() {
        let (_, p) = pipeline(MockZoo::default());
        let img = frame();
        let faces = p.locate_landmarks(&[&img]).unwrap();
        let face = faces[0].as_ref().unwrap();
        // Normalized 0.4 × max(200, 200)
        assert!((face.landmark.left_eye()[0] - 80.0).abs() < 1e-3);
        assert!((face.landmark.left_eye()[1] - 60.0).abs() < 1e-3);
        assert!((face.bbox.left - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_locate_landmarks_missing_face_is_none() {
        let (_, p) = pipeline(MockZoo {
            detect_face: false,
            ..MockZoo::default()
        });
        let img = frame();
        let faces = p.locate_landmarks(&[&img]).unwrap();
        assert!(faces[0].is_none());
    }

    #[test]
    fn test_match_document() {
        let (_, p) = pipeline(MockZoo::default());
        let (doc, selfie) = (frame(), frame());
        let (score, is_match) = p.match_document(&doc, &selfie, None).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
        assert!(is_match);
    }

    #[test]
    fn test_check_quality_decision() {
        let (_, p) = pipeline(MockZoo {
            cover_score: 0.81,
            ..MockZoo::default()
        });
        let (far, mid, near) = (frame(), frame(), frame());
        let (score, is_mask) = p
            .check_quality(&far, &mid, &near, None, None, None)
            .unwrap();
        assert!((score - 0.81).abs() < 1e-6);
        assert!(is_mask);
    }

    #[test]
    fn test_extract_embedding_does_not_pad() {
        let (backend, p) = pipeline(MockZoo {
            detect_face: false,
            ..MockZoo::default()
        });
        let img = frame();
        let err = p.extract_embedding(&img, None).unwrap_err();
        assert!(matches!(err, PipelineError::NoFaceDetected("input")));
        // No padding retry for this flow.
        assert_eq!(*backend.detect_calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_crop_selfie_output_size() {
        let (_, p) = pipeline(MockZoo::default());
        let img = frame();
        let crop = p.crop_selfie(&img).unwrap();
        assert_eq!(crop.width(), 240);
        assert_eq!(crop.height(), 320);
    }

    #[test]
    fn test_crop_document_face_output_size() {
        let (_, p) = pipeline(MockZoo::default());
        let img = frame();
        let crop = p.crop_document_face(&img).unwrap();
        assert_eq!(crop.width(), 240);
        assert_eq!(crop.height(), 320);
    }
}
