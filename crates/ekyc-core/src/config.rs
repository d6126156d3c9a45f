//! Per-model hyperparameters and thresholds.
//!
//! Defaults mirror the production model zoo; every struct derives
//! `Deserialize` so deployments can override individual fields from a TOML
//! file without touching code.

use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Symmetric 8-bit normalization factor `1 / 127.5`.
const SYMMETRIC_SCALE: f32 = 1.0 / 127.5;

/// ImageNet channel means at 8-bit range.
const IMAGENET_MEAN_255: [f32; 3] = [123.675, 116.28, 103.53];
/// ImageNet channel standard deviations at unit range.
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaceDetectionParams {
    pub model_name: String,
    pub mean: f32,
    pub scale: f32,
    /// Minimum detector confidence for a candidate to survive filtering.
    pub score_threshold: f32,
    /// Optional minimum inter-eye distance in pixels. Rejections surface as
    /// low-landmark-quality failures in flows that require a face.
    pub eye_distance_threshold: Option<f32>,
    pub timeout_secs: u64,
}

impl Default for FaceDetectionParams {
    fn default() -> Self {
        Self {
            model_name: "scrfd".to_string(),
            mean: 127.5,
            scale: SYMMETRIC_SCALE,
            score_threshold: 0.5,
            eye_distance_threshold: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl FaceDetectionParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaceIdParams {
    pub model_name: String,
    pub mean: f32,
    pub scale: f32,
    /// Inclusive threshold for the cross-shot same-person decision.
    pub threshold_same_person: f32,
    /// Inclusive threshold for the document-to-selfie match (looser).
    pub threshold_document: f32,
    /// Side length of the square recognition crop.
    pub input_size: u32,
    pub timeout_secs: u64,
}

impl Default for FaceIdParams {
    fn default() -> Self {
        Self {
            model_name: "face_id".to_string(),
            mean: 127.5,
            scale: SYMMETRIC_SCALE,
            threshold_same_person: 0.4,
            threshold_document: 0.3,
            input_size: 112,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl FaceIdParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaceQualityParams {
    pub model_name: String,
    pub mean: [f32; 3],
    pub scale: [f32; 3],
    /// Exclusive threshold on the obstruction ("cover") score.
    pub threshold_cover: f32,
    pub input_size: u32,
    pub timeout_secs: u64,
}

impl Default for FaceQualityParams {
    fn default() -> Self {
        Self {
            model_name: "face_quality_vp".to_string(),
            mean: IMAGENET_MEAN_255,
            scale: [
                1.0 / (IMAGENET_STD[0] * 255.0),
                1.0 / (IMAGENET_STD[1] * 255.0),
                1.0 / (IMAGENET_STD[2] * 255.0),
            ],
            threshold_cover: 0.5,
            input_size: 112,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl FaceQualityParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AntiSpoofParams {
    pub model_name: String,
    /// Channel means at unit range (inputs are divided by 255 first).
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Exclusive threshold on the live-probability output.
    pub threshold: f32,
    pub input_size: u32,
    pub timeout_secs: u64,
}

impl AntiSpoofParams {
    /// Model operating on anti-spoofing-aligned face crops.
    pub fn crop_default() -> Self {
        Self {
            model_name: "face_anti_spoofing_crop_l14".to_string(),
            mean: [0.485, 0.456, 0.406],
            std: IMAGENET_STD,
            threshold: 0.58,
            input_size: 224,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Model operating on the raw full-frame images.
    pub fn full_default() -> Self {
        Self {
            model_name: "face_anti_spoofing_fi_l14".to_string(),
            mean: [0.485, 0.456, 0.406],
            std: IMAGENET_STD,
            threshold: 0.48,
            input_size: 224,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AntiSpoofParams {
    fn default() -> Self {
        Self::crop_default()
    }
}

/// Full pipeline configuration: one parameter block per model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: FaceDetectionParams,
    pub face_id: FaceIdParams,
    pub quality: FaceQualityParams,
    pub antispoof_crop: AntiSpoofParams,
    pub antispoof_full: AntiSpoofParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detection: FaceDetectionParams::default(),
            face_id: FaceIdParams::default(),
            quality: FaceQualityParams::default(),
            antispoof_crop: AntiSpoofParams::crop_default(),
            antispoof_full: AntiSpoofParams::full_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.face_id.threshold_same_person, 0.4);
        assert_eq!(cfg.face_id.threshold_document, 0.3);
        assert_eq!(cfg.antispoof_crop.threshold, 0.58);
        assert_eq!(cfg.antispoof_full.threshold, 0.48);
        assert_eq!(cfg.quality.threshold_cover, 0.5);
        assert_eq!(cfg.detection.score_threshold, 0.5);
    }

    #[test]
    fn test_symmetric_scale() {
        let det = FaceDetectionParams::default();
        assert!((det.scale - 0.00784313725).abs() < 1e-9);
        assert_eq!(det.mean, 127.5);
    }

    #[test]
    fn test_antispoof_variants_differ() {
        let crop = AntiSpoofParams::crop_default();
        let full = AntiSpoofParams::full_default();
        assert_ne!(crop.model_name, full.model_name);
        assert!(crop.threshold > full.threshold);
        assert_eq!(crop.input_size, full.input_size);
    }
}
