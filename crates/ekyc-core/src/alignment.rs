//! Face alignment via robust 4-DOF similarity estimation.
//!
//! Detected landmarks are registered onto fixed canonical templates with a
//! least-median-of-squares estimator (2-point minimal samples, inlier
//! refinement), then the source image is warped into the template's output
//! size with bilinear sampling and a zero border.

use crate::geometry::{cross2d, euclidean_distance, sub2d};
use crate::types::{BoundingBox, Image, Landmark5};
use rand::seq::SliceRandom;
use thiserror::Error;

/// Canonical recognition landmarks for a 112×112 output.
const RECOGNITION_TEMPLATE_112: [[f32; 2]; 5] = [
    [38.2946, 51.6963], // left eye
    [73.5318, 51.5014], // right eye
    [56.0252, 71.7366], // nose
    [41.5493, 92.3655], // left mouth
    [70.7299, 92.2041], // right mouth
];

/// Canonical anti-spoofing landmarks for a 224×224 output.
const ANTI_SPOOFING_TEMPLATE_224: [[f32; 2]; 5] = [
    [74.01555, 90.46853],
    [135.68065, 90.12745],
    [105.0441, 125.539055],
    [79.71127, 161.63963],
    [130.77733, 161.35718],
];

/// Adult canonical landmarks for the 240×320 document-photo crop.
const DOCUMENT_TEMPLATE_ADULT: [[f32; 2]; 5] = [
    [87.56117786, 140.95207892],
    [152.12076214, 140.5917773],
    [120.04617, 177.99955243],
    [93.52425322, 216.13514054],
    [146.98728108, 215.83676865],
];

/// Infant canonical landmarks for the 240×320 document-photo crop.
const DOCUMENT_TEMPLATE_BABY: [[f32; 2]; 5] = [
    [89.26848429, 149.95460108],
    [150.43019571, 149.6132627],
    [120.04374, 185.05220757],
    [94.91771357, 221.18065946],
    [145.56689786, 220.89799136],
];

const DOCUMENT_OUT_WIDTH: u32 = 240;
const DOCUMENT_OUT_HEIGHT: u32 = 320;

/// Head-proportion ratio bounds for the adult/baby template blend.
pub const DOCUMENT_RATIO_BABY: f32 = 0.306;
pub const DOCUMENT_RATIO_ADULT: f32 = 0.565;

#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("similarity estimation failed: {0}")]
    EstimationFailed(String),
    #[error("number of input images and landmarks must be equal (got {images} and {landmarks})")]
    LengthMismatch { images: usize, landmarks: usize },
    #[error("number of source and target points must be equal (got {from} and {to})")]
    CorrespondenceMismatch { from: usize, to: usize },
}

/// 2D similarity transform (rotation + uniform scale + translation):
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    #[inline]
    pub fn apply(&self, p: [f32; 2]) -> [f32; 2] {
        [
            self.a * p[0] - self.b * p[1] + self.tx,
            self.b * p[0] + self.a * p[1] + self.ty,
        ]
    }

    /// Uniform scale factor of the transform.
    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    /// Row-major 2×3 matrix `[a, -b, tx, b, a, ty]`.
    pub fn matrix(&self) -> [f32; 6] {
        [self.a, -self.b, self.tx, self.b, self.a, self.ty]
    }

    fn squared_residual(&self, from: [f32; 2], to: [f32; 2]) -> f32 {
        let p = self.apply(from);
        let dx = p[0] - to[0];
        let dy = p[1] - to[1];
        dx * dx + dy * dy
    }
}

/// Robust estimator parameters.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorParams {
    /// Reprojection inlier threshold in pixels.
    pub inlier_threshold: f32,
    pub max_iters: usize,
    /// Target confidence for the sampling loop.
    pub confidence: f64,
    /// Maximum inlier-refit passes after the sampling loop.
    pub refine_passes: usize,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            inlier_threshold: 3.0,
            max_iters: 2000,
            confidence: 0.99,
            refine_passes: 10,
        }
    }
}

/// Exact similarity from two point correspondences. `None` when the source
/// pair is (near-)coincident.
fn from_two_points(from: [[f32; 2]; 2], to: [[f32; 2]; 2]) -> Option<SimilarityTransform> {
    let d = sub2d(from[1], from[0]);
    let e = sub2d(to[1], to[0]);
    let len2 = d[0] * d[0] + d[1] * d[1];
    if len2 < 1e-10 {
        return None;
    }
    let a = (e[0] * d[0] + e[1] * d[1]) / len2;
    let b = (e[1] * d[0] - e[0] * d[1]) / len2;
    Some(SimilarityTransform {
        a,
        b,
        tx: to[0][0] - (a * from[0][0] - b * from[0][1]),
        ty: to[0][1] - (b * from[0][0] + a * from[0][1]),
    })
}

/// Least-squares similarity over all given correspondences, via the 4×4
/// normal equations solved with partial-pivot Gaussian elimination.
fn solve_least_squares(from: &[[f32; 2]], to: &[[f32; 2]]) -> Option<SimilarityTransform> {
    // Each pair (sx, sy) -> (dx, dy) contributes:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for (s, d) in from.iter().zip(to.iter()) {
        let r1 = [s[0], -s[1], 1.0, 0.0];
        let r2 = [s[1], s[0], 0.0, 1.0];
        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * d[0] + r2[j] * d[1];
        }
    }

    let x = solve_4x4(&ata, &atb)?;
    Some(SimilarityTransform { a: x[0], b: x[1], tx: x[2], ty: x[3] })
}

/// Solve a 4×4 linear system with partial pivoting. `None` on a singular
/// pivot.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    Some(x)
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 0 {
        return f32::INFINITY;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Robust similarity estimation: minimal 2-point samples scored by the
/// median of squared residuals, followed by least-squares refinement over
/// the inlier set.
///
/// With five landmarks the ten distinct pairs are tried exhaustively; for
/// larger correspondence sets the sampling is randomized and cut short once
/// the configured confidence is reached.
pub fn estimate_similarity(
    from: &[[f32; 2]],
    to: &[[f32; 2]],
    params: &EstimatorParams,
) -> Result<SimilarityTransform, AlignmentError> {
    if from.len() != to.len() {
        return Err(AlignmentError::CorrespondenceMismatch {
            from: from.len(),
            to: to.len(),
        });
    }
    let n = from.len();
    if n < 2 {
        return Err(AlignmentError::EstimationFailed(format!(
            "need at least 2 correspondences, got {n}"
        )));
    }

    let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }
    if pairs.len() > params.max_iters {
        pairs.shuffle(&mut rand::thread_rng());
        pairs.truncate(params.max_iters);
    }

    let threshold_sq = params.inlier_threshold * params.inlier_threshold;
    let mut best: Option<(SimilarityTransform, f32)> = None;
    let mut iters_needed = pairs.len();

    for (done, &(i, j)) in pairs.iter().enumerate() {
        if done >= iters_needed {
            break;
        }
        let Some(candidate) = from_two_points([from[i], from[j]], [to[i], to[j]]) else {
            continue;
        };

        let mut residuals: Vec<f32> = (0..n)
            .map(|k| candidate.squared_residual(from[k], to[k]))
            .collect();
        let inliers = residuals.iter().filter(|&&r| r <= threshold_sq).count();
        let med = median(&mut residuals);

        if best.map_or(true, |(_, best_med)| med < best_med) {
            best = Some((candidate, med));
            // Standard confidence cut: enough samples that at least one is
            // expected to be outlier-free.
            let w = inliers as f64 / n as f64;
            if w > 0.0 {
                let p_good = w * w;
                if p_good >= 1.0 {
                    iters_needed = done + 1;
                } else {
                    let needed =
                        ((1.0 - params.confidence).ln() / (1.0 - p_good).ln()).ceil() as usize;
                    iters_needed = iters_needed.min(needed.max(done + 1));
                }
            }
        }
    }

    let (mut model, _) = best.ok_or_else(|| {
        AlignmentError::EstimationFailed("no valid minimal sample".to_string())
    })?;

    // Inlier refinement: refit on the inlier set, re-classify, repeat until
    // the set stabilizes or the pass budget runs out. A refit that loses
    // inliers keeps the previous model.
    let classify = |m: &SimilarityTransform| -> Vec<usize> {
        (0..n)
            .filter(|&k| m.squared_residual(from[k], to[k]) <= threshold_sq)
            .collect()
    };

    let mut inlier_set = classify(&model);
    if inlier_set.len() < 2 {
        return Err(AlignmentError::EstimationFailed(format!(
            "only {} inliers at threshold {}",
            inlier_set.len(),
            params.inlier_threshold
        )));
    }

    for _ in 0..params.refine_passes {
        let from_in: Vec<[f32; 2]> = inlier_set.iter().map(|&k| from[k]).collect();
        let to_in: Vec<[f32; 2]> = inlier_set.iter().map(|&k| to[k]).collect();
        let Some(refined) = solve_least_squares(&from_in, &to_in) else {
            break;
        };

        let refined_inliers = classify(&refined);
        if refined_inliers.len() < 2 {
            break;
        }
        let stable = refined_inliers == inlier_set;
        model = refined;
        inlier_set = refined_inliers;
        if stable {
            break;
        }
    }

    Ok(model)
}

/// A canonical 5-point reference set with its output crop size.
#[derive(Debug, Clone)]
pub struct AlignmentTemplate {
    pub points: [[f32; 2]; 5],
    pub out_width: u32,
    pub out_height: u32,
}

impl AlignmentTemplate {
    /// Recognition template, scaled from the canonical 112×112 layout.
    pub fn recognition(size: u32) -> Self {
        let scale = size as f32 / 112.0;
        let mut points = RECOGNITION_TEMPLATE_112;
        for p in &mut points {
            p[0] *= scale;
            p[1] *= scale;
        }
        Self { points, out_width: size, out_height: size }
    }

    /// Anti-spoofing template, scaled from the canonical 224×224 layout.
    pub fn anti_spoofing(size: u32) -> Self {
        let scale = size as f32 / 224.0;
        let mut points = ANTI_SPOOFING_TEMPLATE_224;
        for p in &mut points {
            p[0] *= scale;
            p[1] *= scale;
        }
        Self { points, out_width: size, out_height: size }
    }

    /// Document-photo template: an age-dependent blend of the adult and
    /// baby reference sets, derived per call from face geometry via
    /// [`document_face_ratio`].
    pub fn document_photo(landmark: &Landmark5, bbox: &BoundingBox) -> Self {
        let ratio = document_face_ratio(landmark, bbox);

        let mut points = [[0.0f32; 2]; 5];
        let span = DOCUMENT_RATIO_ADULT - DOCUMENT_RATIO_BABY;
        for (i, p) in points.iter_mut().enumerate() {
            for c in 0..2 {
                let adult = DOCUMENT_TEMPLATE_ADULT[i][c];
                let baby = DOCUMENT_TEMPLATE_BABY[i][c];
                p[c] = ((baby * DOCUMENT_RATIO_ADULT - adult * DOCUMENT_RATIO_BABY)
                    + (adult - baby) * ratio)
                    / span;
            }
        }

        Self {
            points,
            out_width: DOCUMENT_OUT_WIDTH,
            out_height: DOCUMENT_OUT_HEIGHT,
        }
    }
}

/// Clamped head-proportion ratio used to blend the document templates.
///
/// Both distances are signed perpendicular offsets from the eye line,
/// normalized by eye separation; their quotient approximates adult vs.
/// infant head proportion from pure geometry.
pub fn document_face_ratio(landmark: &Landmark5, bbox: &BoundingBox) -> f32 {
    let e0 = landmark.left_eye();
    let e1 = landmark.right_eye();
    let nose = landmark.nose();
    let center = bbox.center();

    let eye_vec = sub2d(e0, e1);
    let eye_dist = euclidean_distance(e0, e1);

    let d_cbox_eyes = cross2d(eye_vec, sub2d(center, e1)) / eye_dist;
    let d_nose_eyes = cross2d(eye_vec, sub2d(nose, e1)) / eye_dist;

    let ratio = d_cbox_eyes / d_nose_eyes;
    if !ratio.is_finite() {
        // Degenerate landmarks (nose on the eye line): fall back to the
        // adult proportions.
        return DOCUMENT_RATIO_ADULT;
    }
    ratio.clamp(DOCUMENT_RATIO_BABY, DOCUMENT_RATIO_ADULT)
}

/// Warp an RGB image with the inverse of a similarity transform into a
/// `out_width × out_height` crop, bilinear sampling, zero border.
pub fn warp_similarity(
    image: &Image,
    transform: &SimilarityTransform,
    out_width: u32,
    out_height: u32,
) -> Image {
    let mut out = Image::new(out_width, out_height);

    // Invert the 2×2 part [[a, -b], [b, a]]; det = a² + b².
    let det = transform.a * transform.a + transform.b * transform.b;
    if det.abs() < 1e-12 {
        return out;
    }
    let ia = transform.a / det;
    let ib = transform.b / det;

    for oy in 0..out_height {
        for ox in 0..out_width {
            let dx = ox as f32 - transform.tx;
            let dy = oy as f32 - transform.ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let tl = image.pixel_or_zero(x0, y0);
            let tr = image.pixel_or_zero(x0 + 1, y0);
            let bl = image.pixel_or_zero(x0, y0 + 1);
            let br = image.pixel_or_zero(x0 + 1, y0 + 1);

            let mut rgb = [0u8; 3];
            for c in 0..3 {
                let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                    + tr[c] * fx * (1.0 - fy)
                    + bl[c] * (1.0 - fx) * fy
                    + br[c] * fx * fy;
                rgb[c] = val.round().clamp(0.0, 255.0) as u8;
            }
            out.set_pixel(ox, oy, rgb);
        }
    }

    out
}

/// Owns the static templates and estimator settings for one pipeline.
pub struct FaceAligner {
    recognition: AlignmentTemplate,
    anti_spoofing: AlignmentTemplate,
    estimator: EstimatorParams,
}

impl FaceAligner {
    pub fn new(recognition_size: u32, anti_spoofing_size: u32) -> Self {
        Self {
            recognition: AlignmentTemplate::recognition(recognition_size),
            anti_spoofing: AlignmentTemplate::anti_spoofing(anti_spoofing_size),
            estimator: EstimatorParams::default(),
        }
    }

    pub fn recognition(&self) -> &AlignmentTemplate {
        &self.recognition
    }

    pub fn anti_spoofing(&self) -> &AlignmentTemplate {
        &self.anti_spoofing
    }

    /// Align one face onto a template: estimate the robust similarity from
    /// landmarks to template points and warp the crop.
    pub fn align(
        &self,
        image: &Image,
        landmark: &Landmark5,
        template: &AlignmentTemplate,
    ) -> Result<(Image, SimilarityTransform), AlignmentError> {
        let transform = estimate_similarity(&landmark.points, &template.points, &self.estimator)?;
        let crop = warp_similarity(image, &transform, template.out_width, template.out_height);
        Ok((crop, transform))
    }

    /// Batched alignment over parallel image/landmark lists.
    pub fn align_batch(
        &self,
        images: &[&Image],
        landmarks: &[Landmark5],
        template: &AlignmentTemplate,
    ) -> Result<Vec<Image>, AlignmentError> {
        if images.len() != landmarks.len() {
            return Err(AlignmentError::LengthMismatch {
                images: images.len(),
                landmarks: landmarks.len(),
            });
        }
        images
            .iter()
            .zip(landmarks.iter())
            .map(|(img, lmk)| self.align(img, lmk, template).map(|(crop, _)| crop))
            .collect()
    }

    /// Align a document/selfie face onto the per-call interpolated
    /// document-photo template (240×320 output).
    pub fn align_document(
        &self,
        image: &Image,
        landmark: &Landmark5,
        bbox: &BoundingBox,
    ) -> Result<(Image, SimilarityTransform), AlignmentError> {
        let template = AlignmentTemplate::document_photo(landmark, bbox);
        self.align(image, landmark, &template)
    }
}
