use serde::{Deserialize, Serialize};

/// Sentinel for a score field that no pipeline stage has written yet.
pub const UNSCORED: f32 = -1.0;

/// Caller-owned RGB8 pixel buffer. The pipeline reads it but never keeps it
/// past a call.
#[derive(Debug, Clone)]
pub struct Image {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Image {
    /// Create a black image of the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 3],
        }
    }

    /// Wrap an existing interleaved RGB buffer. Returns `None` when the
    /// buffer length does not match `width × height × 3`.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * 3 {
            return None;
        }
        Some(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at (x, y). Coordinates must be in bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let off = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let off = (y as usize * self.width as usize + x as usize) * 3;
        self.data[off..off + 3].copy_from_slice(&rgb);
    }

    /// Pixel with out-of-bounds reads returning black, for border handling
    /// in bilinear sampling.
    #[inline]
    pub fn pixel_or_zero(&self, x: i32, y: i32) -> [f32; 3] {
        if x >= 0 && (x as u32) < self.width && y >= 0 && (y as u32) < self.height {
            let p = self.pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    }
}

/// Five canonical facial keypoints in pixel coordinates.
///
/// Order is fixed and never permuted:
/// `[left_eye, right_eye, nose, left_mouth, right_mouth]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark5 {
    pub points: [[f32; 2]; 5],
}

impl Landmark5 {
    pub fn new(points: [[f32; 2]; 5]) -> Self {
        Self { points }
    }

    pub fn left_eye(&self) -> [f32; 2] {
        self.points[0]
    }

    pub fn right_eye(&self) -> [f32; 2] {
        self.points[1]
    }

    pub fn nose(&self) -> [f32; 2] {
        self.points[2]
    }

    /// Translate every point by `(-dx, -dy)`. Used to map padded-image
    /// coordinates back to the original frame.
    pub fn offset_by(&self, dx: f32, dy: f32) -> Self {
        let mut points = self.points;
        for p in &mut points {
            p[0] -= dx;
            p[1] -= dy;
        }
        Self { points }
    }
}

/// Face bounding box `(left, top, right, bottom)` in pixel coordinates.
/// May extend beyond the image bounds before clipping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    /// Box area after clipping to `[0, width] × [0, height]`.
    pub fn clipped_area(&self, width: u32, height: u32) -> f32 {
        let clamp = |v: f32, hi: f32| v.clamp(0.0, hi);
        let left = clamp(self.left, width as f32);
        let right = clamp(self.right, width as f32);
        let top = clamp(self.top, height as f32);
        let bottom = clamp(self.bottom, height as f32);
        (right - left) * (bottom - top)
    }

    /// Geometric center of the box.
    pub fn center(&self) -> [f32; 2] {
        [(self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0]
    }

    pub fn offset_by(&self, dx: f32, dy: f32) -> Self {
        Self {
            left: self.left - dx,
            top: self.top - dy,
            right: self.right - dx,
            bottom: self.bottom - dy,
        }
    }
}

/// One filtered detection: box, landmarks, confidence and detector class.
/// Produced per detected face per image and consumed by selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    pub landmark: Landmark5,
    pub score: f32,
    pub class_id: i32,
}

/// Accumulated verdict of a verification flow.
///
/// Score fields default to [`UNSCORED`] and are filled incrementally in
/// stage order (same-person, quality, liveness). On a stage failure the
/// partially filled value is returned alongside the error, so earlier
/// stages' scores are never lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_face_mask: bool,
    pub is_liveness: bool,
    pub is_same_person: bool,
    /// Similarity between the mid- and near-distance images.
    pub score_mn: f32,
    /// Similarity between the far- and mid-distance images.
    pub score_fm: f32,
    pub liveness_score_full: f32,
    pub liveness_score_crop: f32,
    /// Similarity between the selfie and the document photo.
    pub similarity_score: f32,
    pub face_mask_score: f32,
}

impl Default for VerificationResult {
    fn default() -> Self {
        Self {
            is_face_mask: false,
            is_liveness: false,
            is_same_person: false,
            score_mn: UNSCORED,
            score_fm: UNSCORED,
            liveness_score_full: UNSCORED,
            liveness_score_crop: UNSCORED,
            similarity_score: UNSCORED,
            face_mask_score: UNSCORED,
        }
    }
}
