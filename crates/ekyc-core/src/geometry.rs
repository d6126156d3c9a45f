//! Small pure numeric primitives shared across the pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("vectors must have the same length (got {0} and {1})")]
    LengthMismatch(usize, usize),
    #[error("zero vector encountered")]
    ZeroVector,
}

/// Euclidean distance between two 2D points.
pub fn euclidean_distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

/// 2D cross product (z component of the 3D cross of two planar vectors).
pub fn cross2d(a: [f32; 2], b: [f32; 2]) -> f32 {
    a[0] * b[1] - a[1] * b[0]
}

/// Componentwise `a − b`.
pub fn sub2d(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

/// Cosine similarity between two embeddings.
///
/// Accumulates in f64 to keep long dot products stable. Errors on length
/// mismatch and on an all-zero vector, where the quantity is undefined.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, GeometryError> {
    if a.len() != b.len() {
        return Err(GeometryError::LengthMismatch(a.len(), b.len()));
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (x * y) as f64;
        norm_a += (x * x) as f64;
        norm_b += (y * y) as f64;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(GeometryError::ZeroVector);
    }

    Ok((dot / (norm_a * norm_b)) as f32)
}
