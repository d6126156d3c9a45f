//! Pure selection policies reducing a candidate list to one face.

use crate::geometry::euclidean_distance;
use crate::types::FaceCandidate;

/// How a flow reduces multiple candidates to a single face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Largest clipped box area wins.
    Largest,
    /// Box center closest to a reference point wins.
    ClosestToCenter,
}

/// Geometric center of an image.
pub fn image_center(width: u32, height: u32) -> [f32; 2] {
    [width as f32 / 2.0, height as f32 / 2.0]
}

/// Index of the candidate whose box, clipped to the image bounds, has the
/// largest area. Ties keep the earliest candidate.
pub fn largest_face(candidates: &[FaceCandidate], width: u32, height: u32) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, cand) in candidates.iter().enumerate() {
        let area = cand.bbox.clipped_area(width, height);
        match best {
            Some((_, best_area)) if area <= best_area => {}
            _ => best = Some((idx, area)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Index of the candidate whose box center is closest to `reference`.
/// Ties keep the earliest candidate.
pub fn center_face(candidates: &[FaceCandidate], reference: [f32; 2]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, cand) in candidates.iter().enumerate() {
        let dist = euclidean_distance(cand.bbox.center(), reference);
        match best {
            Some((_, best_dist)) if dist >= best_dist => {}
            _ => best = Some((idx, dist)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Apply a selection policy against an image of the given dimensions.
pub fn select(
    candidates: &[FaceCandidate],
    policy: SelectionPolicy,
    width: u32,
    height: u32,
) -> Option<usize> {
    match policy {
        SelectionPolicy::Largest => largest_face(candidates, width, height),
        SelectionPolicy::ClosestToCenter => center_face(candidates, image_center(width, height)),
    }
}
