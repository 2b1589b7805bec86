use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Scale box and landmarks by `sx` horizontally and `sy` vertically,
    /// e.g. to map a detection on a downsampled frame back to full-frame
    /// coordinates.
    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self.landmarks.map(|lms| lms.map(|(x, y)| (x * sx, y * sy))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A known identity: the label taken from the reference image's file stem
/// and the embedding computed from that image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFace {
    pub label: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the reference faces.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest reference face (`+inf` for an empty gallery).
    pub distance: f32,
    /// Label of the nearest reference face, set only when `matched`.
    pub label: Option<String>,
    /// Position of the nearest reference face in store order.
    pub index: Option<usize>,
}

/// Strategy for comparing a probe embedding against the reference faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[ReferenceFace], threshold: f32)
        -> MatchResult;
}

/// Nearest-neighbour matcher on Euclidean distance.
///
/// Every reference is visited; on equal distances the one that comes first
/// in store order is kept. A match requires `distance <= threshold`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[ReferenceFace],
        threshold: f32,
    ) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let dist = probe.distance(&face.embedding);
            if best_idx.is_none() || dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= threshold => MatchResult {
                matched: true,
                distance: best_dist,
                label: Some(gallery[idx].label.clone()),
                index: Some(idx),
            },
            _ => MatchResult {
                matched: false,
                distance: best_dist,
                label: None,
                index: best_idx,
            },
        }
    }
}
