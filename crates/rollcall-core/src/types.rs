use crate::gallery::Gallery;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embedding dimension produced by the external extractor capability.
pub const EMBEDDING_DIM: usize = 128;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (128-dimensional in production galleries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance to another embedding.
    ///
    /// Always processes all dimensions; mismatched lengths are truncated to
    /// the shorter vector (callers are expected to validate dimensions).
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face reported by the extractor capability: where it is and what it
/// embeds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, or `None` when the best distance exceeds the threshold.
    pub identity: Option<String>,
    /// Euclidean distance of the best gallery entry.
    pub distance: f32,
    /// `(1 − distance) × 100`, as a percentage.
    pub confidence: f32,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MatchError {
    #[error("gallery contains no entries")]
    EmptyGallery,
    #[error("probe dimension {probe} does not match gallery dimension {gallery}")]
    DimensionMismatch { probe: usize, gallery: usize },
}

/// Strategy for comparing a probe embedding against the gallery.
///
/// Euclidean full-scan is sufficient at the gallery sizes this system
/// targets (hundreds to low thousands); an indexed matcher can implement
/// the same trait later without touching callers.
pub trait Matcher: Send + Sync {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean nearest-neighbor matcher with constant-time gallery traversal.
///
/// Always iterates ALL gallery entries, no early exit. Exact ties keep the
/// first entry in gallery load order.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if gallery.is_empty() {
            return Err(MatchError::EmptyGallery);
        }
        if probe.dim() != gallery.dim() {
            return Err(MatchError::DimensionMismatch {
                probe: probe.dim(),
                gallery: gallery.dim(),
            });
        }

        let mut best_distance = f32::INFINITY;
        let mut best_idx = 0usize;

        // Constant-time: always scan every entry. Strict `<` keeps the
        // first entry in load order on exact ties.
        for (i, (_, embedding)) in gallery.entries().enumerate() {
            let distance = probe.euclidean_distance(embedding);
            if distance < best_distance {
                best_distance = distance;
                best_idx = i;
            }
        }

        let identity = if best_distance > threshold {
            None
        } else {
            gallery.identity_at(best_idx).map(str::to_owned)
        };

        Ok(MatchResult {
            identity,
            distance: best_distance,
            confidence: (1.0 - best_distance) * 100.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(entries: Vec<(&str, Vec<f32>)>) -> Gallery {
        Gallery::from_entries(
            entries
                .into_iter()
                .map(|(id, v)| (id.to_string(), v))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_unit() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_self_match_distance_zero() {
        let g = gallery(vec![("1", vec![0.3, 0.7]), ("2", vec![0.9, 0.1])]);
        for (id, embedding) in g.entries() {
            let result = EuclideanMatcher.best_match(embedding, &g, 0.6).unwrap();
            assert_eq!(result.distance, 0.0);
            assert_eq!(result.identity.as_deref(), Some(id));
            assert_eq!(result.confidence, 100.0);
        }
    }

    #[test]
    fn test_above_threshold_is_none() {
        let g = gallery(vec![("1", vec![0.0, 0.0])]);
        let probe = Embedding::new(vec![0.7, 0.0]);
        let result = EuclideanMatcher.best_match(&probe, &g, 0.6).unwrap();
        assert_eq!(result.identity, None);
        assert!((result.distance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_exactly_at_threshold_matches() {
        // Decision rule is `distance > threshold` → none; equality matches.
        let g = gallery(vec![("1", vec![0.0, 0.0])]);
        let probe = Embedding::new(vec![0.6, 0.0]);
        let result = EuclideanMatcher.best_match(&probe, &g, 0.6).unwrap();
        assert_eq!(result.identity.as_deref(), Some("1"));
    }

    #[test]
    fn test_scenario_two_candidates() {
        // distance 0.2 from "1", 0.9 from "2" → identity "1", confidence 80.0%
        let g = gallery(vec![("1", vec![0.0, 0.0]), ("2", vec![1.1, 0.0])]);
        let probe = Embedding::new(vec![0.2, 0.0]);
        let result = EuclideanMatcher.best_match(&probe, &g, 0.6).unwrap();
        assert_eq!(result.identity.as_deref(), Some("1"));
        assert!((result.distance - 0.2).abs() < 1e-6);
        assert!((result.confidence - 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_tie_resolves_to_first_in_load_order() {
        // Identities load in sorted order: "a" before "b", both equidistant.
        let g = gallery(vec![("b", vec![0.5, 0.0]), ("a", vec![0.0, 0.5])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.best_match(&probe, &g, 0.6).unwrap();
        assert_eq!(result.identity.as_deref(), Some("a"));
    }

    #[test]
    fn test_empty_gallery_rejected() {
        let err = Gallery::from_entries(vec![]).unwrap_err();
        assert!(matches!(err, crate::gallery::GalleryError::Empty));
    }

    #[test]
    fn test_dimension_mismatch() {
        let g = gallery(vec![("1", vec![0.0, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0, 0.0]);
        let err = EuclideanMatcher.best_match(&probe, &g, 0.6).unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { probe: 3, gallery: 2 });
    }
}
