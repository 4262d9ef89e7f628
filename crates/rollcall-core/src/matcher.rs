use crate::gallery::Gallery;
use crate::types::{Embedding, EmbeddingError, Identity};

/// Default maximum Euclidean distance for a match.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Distances closer than this are treated as equal when picking the nearest entry.
pub const TIE_EPSILON: f32 = 1e-6;

/// The nearest enrolled identity, accepted under tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity: Identity,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match(MatchResult),
    /// Nothing within tolerance. `nearest` is the closest distance seen,
    /// if the gallery had any entries at all.
    NoMatch { nearest: Option<f32> },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match(_))
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn find(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        tolerance: f32,
    ) -> Result<MatchOutcome, EmbeddingError>;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Scans every entry. A later entry replaces the current best only when it
/// is nearer by more than [`TIE_EPSILON`], so among equidistant entries the
/// gallery's iteration order decides.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn find(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        tolerance: f32,
    ) -> Result<MatchOutcome, EmbeddingError> {
        if gallery.is_empty() {
            return Ok(MatchOutcome::NoMatch { nearest: None });
        }
        probe.check_dim(gallery.dim())?;
        probe.validate()?;

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.entries().iter().enumerate() {
            let dist = probe.euclidean_distance(&entry.embedding);
            if dist < best_dist - TIE_EPSILON {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => Ok(MatchOutcome::Match(MatchResult {
                identity: gallery.entries()[idx].identity.clone(),
                distance: best_dist,
            })),
            _ => Ok(MatchOutcome::NoMatch {
                nearest: best_idx.map(|_| best_dist),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;

    fn gallery<const N: usize>(rows: &[(&str, &str, [f32; N])]) -> Gallery {
        let entries = rows
            .iter()
            .map(|(id, name, v)| GalleryEntry {
                identity: Identity::new(*id, *name),
                embedding: Embedding::new(v.to_vec()),
            })
            .collect();
        Gallery::from_entries(entries, N).unwrap()
    }

    fn alice_bob() -> Gallery {
        gallery(&[
            ("S1", "Alice", [0.1, 0.2, 0.3, 0.4]),
            ("S2", "Bob", [0.9, 0.8, 0.7, 0.6]),
        ])
    }

    #[test]
    fn test_probe_near_alice_matches_alice() {
        let probe = Embedding::new(vec![0.11, 0.19, 0.31, 0.42]);
        let out = EuclideanMatcher.find(&probe, &alice_bob(), DEFAULT_TOLERANCE).unwrap();
        match out {
            MatchOutcome::Match(m) => {
                assert_eq!(m.identity.id, "S1");
                assert_eq!(m.identity.label, "Alice");
                assert!(m.distance < 0.05, "distance {}", m.distance);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn test_nearest_beyond_tolerance_is_no_match() {
        let g = gallery(&[("S1", "Alice", [0.0, 0.0]), ("S2", "Bob", [3.0, 0.0])]);
        // 0.9 from Alice, 2.1 from Bob.
        let probe = Embedding::new(vec![0.0, 0.9]);
        let out = EuclideanMatcher.find(&probe, &g, 0.6).unwrap();
        match out {
            MatchOutcome::NoMatch { nearest: Some(d) } => assert!((d - 0.9).abs() < 1e-6),
            other => panic!("expected no match with nearest distance, got {other:?}"),
        }
    }

    #[test]
    fn test_distance_equal_to_tolerance_matches() {
        let g = gallery(&[("S1", "Alice", [0.0, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.5]);
        assert!(EuclideanMatcher.find(&probe, &g, 0.5).unwrap().is_match());
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let g = Gallery::from_entries(Vec::new(), 4).unwrap();
        let probe = Embedding::new(vec![0.0; 4]);
        for tol in [0.0, 0.6, 100.0, f32::INFINITY] {
            assert_eq!(
                EuclideanMatcher.find(&probe, &g, tol).unwrap(),
                MatchOutcome::NoMatch { nearest: None }
            );
        }
    }

    #[test]
    fn test_scans_whole_gallery() {
        // Best match is the last entry.
        let g = gallery(&[
            ("A", "decoy1", [0.0, 1.0, 0.0]),
            ("B", "decoy2", [0.0, 0.0, 1.0]),
            ("C", "match", [1.0, 0.0, 0.0]),
        ]);
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let out = EuclideanMatcher.find(&probe, &g, 0.6).unwrap();
        assert!(matches!(out, MatchOutcome::Match(ref m) if m.identity.id == "C" && m.distance == 0.0));
    }

    #[test]
    fn test_tie_resolves_to_first_entry() {
        let g = gallery(&[("A", "first", [1.0, 0.0]), ("B", "second", [-1.0, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let out = EuclideanMatcher.find(&probe, &g, 2.0).unwrap();
        assert!(matches!(out, MatchOutcome::Match(ref m) if m.identity.id == "A"));
    }

    #[test]
    fn test_near_tie_keeps_first_entry() {
        let g = gallery(&[("S1", "Alice", [0.300_000_4, 0.0]), ("S2", "Bob", [0.3, 0.0])]);
        let outcome = EuclideanMatcher
            .find(&Embedding::new(vec![0.0, 0.0]), &g, DEFAULT_TOLERANCE)
            .unwrap();
        match outcome {
            MatchOutcome::Match(m) => assert_eq!(m.identity.id, "S1"),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_clearly_nearer_later_entry_wins() {
        let g = gallery(&[("S1", "Alice", [0.31, 0.0]), ("S2", "Bob", [0.3, 0.0])]);
        let outcome = EuclideanMatcher
            .find(&Embedding::new(vec![0.0, 0.0]), &g, DEFAULT_TOLERANCE)
            .unwrap();
        match outcome {
            MatchOutcome::Match(m) => assert_eq!(m.identity.id, "S2"),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_probe_dimension_mismatch_is_error() {
        let probe = Embedding::new(vec![0.1, 0.2]);
        assert_eq!(
            EuclideanMatcher.find(&probe, &alice_bob(), 0.6),
            Err(EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_non_finite_probe_is_error() {
        let probe = Embedding::new(vec![0.1, f32::NAN, 0.3, 0.4]);
        assert_eq!(
            EuclideanMatcher.find(&probe, &alice_bob(), 0.6),
            Err(EmbeddingError::NonFinite(1))
        );
    }
}
