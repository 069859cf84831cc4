//! Gallery matching.
//!
//! A probe matches a gallery entry when their Euclidean distance is within
//! the tolerance. [`FirstMatchMatcher`] returns the earliest matching entry in
//! gallery order; [`BestMatchMatcher`] returns the closest one.

use crate::types::{Embedding, FaceRecord, Identity};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Distance tolerance for L2-normalized ArcFace embeddings.
///
/// sqrt(2 - 2 * 0.40): the distance at cosine similarity 0.40.
pub const DEFAULT_TOLERANCE: f64 = 1.10;

/// Strategy for deciding which gallery entry, if any, a probe belongs to.
pub trait Matcher {
    fn identify(&self, probe: &Embedding, gallery: &[FaceRecord]) -> Identity;
}

/// Distance from the probe to every gallery entry, in gallery order.
///
/// Entries with a different dimension get `f64::INFINITY`.
pub fn face_distances(gallery: &[FaceRecord], probe: &Embedding) -> Vec<f64> {
    gallery
        .iter()
        .map(|record| match probe.euclidean_distance(&record.embedding) {
            Some(d) => d,
            None => {
                tracing::warn!(
                    name = %record.name,
                    stored_dim = record.embedding.dim(),
                    probe_dim = probe.dim(),
                    "embedding dimension mismatch; treating as non-match"
                );
                f64::INFINITY
            }
        })
        .collect()
}

/// Binary same/different decision for every gallery entry.
pub fn compare_faces(gallery: &[FaceRecord], probe: &Embedding, tolerance: f64) -> Vec<bool> {
    face_distances(gallery, probe)
        .into_iter()
        .map(|d| d <= tolerance)
        .collect()
}

/// First-match-wins: the earliest gallery entry within tolerance.
#[derive(Debug, Clone, Copy)]
pub struct FirstMatchMatcher {
    pub tolerance: f64,
}

impl Default for FirstMatchMatcher {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE }
    }
}

impl Matcher for FirstMatchMatcher {
    fn identify(&self, probe: &Embedding, gallery: &[FaceRecord]) -> Identity {
        face_distances(gallery, probe)
            .into_iter()
            .enumerate()
            .find(|&(_, d)| d <= self.tolerance)
            .map(|(idx, distance)| Identity::Known {
                name: gallery[idx].name.clone(),
                gallery_index: idx,
                distance,
            })
            .unwrap_or(Identity::Unknown)
    }
}

/// Minimum-distance match among entries within tolerance.
///
/// Ties keep the earlier entry.
#[derive(Debug, Clone, Copy)]
pub struct BestMatchMatcher {
    pub tolerance: f64,
}

impl Default for BestMatchMatcher {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE }
    }
}

impl Matcher for BestMatchMatcher {
    fn identify(&self, probe: &Embedding, gallery: &[FaceRecord]) -> Identity {
        let mut best: Option<(usize, f64)> = None;
        for (idx, d) in face_distances(gallery, probe).into_iter().enumerate() {
            if d > self.tolerance {
                continue;
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((idx, d));
            }
        }

        match best {
            Some((idx, distance)) => Identity::Known {
                name: gallery[idx].name.clone(),
                gallery_index: idx,
                distance,
            },
            None => Identity::Unknown,
        }
    }
}

/// Which matcher a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    First,
    Best,
}

impl MatchPolicy {
    pub fn matcher(self, tolerance: f64) -> Box<dyn Matcher + Send> {
        match self {
            MatchPolicy::First => Box::new(FirstMatchMatcher { tolerance }),
            MatchPolicy::Best => Box::new(BestMatchMatcher { tolerance }),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "best" => Ok(MatchPolicy::Best),
            other => Err(format!("unknown match policy: {other} (expected first or best)")),
        }
    }
}

/// First known identity across a frame's candidates, in candidate order.
pub fn identify_first(
    matcher: &dyn Matcher,
    candidates: &[Embedding],
    gallery: &[FaceRecord],
) -> Identity {
    candidates
        .iter()
        .map(|probe| matcher.identify(probe, gallery))
        .find(Identity::is_known)
        .unwrap_or(Identity::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, values: Vec<f64>) -> FaceRecord {
        FaceRecord {
            name: name.into(),
            embedding: Embedding::new(values),
            registered_at: "2024-05-01T14:05:00.000000".into(),
        }
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(FirstMatchMatcher::default().identify(&probe, &[]), Identity::Unknown);
        assert_eq!(BestMatchMatcher::default().identify(&probe, &[]), Identity::Unknown);
    }

    #[test]
    fn test_empty_candidates_is_unknown_for_any_gallery() {
        let matcher = FirstMatchMatcher::default();
        for n in 0..4 {
            let gallery: Vec<FaceRecord> =
                (0..n).map(|i| record(&format!("p{i}"), vec![i as f64, 0.0])).collect();
            assert_eq!(identify_first(&matcher, &[], &gallery), Identity::Unknown);
        }
    }

    #[test]
    fn test_first_match_wins() {
        // Both "early" and "late" are within tolerance; "late" is closer.
        let gallery = vec![
            record("stranger", vec![10.0, 10.0]),
            record("early", vec![0.5, 0.0]),
            record("late", vec![0.1, 0.0]),
        ];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let matcher = FirstMatchMatcher { tolerance: 0.6 };

        match matcher.identify(&probe, &gallery) {
            Identity::Known { name, gallery_index, distance } => {
                assert_eq!(name, "early");
                assert_eq!(gallery_index, 1);
                assert!((distance - 0.5).abs() < 1e-12);
            }
            Identity::Unknown => panic!("expected a match"),
        }
    }

    #[test]
    fn test_duplicate_names_return_earliest_record() {
        let gallery = vec![record("ada", vec![0.2, 0.0]), record("ada", vec![0.0, 0.0])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let identity = FirstMatchMatcher { tolerance: 0.6 }.identify(&probe, &gallery);
        assert!(matches!(identity, Identity::Known { gallery_index: 0, .. }));
    }

    #[test]
    fn test_best_match_picks_closest() {
        let gallery = vec![record("early", vec![0.5, 0.0]), record("late", vec![0.1, 0.0])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let identity = BestMatchMatcher { tolerance: 0.6 }.identify(&probe, &gallery);
        assert_eq!(identity.name(), "late");
    }

    #[test]
    fn test_outside_tolerance_is_unknown() {
        let gallery = vec![record("far", vec![1.0, 1.0])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(FirstMatchMatcher { tolerance: 0.6 }.identify(&probe, &gallery), Identity::Unknown);
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let gallery = vec![record("edge", vec![0.6, 0.0])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(FirstMatchMatcher { tolerance: 0.6 }.identify(&probe, &gallery).is_known());
    }

    #[test]
    fn test_dimension_mismatch_is_not_a_match() {
        let gallery = vec![record("short", vec![0.0]), record("ok", vec![0.0, 0.0])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(compare_faces(&gallery, &probe, 0.6), vec![false, true]);
        assert_eq!(FirstMatchMatcher { tolerance: 0.6 }.identify(&probe, &gallery).name(), "ok");
    }

    #[test]
    fn test_identify_first_skips_unknown_candidates() {
        let gallery = vec![record("ada", vec![0.0, 0.0])];
        let candidates = vec![Embedding::new(vec![5.0, 5.0]), Embedding::new(vec![0.1, 0.0])];
        let identity = identify_first(&FirstMatchMatcher { tolerance: 0.6 }, &candidates, &gallery);
        assert_eq!(identity.name(), "ada");
    }

    #[test]
    fn test_match_policy_parse() {
        assert_eq!("first".parse::<MatchPolicy>(), Ok(MatchPolicy::First));
        assert_eq!(" BEST ".parse::<MatchPolicy>(), Ok(MatchPolicy::Best));
        assert!("closest".parse::<MatchPolicy>().is_err());
    }
}
