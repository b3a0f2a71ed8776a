//! Confidence gate: decides whether evidence is strong enough to answer.
//!
//! Checks run in order and the first failure wins:
//!
//! 1. empty evidence
//! 2. top combined score below [`LOW_CONFIDENCE_THRESHOLD`]
//! 3. with at least [`SPREAD_MIN_CANDIDATES`] candidates, a score spread
//!    (`max - min`) below [`MIN_SCORE_SPREAD`]

use std::fmt;

use serde::Serialize;

use crate::models::EvidenceSet;

pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.3;
pub const MIN_SCORE_SPREAD: f64 = 0.05;
pub const SPREAD_MIN_CANDIDATES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateReason {
    NoEvidence,
    LowTopScore { top: f64, threshold: f64 },
    FlatScores { spread: f64, threshold: f64 },
    Sufficient,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateReason::NoEvidence => write!(f, "no relevant documents found"),
            GateReason::LowTopScore { top, threshold } => write!(
                f,
                "best match score {:.3} is below the confidence threshold {:.3}",
                top, threshold
            ),
            GateReason::FlatScores { spread, threshold } => write!(
                f,
                "candidate scores are too close together (spread {:.3} < {:.3}), no clear best match",
                spread, threshold
            ),
            GateReason::Sufficient => write!(f, "evidence is sufficient"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assessment {
    pub confident: bool,
    pub reason: GateReason,
}

pub fn assess(evidence: &EvidenceSet) -> Assessment {
    let reject = |reason| Assessment {
        confident: false,
        reason,
    };

    let top = match evidence.top() {
        Some(c) => c.combined_score,
        None => return reject(GateReason::NoEvidence),
    };

    if top < LOW_CONFIDENCE_THRESHOLD {
        return reject(GateReason::LowTopScore {
            top,
            threshold: LOW_CONFIDENCE_THRESHOLD,
        });
    }

    if evidence.len() >= SPREAD_MIN_CANDIDATES {
        let (min, max) = evidence.iter().map(|c| c.combined_score).fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), s| (lo.min(s), hi.max(s)),
        );
        let spread = max - min;
        if spread < MIN_SCORE_SPREAD {
            return reject(GateReason::FlatScores {
                spread,
                threshold: MIN_SCORE_SPREAD,
            });
        }
    }

    Assessment {
        confident: true,
        reason: GateReason::Sufficient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;

    fn evidence(scores: &[f64]) -> EvidenceSet {
        EvidenceSet::from_ranked(
            scores
                .iter()
                .enumerate()
                .map(|(i, &s)| Candidate {
                    chunk_id: i as i64 + 1,
                    filename: format!("f{}.txt", i),
                    text: String::new(),
                    semantic_score: s,
                    lexical_score: 0.0,
                    raw_match_count: 0,
                    combined_score: s,
                })
                .collect(),
        )
    }

    #[test]
    fn test_empty_not_confident() {
        let a = assess(&evidence(&[]));
        assert!(!a.confident);
        assert_eq!(a.reason, GateReason::NoEvidence);
        assert_eq!(a.reason.to_string(), "no relevant documents found");
    }

    #[test]
    fn test_single_strong_candidate_confident() {
        let a = assess(&evidence(&[0.9]));
        assert!(a.confident);
        assert_eq!(a.reason, GateReason::Sufficient);
    }

    #[test]
    fn test_low_top_score() {
        let a = assess(&evidence(&[0.29, 0.1]));
        assert!(!a.confident);
        match a.reason {
            GateReason::LowTopScore { top, threshold } => {
                assert_eq!(top, 0.29);
                assert_eq!(threshold, 0.3);
            }
            other => panic!("unexpected reason {:?}", other),
        }
        assert!(a.reason.to_string().contains("0.290"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(assess(&evidence(&[0.3])).confident);
    }

    #[test]
    fn test_flat_scores_rejected() {
        let a = assess(&evidence(&[0.9, 0.89, 0.88]));
        assert!(!a.confident);
        assert!(matches!(a.reason, GateReason::FlatScores { .. }));
    }

    #[test]
    fn test_spread_ignored_below_three_candidates() {
        assert!(assess(&evidence(&[0.9, 0.89])).confident);
    }

    #[test]
    fn test_spread_sufficient() {
        assert!(assess(&evidence(&[0.9, 0.6, 0.4])).confident);
    }

    #[test]
    fn test_low_top_score_checked_before_spread() {
        let a = assess(&evidence(&[0.2, 0.2, 0.2]));
        assert!(matches!(a.reason, GateReason::LowTopScore { .. }));
    }
}
