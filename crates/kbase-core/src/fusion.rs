//! Hybrid score fusion.
//!
//! Merges a semantic (nearest-neighbour) hit list and a lexical
//! (keyword-count) hit list into a single ranked [`EvidenceSet`].
//!
//! # Scoring
//!
//! | Signal | Formula |
//! |--------|---------|
//! | semantic | `1 / (1 + max(distance, 0))` |
//! | lexical | `raw_count / max_raw_count` (0 when the max is 0) |
//! | combined | `0.6 × semantic + 0.4 × lexical` |
//!
//! A chunk found by only one channel gets `0` for the other. Candidates are
//! ordered by combined score, then semantic score, then semantic rank;
//! lexical-only candidates follow all semantic ones in lexical order.

use std::collections::{HashMap, HashSet};

use crate::models::{Candidate, ChunkId, ChunkRef, EvidenceSet, LexicalHit, SemanticHit};

pub const SEMANTIC_WEIGHT: f64 = 0.6;
pub const LEXICAL_WEIGHT: f64 = 0.4;

/// Resolves chunk identifiers from the semantic channel to their text.
pub trait ChunkLookup {
    fn chunk(&self, id: ChunkId) -> Option<&ChunkRef>;
}

impl ChunkLookup for HashMap<ChunkId, ChunkRef> {
    fn chunk(&self, id: ChunkId) -> Option<&ChunkRef> {
        self.get(&id)
    }
}

/// Convert a distance (smaller = closer) into a similarity in `(0, 1]`.
pub fn semantic_score(distance: f32) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    1.0 / (1.0 + f64::from(distance.max(0.0)))
}

/// Fuse both channels and keep the top `k` candidates.
///
/// Semantic hits whose chunk cannot be resolved (neither by `lookup` nor by
/// a lexical hit for the same chunk) are dropped. Repeated hits for one
/// chunk keep the first occurrence.
pub fn fuse(
    semantic: &[SemanticHit],
    lexical: &[LexicalHit],
    lookup: &impl ChunkLookup,
    k: usize,
) -> EvidenceSet {
    let max_raw = lexical.iter().map(|h| h.raw_match_count).max().unwrap_or(0);
    let normalize = |raw: u32| {
        if max_raw > 0 {
            f64::from(raw) / f64::from(max_raw)
        } else {
            0.0
        }
    };

    let lexical_by_id: HashMap<ChunkId, &LexicalHit> = lexical
        .iter()
        .rev()
        .map(|h| (h.chunk_id, h))
        .collect();

    let mut candidates: Vec<Candidate> = Vec::with_capacity(semantic.len() + lexical.len());
    let mut seen: HashSet<ChunkId> = HashSet::new();

    for hit in semantic {
        if !seen.insert(hit.chunk_id) {
            continue;
        }
        let lex = lexical_by_id.get(&hit.chunk_id);
        let (filename, text) = match (lookup.chunk(hit.chunk_id), lex) {
            (Some(c), _) => (c.filename.clone(), c.text.clone()),
            (None, Some(l)) => (l.filename.clone(), l.text.clone()),
            (None, None) => continue,
        };
        candidates.push(Candidate {
            chunk_id: hit.chunk_id,
            filename,
            text,
            semantic_score: semantic_score(hit.distance),
            lexical_score: lex.map(|l| normalize(l.raw_match_count)).unwrap_or(0.0),
            raw_match_count: lex.map(|l| l.raw_match_count).unwrap_or(0),
            combined_score: 0.0,
        });
    }

    for hit in lexical {
        if !seen.insert(hit.chunk_id) {
            continue;
        }
        candidates.push(Candidate {
            chunk_id: hit.chunk_id,
            filename: hit.filename.clone(),
            text: hit.text.clone(),
            semantic_score: 0.0,
            lexical_score: normalize(hit.raw_match_count),
            raw_match_count: hit.raw_match_count,
            combined_score: 0.0,
        });
    }

    for c in &mut candidates {
        c.combined_score = SEMANTIC_WEIGHT * c.semantic_score + LEXICAL_WEIGHT * c.lexical_score;
    }

    // Stable: equal keys keep semantic rank, then lexical rank.
    candidates.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then(b.semantic_score.total_cmp(&a.semantic_score))
    });
    candidates.truncate(k);

    EvidenceSet::from_ranked(candidates)
}
