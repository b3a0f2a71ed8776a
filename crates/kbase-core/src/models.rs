//! Data types shared by the store, the retrieval pipeline, and frontends.
//!
//! | Type | Lifetime |
//! |------|----------|
//! | [`Document`], [`Chunk`] | persisted, owned by a [`Store`](crate::store::Store) |
//! | [`Candidate`], [`EvidenceSet`] | one query |
//! | [`Citation`] | attached to one reply |

use serde::Serialize;
use sha2::{Digest, Sha256};

pub type DocumentId = i64;
pub type ChunkId = i64;

/// A stored source document.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub file_path: String,
    /// SHA-256 hex of the UTF-8 content; unique across the store.
    pub file_hash: String,
    /// Unix timestamp (seconds).
    pub uploaded_at: i64,
    pub content: String,
    pub chunk_count: i64,
    /// Unix timestamp of the last index build that covered this document.
    pub indexed_at: Option<i64>,
}

/// Input for [`Store::add_document`](crate::store::Store::add_document).
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub file_path: String,
    pub content: String,
}

impl NewDocument {
    pub fn new(
        filename: impl Into<String>,
        file_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            file_path: file_path.into(),
            content: content.into(),
        }
    }

    pub fn hash(&self) -> String {
        content_hash(&self.content)
    }
}

/// SHA-256 hex digest used for document de-duplication.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A retrievable unit of document text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    /// Zero-based, contiguous within the owning document.
    pub chunk_index: i64,
    pub text: String,
    pub meta: serde_json::Value,
}

/// Minimal view of a chunk needed to build a [`Candidate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRef {
    pub chunk_id: ChunkId,
    pub filename: String,
    pub text: String,
}

/// One nearest-neighbour result. Smaller distance means closer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticHit {
    pub chunk_id: ChunkId,
    pub distance: f32,
}

/// One keyword-search result with its raw (unnormalized) match count.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: ChunkId,
    pub raw_match_count: u32,
    pub filename: String,
    pub text: String,
}

/// A chunk scored for a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub chunk_id: ChunkId,
    pub filename: String,
    pub text: String,
    pub semantic_score: f64,
    pub lexical_score: f64,
    pub raw_match_count: u32,
    pub combined_score: f64,
}

/// Top-K candidates, sorted by descending `combined_score`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EvidenceSet {
    candidates: Vec<Candidate>,
}

impl EvidenceSet {
    /// Wraps an already-ranked list. Order is preserved as given.
    pub fn from_ranked(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn top(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.candidates.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.candidates
    }
}

impl<'a> IntoIterator for &'a EvidenceSet {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

/// Pointer from an answer back to the chunk that supports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub filename: String,
    pub chunk_id: ChunkId,
    pub excerpt: String,
    /// `true` when the generated answer referenced this evidence item with
    /// an in-range marker; `false` when it was included without one.
    pub verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let h = content_hash("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_identical_content_same_hash() {
        let a = NewDocument::new("a.txt", "/tmp/a.txt", "same body");
        let b = NewDocument::new("b.txt", "/tmp/b.txt", "same body");
        assert_eq!(a.hash(), b.hash());
    }
}
