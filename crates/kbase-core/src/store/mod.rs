//! Storage abstraction for kbase.
//!
//! The [`Store`] trait defines every persistence operation the import,
//! indexing, and answer pipelines need, so the same pipeline runs against
//! SQLite in the app and against [`InMemoryStore`](memory::InMemoryStore)
//! in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, ChunkId, ChunkRef, Document, DocumentId, LexicalHit, NewDocument};

/// Metadata recorded by the last full index build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMeta {
    pub model: String,
    pub dimension: usize,
    pub built_at: i64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add_document`](Store::add_document) | Insert a document unless its content hash exists |
/// | [`add_chunks`](Store::add_chunks) | Store a document's segments with contiguous indices |
/// | [`delete_document`](Store::delete_document) | Remove a document, its chunks, and their vectors |
/// | [`resolve_chunks`](Store::resolve_chunks) | Chunk text and filename for semantic hits |
/// | [`keyword_search`](Store::keyword_search) | Substring keyword search with raw match counts |
/// | [`replace_vectors`](Store::replace_vectors) | Persist a full index build |
/// | [`append_vectors`](Store::append_vectors) | Persist an incremental index build |
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns `None` when a document with identical content already exists.
    async fn add_document(&self, doc: &NewDocument) -> Result<Option<DocumentId>>;

    /// Store chunk texts as indices `0..n` and update the document's chunk count.
    async fn add_chunks(&self, doc_id: DocumentId, texts: &[String]) -> Result<Vec<ChunkId>>;

    async fn list_documents(&self) -> Result<Vec<Document>>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Chunks of one document ordered by index.
    async fn document_chunks(&self, id: DocumentId) -> Result<Vec<Chunk>>;

    /// Returns `false` when no such document exists.
    async fn delete_document(&self, id: DocumentId) -> Result<bool>;

    async fn mark_indexed(&self, ids: &[DocumentId], at: i64) -> Result<()>;

    async fn all_chunks(&self) -> Result<Vec<Chunk>>;

    async fn chunks_without_vectors(&self) -> Result<Vec<Chunk>>;

    /// Resolve chunk ids; ids that no longer exist are omitted.
    async fn resolve_chunks(&self, ids: &[ChunkId]) -> Result<Vec<ChunkRef>>;

    /// Split `query` on whitespace and score chunks by how many distinct
    /// terms they contain (case-insensitive). At most `2k` matching chunks
    /// are scored; the best `k` are returned, highest count first.
    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>>;

    /// Drop all stored vectors and store `vectors` with new index metadata.
    async fn replace_vectors(&self, meta: &IndexMeta, vectors: &[(ChunkId, Vec<f32>)]) -> Result<()>;

    async fn append_vectors(&self, vectors: &[(ChunkId, Vec<f32>)]) -> Result<()>;

    /// All stored vectors in chunk id order.
    async fn load_vectors(&self) -> Result<Vec<(ChunkId, Vec<f32>)>>;

    async fn index_meta(&self) -> Result<Option<IndexMeta>>;
}

/// Distinct whitespace-separated terms, lowercased.
pub fn keyword_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for t in query.split_whitespace() {
        let t = t.to_lowercase();
        if !terms.contains(&t) {
            terms.push(t);
        }
    }
    terms
}

/// Number of `terms` (already lowercased) contained in `text`.
pub fn count_matches(text: &str, terms: &[String]) -> u32 {
    let lower = text.to_lowercase();
    terms.iter().filter(|t| lower.contains(t.as_str())).count() as u32
}

/// Score candidate rows and keep the top `k`. Order among equal counts
/// follows the candidate order.
pub fn rank_keyword_hits(mut hits: Vec<LexicalHit>, k: usize) -> Vec<LexicalHit> {
    hits.sort_by(|a, b| b.raw_match_count.cmp(&a.raw_match_count));
    hits.truncate(k);
    hits
}
