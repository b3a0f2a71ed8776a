//! In-memory [`Store`] implementation for tests.
//!
//! Uses `BTreeMap`s behind one `std::sync::RwLock`. Ids are assigned from
//! counters starting at 1, matching SQLite rowid behaviour.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Chunk, ChunkId, ChunkRef, Document, DocumentId, LexicalHit, NewDocument};

use super::{count_matches, keyword_terms, rank_keyword_hits, IndexMeta, Store};

#[derive(Default)]
struct Inner {
    docs: BTreeMap<DocumentId, Document>,
    chunks: BTreeMap<ChunkId, Chunk>,
    vectors: BTreeMap<ChunkId, Vec<f32>>,
    meta: Option<IndexMeta>,
    next_doc: DocumentId,
    next_chunk: ChunkId,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn add_document(&self, doc: &NewDocument) -> Result<Option<DocumentId>> {
        let hash = doc.hash();
        let mut inner = self.write()?;
        if inner.docs.values().any(|d| d.file_hash == hash) {
            return Ok(None);
        }
        inner.next_doc += 1;
        let id = inner.next_doc;
        inner.docs.insert(
            id,
            Document {
                id,
                filename: doc.filename.clone(),
                file_path: doc.file_path.clone(),
                file_hash: hash,
                uploaded_at: chrono::Utc::now().timestamp(),
                content: doc.content.clone(),
                chunk_count: 0,
                indexed_at: None,
            },
        );
        Ok(Some(id))
    }

    async fn add_chunks(&self, doc_id: DocumentId, texts: &[String]) -> Result<Vec<ChunkId>> {
        let mut inner = self.write()?;
        if !inner.docs.contains_key(&doc_id) {
            return Err(anyhow!("document {} does not exist", doc_id));
        }
        let mut ids = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            inner.next_chunk += 1;
            let id = inner.next_chunk;
            inner.chunks.insert(
                id,
                Chunk {
                    id,
                    document_id: doc_id,
                    chunk_index: i as i64,
                    text: text.clone(),
                    meta: serde_json::json!({}),
                },
            );
            ids.push(id);
        }
        if let Some(doc) = inner.docs.get_mut(&doc_id) {
            doc.chunk_count = texts.len() as i64;
        }
        Ok(ids)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        Ok(self.read()?.docs.values().cloned().collect())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.read()?.docs.get(&id).cloned())
    }

    async fn document_chunks(&self, id: DocumentId) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        let mut chunks: Vec<Chunk> = inner
            .chunks
            .values()
            .filter(|c| c.document_id == id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.docs.remove(&id).is_none() {
            return Ok(false);
        }
        let doomed: Vec<ChunkId> = inner
            .chunks
            .values()
            .filter(|c| c.document_id == id)
            .map(|c| c.id)
            .collect();
        for cid in doomed {
            inner.chunks.remove(&cid);
            inner.vectors.remove(&cid);
        }
        Ok(true)
    }

    async fn mark_indexed(&self, ids: &[DocumentId], at: i64) -> Result<()> {
        let mut inner = self.write()?;
        for id in ids {
            if let Some(doc) = inner.docs.get_mut(id) {
                doc.indexed_at = Some(at);
            }
        }
        Ok(())
    }

    async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(self.read()?.chunks.values().cloned().collect())
    }

    async fn chunks_without_vectors(&self) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        Ok(inner
            .chunks
            .values()
            .filter(|c| !inner.vectors.contains_key(&c.id))
            .cloned()
            .collect())
    }

    async fn resolve_chunks(&self, ids: &[ChunkId]) -> Result<Vec<ChunkRef>> {
        let inner = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.chunks.get(id))
            .filter_map(|c| {
                inner.docs.get(&c.document_id).map(|d| ChunkRef {
                    chunk_id: c.id,
                    filename: d.filename.clone(),
                    text: c.text.clone(),
                })
            })
            .collect())
    }

    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let terms = keyword_terms(query);
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let hits: Vec<LexicalHit> = inner
            .chunks
            .values()
            .filter_map(|c| {
                let n = count_matches(&c.text, &terms);
                let doc = inner.docs.get(&c.document_id)?;
                (n > 0).then(|| LexicalHit {
                    chunk_id: c.id,
                    raw_match_count: n,
                    filename: doc.filename.clone(),
                    text: c.text.clone(),
                })
            })
            .take(k * 2)
            .collect();
        Ok(rank_keyword_hits(hits, k))
    }

    async fn replace_vectors(&self, meta: &IndexMeta, vectors: &[(ChunkId, Vec<f32>)]) -> Result<()> {
        let mut inner = self.write()?;
        inner.vectors.clear();
        for (id, v) in vectors {
            inner.vectors.insert(*id, v.clone());
        }
        inner.meta = Some(meta.clone());
        Ok(())
    }

    async fn append_vectors(&self, vectors: &[(ChunkId, Vec<f32>)]) -> Result<()> {
        let mut inner = self.write()?;
        for (id, v) in vectors {
            inner.vectors.insert(*id, v.clone());
        }
        Ok(())
    }

    async fn load_vectors(&self) -> Result<Vec<(ChunkId, Vec<f32>)>> {
        Ok(self
            .read()?
            .vectors
            .iter()
            .map(|(id, v)| (*id, v.clone()))
            .collect())
    }

    async fn index_meta(&self) -> Result<Option<IndexMeta>> {
        Ok(self.read()?.meta.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn store_with(docs: &[(&str, &[&str])]) -> InMemoryStore {
        let store = InMemoryStore::new();
        block_on(async {
            for (name, chunks) in docs {
                let body = chunks.join("\n\n");
                let id = store
                    .add_document(&NewDocument::new(*name, format!("/docs/{}", name), body))
                    .await
                    .unwrap()
                    .unwrap();
                let texts: Vec<String> = chunks.iter().map(|s| s.to_string()).collect();
                store.add_chunks(id, &texts).await.unwrap();
            }
        });
        store
    }

    #[test]
    fn test_duplicate_content_rejected() {
        let store = InMemoryStore::new();
        block_on(async {
            let first = store
                .add_document(&NewDocument::new("a.txt", "/a.txt", "same"))
                .await
                .unwrap();
            let second = store
                .add_document(&NewDocument::new("b.txt", "/b.txt", "same"))
                .await
                .unwrap();
            assert_eq!(first, Some(1));
            assert_eq!(second, None);
            assert_eq!(store.list_documents().await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let store = store_with(&[("a.txt", &["one", "two", "three"])]);
        block_on(async {
            let chunks = store.document_chunks(1).await.unwrap();
            let idx: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
            assert_eq!(idx, vec![0, 1, 2]);
            assert_eq!(store.get_document(1).await.unwrap().unwrap().chunk_count, 3);
        });
    }

    #[test]
    fn test_delete_cascades() {
        let store = store_with(&[("a.txt", &["one", "two"]), ("b.txt", &["three"])]);
        block_on(async {
            store
                .append_vectors(&[(1, vec![1.0]), (3, vec![3.0])])
                .await
                .unwrap();
            assert!(store.delete_document(1).await.unwrap());
            assert!(!store.delete_document(1).await.unwrap());
            assert_eq!(store.all_chunks().await.unwrap().len(), 1);
            let vectors = store.load_vectors().await.unwrap();
            assert_eq!(vectors, vec![(3, vec![3.0])]);
            assert!(store.resolve_chunks(&[1, 2]).await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_keyword_search_counts_distinct_terms() {
        let store = store_with(&[
            ("a.txt", &["Rust async runtime", "nothing relevant"]),
            ("b.txt", &["rust ownership and ASYNC traits and runtime"]),
        ]);
        block_on(async {
            let hits = store.keyword_search("rust async borrow", 5).await.unwrap();
            assert_eq!(hits.len(), 2);
            assert_eq!(hits[0].raw_match_count, 2);
            assert_eq!(hits[0].filename, "a.txt");
            assert_eq!(hits[1].filename, "b.txt");
            assert!(store.keyword_search("   ", 5).await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_chunks_without_vectors() {
        let store = store_with(&[("a.txt", &["one", "two"])]);
        block_on(async {
            store.append_vectors(&[(1, vec![0.5])]).await.unwrap();
            let pending = store.chunks_without_vectors().await.unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].id, 2);
        });
    }
}
