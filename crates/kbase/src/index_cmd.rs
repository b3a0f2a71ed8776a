//! Vector index builds (`kb index`, `kb index --pending`).
//!
//! A full build re-embeds every chunk and replaces all stored vectors in
//! one transaction, so a failed batch leaves the previous index intact.
//! A pending build embeds only chunks without a vector; failed batches are
//! logged and retried on the next run.
//!
//! Both paths load the vectors into a [`FlatL2Index`] before persisting so
//! count and dimension mismatches are caught before anything is written.

use std::collections::BTreeSet;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use kbase_core::embedding::Embedder;
use kbase_core::index::{FlatL2Index, VectorIndex};
use kbase_core::models::{Chunk, ChunkId, DocumentId};
use kbase_core::store::{IndexMeta, Store};
use kbase_core::KbError;

use crate::config::Settings;
use crate::db;
use crate::embedding::OpenAiEmbedder;
use crate::progress::{IndexProgressEvent, IndexProgressReporter, ProgressMode};
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub model: String,
    pub dimension: usize,
    pub total: u64,
    pub embedded: u64,
    pub failed: u64,
}

fn covered_documents(chunks: &[Chunk]) -> Vec<DocumentId> {
    chunks
        .iter()
        .map(|c| c.document_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Re-embed every chunk and replace the stored index.
pub async fn rebuild_index(
    store: &dyn Store,
    embedder: &dyn Embedder,
    batch_size: usize,
    progress: &dyn IndexProgressReporter,
) -> Result<IndexReport> {
    let chunks = store.all_chunks().await?;
    let total = chunks.len() as u64;
    progress.report(IndexProgressEvent::Started { total });

    let mut ids: Vec<ChunkId> = Vec::with_capacity(chunks.len());
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder.embed(&texts).await?;
        ids.extend(batch.iter().map(|c| c.id));
        vectors.extend(embedded);
        progress.report(IndexProgressEvent::Embedding {
            n: ids.len() as u64,
            total,
        });
    }

    let dimension = embedder.dimension();
    let mut index = FlatL2Index::new();
    index.build(&vectors, &ids, dimension)?;

    progress.report(IndexProgressEvent::Persisting { total });
    let now = chrono::Utc::now().timestamp();
    let meta = IndexMeta {
        model: embedder.model_name().to_string(),
        dimension,
        built_at: now,
    };
    let pairs: Vec<(ChunkId, Vec<f32>)> = ids.into_iter().zip(vectors).collect();
    store.replace_vectors(&meta, &pairs).await?;
    store.mark_indexed(&covered_documents(&chunks), now).await?;

    info!(vectors = index.stats().total_vectors, dimension, "index rebuilt");

    Ok(IndexReport {
        model: meta.model,
        dimension,
        total,
        embedded: total,
        failed: 0,
    })
}

/// Embed chunks that have no stored vector and append them.
///
/// Without a previous build this is equivalent to [`rebuild_index`].
/// Otherwise the embedder must produce vectors of the recorded dimension.
pub async fn index_pending(
    store: &dyn Store,
    embedder: &dyn Embedder,
    batch_size: usize,
    progress: &dyn IndexProgressReporter,
) -> Result<IndexReport> {
    let meta = match store.index_meta().await? {
        Some(meta) => meta,
        None => {
            info!("no index built yet, running a full build");
            return rebuild_index(store, embedder, batch_size, progress).await;
        }
    };

    if meta.dimension != embedder.dimension() {
        return Err(KbError::Index(format!(
            "stored index has dimension {} but {} produces {}; run `kb index` to rebuild",
            meta.dimension,
            embedder.model_name(),
            embedder.dimension()
        ))
        .into());
    }
    if meta.model != embedder.model_name() {
        warn!(
            stored = %meta.model,
            configured = %embedder.model_name(),
            "embedding model changed since the last full build"
        );
    }

    let pending = store.chunks_without_vectors().await?;
    let total = pending.len() as u64;
    progress.report(IndexProgressEvent::Started { total });

    let existing = store.load_vectors().await?;
    let (existing_ids, existing_vectors): (Vec<ChunkId>, Vec<Vec<f32>>) =
        existing.into_iter().unzip();
    let mut index = FlatL2Index::new();
    index.build(&existing_vectors, &existing_ids, meta.dimension)?;

    let mut embedded = 0u64;
    let mut failed = 0u64;
    let mut covered: Vec<Chunk> = Vec::new();
    let now = chrono::Utc::now().timestamp();

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let ids: Vec<ChunkId> = batch.iter().map(|c| c.id).collect();

        let vectors = match embedder.embed(&texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, chunks = batch.len(), "embedding batch failed");
                failed += batch.len() as u64;
                continue;
            }
        };

        index.add(&vectors, &ids)?;
        let pairs: Vec<(ChunkId, Vec<f32>)> = ids.into_iter().zip(vectors).collect();
        store.append_vectors(&pairs).await?;

        embedded += batch.len() as u64;
        covered.extend(batch.iter().cloned());
        progress.report(IndexProgressEvent::Embedding {
            n: embedded + failed,
            total,
        });
    }

    let incomplete: BTreeSet<DocumentId> = store
        .chunks_without_vectors()
        .await?
        .iter()
        .map(|c| c.document_id)
        .collect();
    let complete: Vec<DocumentId> = covered_documents(&covered)
        .into_iter()
        .filter(|id| !incomplete.contains(id))
        .collect();
    store.mark_indexed(&complete, now).await?;
    info!(embedded, failed, vectors = index.stats().total_vectors, "pending chunks indexed");

    Ok(IndexReport {
        model: meta.model,
        dimension: meta.dimension,
        total,
        embedded,
        failed,
    })
}

pub async fn run_index(settings: &Settings, pending: bool, progress: ProgressMode) -> Result<()> {
    let config = &settings.config;
    let embedder = OpenAiEmbedder::new(&config.embedding, &settings.embedding_key)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let reporter = progress.reporter();

    let report = if pending {
        index_pending(&store, &embedder, config.embedding.batch_size, reporter.as_ref()).await?
    } else {
        rebuild_index(&store, &embedder, config.embedding.batch_size, reporter.as_ref()).await?
    };

    println!("{}", if pending { "index pending" } else { "index rebuild" });
    println!("  model: {} ({} dims)", report.model, report.dimension);
    println!("  chunks: {}", report.total);
    println!("  embedded: {}", report.embedded);
    if report.failed > 0 {
        println!("  failed: {} (rerun `kb index --pending`)", report.failed);
    }

    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kbase_core::error::Backend;
    use kbase_core::models::NewDocument;
    use kbase_core::store::memory::InMemoryStore;

    use crate::progress::NoProgress;

    /// Two-dimensional vectors derived from text length.
    struct LengthEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dimension(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dims];
                    v[0] = t.chars().count() as f32;
                    v
                })
                .collect())
        }
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let id = store
            .add_document(&NewDocument::new("a.txt", "/a.txt", "alpha beta"))
            .await
            .unwrap()
            .unwrap();
        store
            .add_chunks(id, &["alpha".to_string(), "beta".to_string(), "gamma".to_string()])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_rebuild_stores_every_vector() {
        let store = seeded_store().await;
        let embedder = LengthEmbedder { dims: 2 };

        let report = rebuild_index(&store, &embedder, 2, &NoProgress).await.unwrap();
        assert_eq!(report.embedded, 3);
        assert_eq!(report.dimension, 2);

        assert_eq!(store.load_vectors().await.unwrap().len(), 3);
        let meta = store.index_meta().await.unwrap().unwrap();
        assert_eq!(meta.model, "length");
        let docs = store.list_documents().await.unwrap();
        assert!(docs[0].indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_pending_only_embeds_new_chunks() {
        let store = seeded_store().await;
        let embedder = LengthEmbedder { dims: 2 };
        rebuild_index(&store, &embedder, 10, &NoProgress).await.unwrap();

        let id = store
            .add_document(&NewDocument::new("b.txt", "/b.txt", "delta"))
            .await
            .unwrap()
            .unwrap();
        store.add_chunks(id, &["delta".to_string()]).await.unwrap();

        let report = index_pending(&store, &embedder, 10, &NoProgress).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.embedded, 1);
        assert_eq!(store.load_vectors().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_pending_rejects_dimension_change() {
        let store = seeded_store().await;
        rebuild_index(&store, &LengthEmbedder { dims: 2 }, 10, &NoProgress)
            .await
            .unwrap();

        let err = index_pending(&store, &LengthEmbedder { dims: 3 }, 10, &NoProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    /// Fails any batch containing a chunk that mentions "FAIL".
    struct FlakyEmbedder;

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dimension(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
            if texts.iter().any(|t| t.contains("FAIL")) {
                return Err(KbError::upstream(Backend::Embedding, "HTTP 503"));
            }
            LengthEmbedder { dims: 2 }.embed(texts).await
        }
    }

    #[tokio::test]
    async fn test_pending_leaves_partially_embedded_document_unindexed() {
        let store = seeded_store().await;
        rebuild_index(&store, &LengthEmbedder { dims: 2 }, 10, &NoProgress)
            .await
            .unwrap();

        let partial = store
            .add_document(&NewDocument::new("b.txt", "/b.txt", "ok part FAIL part"))
            .await
            .unwrap()
            .unwrap();
        store
            .add_chunks(partial, &["ok part".to_string(), "FAIL part".to_string()])
            .await
            .unwrap();
        let whole = store
            .add_document(&NewDocument::new("c.txt", "/c.txt", "fine"))
            .await
            .unwrap()
            .unwrap();
        store.add_chunks(whole, &["fine".to_string()]).await.unwrap();

        let report = index_pending(&store, &FlakyEmbedder, 1, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.embedded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(store.chunks_without_vectors().await.unwrap().len(), 1);

        let partial_doc = store.get_document(partial).await.unwrap().unwrap();
        assert!(partial_doc.indexed_at.is_none());
        let whole_doc = store.get_document(whole).await.unwrap().unwrap();
        assert!(whole_doc.indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_pending_without_meta_runs_full_build() {
        let store = seeded_store().await;
        let report = index_pending(&store, &LengthEmbedder { dims: 2 }, 10, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.embedded, 3);
        assert!(store.index_meta().await.unwrap().is_some());
    }
}
