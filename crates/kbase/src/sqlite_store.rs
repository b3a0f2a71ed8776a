//! SQLite-backed [`Store`] implementation.
//!
//! Chunks cascade-delete with their document and vectors with their chunk
//! (foreign keys are enabled on every connection, see [`crate::db`]).
//! Keyword search scans chunks in id order and matches terms in Rust with
//! Unicode lowercasing; SQLite's `LIKE` only folds ASCII.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use kbase_core::embedding::{blob_to_vec, vec_to_blob};
use kbase_core::models::{Chunk, ChunkId, ChunkRef, Document, DocumentId, LexicalHit, NewDocument};
use kbase_core::store::{count_matches, keyword_terms, rank_keyword_hits, IndexMeta, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        file_hash: row.get("file_hash"),
        uploaded_at: row.get("uploaded_at"),
        content: row.get("content"),
        chunk_count: row.get("chunk_count"),
        indexed_at: row.get("indexed_at"),
    }
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    let meta_json: String = row.get("meta_json");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        meta: serde_json::from_str(&meta_json).unwrap_or_else(|_| serde_json::json!({})),
    }
}

const DOCUMENT_COLUMNS: &str =
    "id, filename, file_path, file_hash, uploaded_at, content, chunk_count, indexed_at";

#[async_trait]
impl Store for SqliteStore {
    async fn add_document(&self, doc: &NewDocument) -> Result<Option<DocumentId>> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO documents (filename, file_path, file_hash, uploaded_at, content)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(file_hash) DO NOTHING
            "#,
        )
        .bind(&doc.filename)
        .bind(&doc.file_path)
        .bind(doc.hash())
        .bind(now)
        .bind(&doc.content)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    async fn add_chunks(&self, doc_id: DocumentId, texts: &[String]) -> Result<Vec<ChunkId>> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
            .bind(doc_id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            bail!("document {} does not exist", doc_id);
        }

        let mut ids = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let result = sqlx::query(
                "INSERT INTO chunks (document_id, chunk_index, text, meta_json) VALUES (?, ?, ?, '{}')",
            )
            .bind(doc_id)
            .bind(i as i64)
            .bind(text)
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }

        sqlx::query("UPDATE documents SET chunk_count = ? WHERE id = ?")
            .bind(texts.len() as i64)
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids)
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY uploaded_at DESC, id DESC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn document_chunks(&self, id: DocumentId) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, text, meta_json FROM chunks WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_indexed(&self, ids: &[DocumentId], at: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("UPDATE documents SET indexed_at = ? WHERE id = ?")
                .bind(at)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, text, meta_json FROM chunks ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn chunks_without_vectors(&self) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, c.meta_json
            FROM chunks c
            LEFT JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE v.chunk_id IS NULL
            ORDER BY c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn resolve_chunks(&self, ids: &[ChunkId]) -> Result<Vec<ChunkRef>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT c.id, c.text, d.filename FROM chunks c JOIN documents d ON d.id = c.document_id WHERE c.id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                out.push(ChunkRef {
                    chunk_id: row.get("id"),
                    filename: row.get("filename"),
                    text: row.get("text"),
                });
            }
        }
        Ok(out)
    }

    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let terms = keyword_terms(query);
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let limit = k * 2;
        let mut rows = sqlx::query(
            "SELECT c.id, c.text, d.filename FROM chunks c JOIN documents d ON d.id = c.document_id ORDER BY c.id",
        )
        .fetch(&self.pool);

        let mut hits: Vec<LexicalHit> = Vec::new();
        while let Some(row) = rows.try_next().await? {
            let text: String = row.get("text");
            let raw_match_count = count_matches(&text, &terms);
            if raw_match_count == 0 {
                continue;
            }
            hits.push(LexicalHit {
                chunk_id: row.get("id"),
                raw_match_count,
                filename: row.get("filename"),
                text,
            });
            if hits.len() == limit {
                break;
            }
        }

        Ok(rank_keyword_hits(hits, k))
    }

    async fn replace_vectors(&self, meta: &IndexMeta, vectors: &[(ChunkId, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?;
        for (chunk_id, v) in vectors {
            sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
                .bind(chunk_id)
                .bind(vec_to_blob(v))
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO index_meta (id, model, dimension, built_at) VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                model = excluded.model,
                dimension = excluded.dimension,
                built_at = excluded.built_at
            "#,
        )
        .bind(&meta.model)
        .bind(meta.dimension as i64)
        .bind(meta.built_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append_vectors(&self, vectors: &[(ChunkId, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (chunk_id, v) in vectors {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET embedding = excluded.embedding
                "#,
            )
            .bind(chunk_id)
            .bind(vec_to_blob(v))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_vectors(&self) -> Result<Vec<(ChunkId, Vec<f32>)>> {
        let rows = sqlx::query("SELECT chunk_id, embedding FROM chunk_vectors ORDER BY chunk_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get("chunk_id"), blob_to_vec(&blob))
            })
            .collect())
    }

    async fn index_meta(&self) -> Result<Option<IndexMeta>> {
        let row = sqlx::query("SELECT model, dimension, built_at FROM index_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            let dimension: i64 = row.get("dimension");
            IndexMeta {
                model: row.get("model"),
                dimension: dimension as usize,
                built_at: row.get("built_at"),
            }
        }))
    }
}
