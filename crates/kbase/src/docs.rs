//! Document management (`kb docs list|show|delete`).

use anyhow::{bail, Result};

use kbase_core::models::DocumentId;
use kbase_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

async fn open(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

pub async fn run_list(config: &Config) -> Result<()> {
    let store = open(config).await?;
    let docs = store.list_documents().await?;

    if docs.is_empty() {
        println!("No documents imported.");
    } else {
        println!(
            "{:>6}  {:<32} {:<16} {:>6}  {}",
            "ID", "FILENAME", "UPLOADED", "CHUNKS", "INDEXED"
        );
        for d in &docs {
            let indexed = d.indexed_at.map(format_ts).unwrap_or_else(|| "no".into());
            println!(
                "{:>6}  {:<32} {:<16} {:>6}  {}",
                d.id,
                d.filename,
                format_ts(d.uploaded_at),
                d.chunk_count,
                indexed
            );
        }
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_show(config: &Config, id: DocumentId) -> Result<()> {
    let store = open(config).await?;

    let doc = match store.get_document(id).await? {
        Some(d) => d,
        None => bail!("Document not found: {}", id),
    };
    let chunks = store.document_chunks(id).await?;

    println!("--- Document ---");
    println!("id:        {}", doc.id);
    println!("filename:  {}", doc.filename);
    println!("path:      {}", doc.file_path);
    println!("hash:      {}", doc.file_hash);
    println!("uploaded:  {}", format_ts(doc.uploaded_at));
    match doc.indexed_at {
        Some(ts) => println!("indexed:   {}", format_ts(ts)),
        None => println!("indexed:   no"),
    }
    println!();
    println!("--- Chunks ({}) ---", chunks.len());
    for c in &chunks {
        println!("[{}] (chunk id {})", c.chunk_index, c.id);
        println!("{}", c.text);
        println!();
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, id: DocumentId) -> Result<()> {
    let store = open(config).await?;
    let deleted = store.delete_document(id).await?;
    store.pool().close().await;

    if !deleted {
        bail!("Document not found: {}", id);
    }
    println!("Deleted document {} with its chunks and vectors.", id);
    Ok(())
}
