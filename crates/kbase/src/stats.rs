//! Knowledge-base statistics (`kb stats`).

use anyhow::Result;

use kbase_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let indexed_docs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE indexed_at IS NOT NULL")
            .fetch_one(&pool)
            .await?;
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let total_vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let store = SqliteStore::new(pool);
    let meta = store.index_meta().await?;

    println!("kbase: Knowledge Base Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {} ({} indexed)", total_docs, indexed_docs);
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Vectors:     {} / {} ({}%)",
        total_vectors,
        total_chunks,
        if total_chunks > 0 {
            (total_vectors * 100) / total_chunks
        } else {
            0
        }
    );
    println!();
    match meta {
        Some(m) => {
            let built = chrono::DateTime::from_timestamp(m.built_at, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| m.built_at.to_string());
            println!("  Index:       {} ({} dims, built {})", m.model, m.dimension, built);
        }
        None => println!("  Index:       not built (run `kb index`)"),
    }
    println!();

    store.pool().close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
