//! Document import (`kb import`).
//!
//! Paths may be files or directories. Directories are walked recursively and
//! filtered by `[import]` include/exclude globs, matched against the path
//! relative to the directory given. `.git`, `target`, and `node_modules` are
//! always excluded. Files named explicitly bypass the globs.
//!
//! Each file is extracted, deduplicated by content hash, segmented with the
//! `[chunking]` parameters, and stored. Vectors are not computed here; run
//! `kb index` afterwards.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use kbase_core::models::NewDocument;
use kbase_core::segment::segment;
use kbase_core::store::Store;

use crate::config::{ChunkingConfig, Config, ImportConfig};
use crate::db;
use crate::extract::extract_file;
use crate::sqlite_store::SqliteStore;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub chunks: u64,
}

enum FileOutcome {
    Imported { chunks: usize },
    Duplicate,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Expand `paths` into the list of files to import, sorted within each
/// directory for deterministic ordering. Missing paths are returned in the
/// second list.
pub fn collect_files(
    paths: &[PathBuf],
    import: &ImportConfig,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let include_set = build_globset(&import.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(import.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    let mut missing = Vec::new();

    for root in paths {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        if !root.is_dir() {
            missing.push(root.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy();

            if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
                continue;
            }
            found.push(path.to_path_buf());
        }
        found.sort();
        files.extend(found);
    }

    Ok((files, missing))
}

async fn import_file(
    store: &dyn Store,
    path: &Path,
    chunking: &ChunkingConfig,
) -> Result<FileOutcome> {
    let content = extract_file(path)?;
    if content.trim().is_empty() {
        anyhow::bail!("no extractable text");
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let doc = NewDocument::new(filename, path.display().to_string(), content);

    let doc_id = match store.add_document(&doc).await? {
        Some(id) => id,
        None => return Ok(FileOutcome::Duplicate),
    };

    let segments = segment(&doc.content, chunking.max_len, chunking.overlap)?;
    store.add_chunks(doc_id, &segments).await?;
    debug!(doc_id, chunks = segments.len(), file = %path.display(), "document stored");

    Ok(FileOutcome::Imported {
        chunks: segments.len(),
    })
}

/// Import every file under `paths` into `store`.
///
/// Per-file failures are logged and counted; they never abort the run.
pub async fn import_paths(
    store: &dyn Store,
    config: &Config,
    paths: &[PathBuf],
) -> Result<ImportSummary> {
    let (files, missing) = collect_files(paths, &config.import)?;
    let mut summary = ImportSummary::default();

    for path in &missing {
        warn!(path = %path.display(), "path does not exist");
        summary.failed += 1;
    }

    for path in &files {
        match import_file(store, path, &config.chunking).await {
            Ok(FileOutcome::Imported { chunks }) => {
                summary.imported += 1;
                summary.chunks += chunks as u64;
            }
            Ok(FileOutcome::Duplicate) => {
                info!(file = %path.display(), "identical document already imported, skipping");
                summary.duplicates += 1;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "import failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

pub async fn run_import(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let summary = import_paths(&store, config, paths).await?;

    println!("import");
    println!("  imported: {}", summary.imported);
    println!("  duplicates: {}", summary.duplicates);
    println!("  failed: {}", summary.failed);
    println!("  chunks: {}", summary.chunks);
    if summary.imported > 0 {
        println!("  run `kb index --pending` to embed the new chunks");
    }

    store.pool().close().await;
    Ok(())
}
