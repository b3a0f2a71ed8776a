//! Query-time pipeline: retrieve, gate, then fall back or generate.
//!
//! ```text
//! query ─┬─ embed ─ index.search ─┐
//!        └─ store.keyword_search ─┴─ fuse ─ assess ─┬─ fallback
//!                                                   └─ chat ─ citations ─ verify
//! ```
//!
//! The generation backend is only touched after the gate accepts the
//! evidence, so callers may construct it lazily (see [`Retrieved`]).

use std::collections::HashMap;

use serde::Serialize;

use crate::citation::{extract_citations, verify_citations, warning_banner, CitationCheck};
use crate::embedding::Embedder;
use crate::error::KbError;
use crate::fallback::{fallback, FallbackReply};
use crate::fusion::fuse;
use crate::gate::{assess, Assessment};
use crate::generation::{collect_text, ChatBackend};
use crate::index::VectorIndex;
use crate::models::{ChunkId, ChunkRef, Citation, EvidenceSet};
use crate::prompt::build_messages;
use crate::store::Store;

/// Evidence for one query plus the gate's verdict on it.
#[derive(Debug, Clone, Serialize)]
pub struct Retrieved {
    pub query: String,
    pub evidence: EvidenceSet,
    pub assessment: Assessment,
}

impl Retrieved {
    pub fn is_confident(&self) -> bool {
        self.assessment.confident
    }

    pub fn fallback(&self) -> FallbackReply {
        fallback(&self.query, &self.evidence, &self.assessment.reason)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedAnswer {
    /// Answer as shown to the user, prefixed with a warning banner when
    /// citation verification failed.
    pub answer: String,
    /// Unmodified backend output.
    pub raw: String,
    pub citations: Vec<Citation>,
    pub check: CitationCheck,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Fallback(FallbackReply),
    Generated(GeneratedAnswer),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Fallback(f) => &f.message,
            Reply::Generated(g) => &g.answer,
        }
    }

    pub fn citations(&self) -> &[Citation] {
        match self {
            Reply::Fallback(f) => &f.citations,
            Reply::Generated(g) => &g.citations,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub retrieved: Retrieved,
    pub reply: Reply,
}

/// Build the ranked evidence set for `query`.
///
/// Semantic retrieval is skipped when the index is empty or no embedder is
/// given; the lexical channel alone then drives the ranking.
pub async fn retrieve<S, I>(
    store: &S,
    index: &I,
    embedder: Option<&dyn Embedder>,
    query: &str,
    k: usize,
) -> Result<EvidenceSet, KbError>
where
    S: Store + ?Sized,
    I: VectorIndex + Sync,
{
    let semantic = match embedder {
        Some(e) if index.stats().total_vectors > 0 => {
            let qv = e.embed_one(query).await?;
            index.search(&qv, k)?
        }
        _ => Vec::new(),
    };

    let lexical = store.keyword_search(query, k).await?;

    let ids: Vec<ChunkId> = semantic.iter().map(|h| h.chunk_id).collect();
    let lookup: HashMap<ChunkId, ChunkRef> = store
        .resolve_chunks(&ids)
        .await?
        .into_iter()
        .map(|c| (c.chunk_id, c))
        .collect();

    Ok(fuse(&semantic, &lexical, &lookup, k))
}

/// [`retrieve`] followed by the confidence gate.
pub async fn retrieve_and_assess<S, I>(
    store: &S,
    index: &I,
    embedder: Option<&dyn Embedder>,
    query: &str,
    k: usize,
) -> Result<Retrieved, KbError>
where
    S: Store + ?Sized,
    I: VectorIndex + Sync,
{
    let evidence = retrieve(store, index, embedder, query, k).await?;
    let assessment = assess(&evidence);
    Ok(Retrieved {
        query: query.to_string(),
        evidence,
        assessment,
    })
}

/// Ask the chat backend for a grounded answer and check its citations.
pub async fn generate(
    chat: &dyn ChatBackend,
    query: &str,
    evidence: &EvidenceSet,
) -> Result<GeneratedAnswer, KbError> {
    let messages = build_messages(query, evidence);
    let raw = collect_text(chat.chat(&messages).await?).await?;

    let citations = extract_citations(&raw, evidence);
    let check = verify_citations(&raw, evidence);
    let answer = match &check.issue {
        Some(issue) => format!("{}{}", warning_banner(issue), raw),
        None => raw.clone(),
    };

    Ok(GeneratedAnswer {
        answer,
        raw,
        citations,
        check,
    })
}

/// Full pipeline with an already constructed chat backend.
pub async fn answer<S, I>(
    store: &S,
    index: &I,
    embedder: Option<&dyn Embedder>,
    chat: &dyn ChatBackend,
    query: &str,
    k: usize,
) -> Result<Outcome, KbError>
where
    S: Store + ?Sized,
    I: VectorIndex + Sync,
{
    let retrieved = retrieve_and_assess(store, index, embedder, query, k).await?;
    let reply = if retrieved.is_confident() {
        Reply::Generated(generate(chat, query, &retrieved.evidence).await?)
    } else {
        Reply::Fallback(retrieved.fallback())
    };
    Ok(Outcome { retrieved, reply })
}
