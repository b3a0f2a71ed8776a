//! Question answering (`kb ask`).
//!
//! Stored vectors are loaded into a [`FlatL2Index`] once per session. When
//! no vectors exist, retrieval runs on keyword evidence alone and no
//! embedding credential is needed. The chat backend is only constructed
//! after the confidence gate accepts the evidence, so rejected questions
//! are answered without any network access.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use kbase_core::answer::{generate, retrieve_and_assess, Outcome, Reply};
use kbase_core::citation::excerpt;
use kbase_core::embedding::Embedder;
use kbase_core::index::{FlatL2Index, VectorIndex};
use kbase_core::models::ChunkId;
use kbase_core::store::Store;
use kbase_core::KbError;

use crate::config::Settings;
use crate::db;
use crate::embedding::OpenAiEmbedder;
use crate::generation::OpenAiChat;
use crate::sqlite_store::SqliteStore;

/// Retrieval state shared across the questions of one run.
pub struct AskSession<'a> {
    settings: &'a Settings,
    store: SqliteStore,
    index: FlatL2Index,
    embedder: Option<OpenAiEmbedder>,
    chat: Option<OpenAiChat>,
}

impl<'a> AskSession<'a> {
    pub async fn open(settings: &'a Settings) -> Result<AskSession<'a>> {
        let pool = db::connect(&settings.config).await?;
        let store = SqliteStore::new(pool);

        let stored = store.load_vectors().await?;
        let mut index = FlatL2Index::new();
        let embedder = if stored.is_empty() {
            warn!("no vectors stored, answering from keyword matches only (run `kb index`)");
            None
        } else {
            let dimension = match store.index_meta().await? {
                Some(meta) => meta.dimension,
                None => stored[0].1.len(),
            };
            let (ids, vectors): (Vec<ChunkId>, Vec<Vec<f32>>) = stored.into_iter().unzip();
            index.build(&vectors, &ids, dimension)?;
            Some(OpenAiEmbedder::new(
                &settings.config.embedding,
                &settings.embedding_key,
            )?)
        };

        Ok(AskSession {
            settings,
            store,
            index,
            embedder,
            chat: None,
        })
    }

    fn chat(&mut self) -> Result<&OpenAiChat, KbError> {
        if self.chat.is_none() {
            self.chat = Some(OpenAiChat::new(
                &self.settings.config.generation,
                &self.settings.generation_key,
            )?);
        }
        self.chat
            .as_ref()
            .ok_or_else(|| KbError::InvalidConfig("chat backend unavailable".into()))
    }

    /// Answer one question with `k` evidence candidates.
    pub async fn ask(&mut self, question: &str, k: usize) -> Result<Outcome, KbError> {
        let embedder = self.embedder.as_ref().map(|e| e as &dyn Embedder);
        let retrieved =
            retrieve_and_assess(&self.store, &self.index, embedder, question, k).await?;

        info!(
            candidates = retrieved.evidence.len(),
            top = retrieved.evidence.top().map(|c| c.combined_score),
            confident = retrieved.is_confident(),
            "evidence assessed"
        );

        let reply = if retrieved.is_confident() {
            let generated = generate(self.chat()?, question, &retrieved.evidence).await?;
            if let Some(issue) = &generated.check.issue {
                warn!(%issue, "citation verification failed");
            }
            Reply::Generated(generated)
        } else {
            info!(reason = %retrieved.assessment.reason, "question rejected by confidence gate");
            Reply::Fallback(retrieved.fallback())
        };

        Ok(Outcome { retrieved, reply })
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}

#[derive(Serialize)]
struct AskOutput<'a> {
    query_id: String,
    #[serde(flatten)]
    outcome: &'a Outcome,
}

pub async fn run_ask(
    settings: &Settings,
    question: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let k = top_k.unwrap_or(settings.config.retrieval.top_k);
    if k == 0 {
        return Err(KbError::InvalidConfig("--top-k must be >= 1".into()).into());
    }

    let query_id = Uuid::new_v4().to_string();
    let span = info_span!("ask", query_id = %query_id);

    async move {
        let mut session = AskSession::open(settings).await?;
        let result = session.ask(question, k).await;
        session.close().await;
        let outcome = result?;

        if json {
            let out = AskOutput {
                query_id,
                outcome: &outcome,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            print_outcome(&outcome);
        }
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await
}

fn one_line(text: &str) -> String {
    excerpt(&text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn print_outcome(outcome: &Outcome) {
    let evidence = &outcome.retrieved.evidence;

    println!("Evidence ({}):", evidence.len());
    for (i, c) in evidence.iter().enumerate() {
        println!(
            "  [{}] {:.3}  (semantic {:.3}, lexical {:.3})  {}",
            i + 1,
            c.combined_score,
            c.semantic_score,
            c.lexical_score,
            c.filename
        );
        println!("      {}", one_line(&c.text));
    }
    println!();

    match &outcome.reply {
        Reply::Fallback(_) => {
            println!("Answer (not grounded: {}):", outcome.retrieved.assessment.reason)
        }
        Reply::Generated(_) => println!("Answer:"),
    }
    println!("{}", outcome.reply.text());

    let citations = outcome.reply.citations();
    if !citations.is_empty() {
        println!();
        println!("Citations:");
        for c in citations {
            let mark = if c.verified { "" } else { " (unverified)" };
            println!("  - {} (chunk {}){}", c.filename, c.chunk_id, mark);
            println!("      {}", one_line(&c.excerpt));
        }
    }
}
