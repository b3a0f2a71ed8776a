//! # kbase core
//!
//! Pure answer-quality logic for kbase: segmentation, hybrid score fusion,
//! the confidence gate, and citation verification, plus the traits the
//! application implements for storage, embeddings, and chat.
//!
//! This crate performs no I/O of its own. Frontends supply a [`Store`],
//! an [`Embedder`], and a [`ChatBackend`].
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`segment`] | Paragraph-first chunking with sentence fallback and overlap |
//! | [`fusion`] | Merge semantic and lexical hits into one ranking |
//! | [`gate`] | Decide whether evidence is strong enough to answer |
//! | [`citation`] | Parse, extract, and verify answer references |
//! | [`fallback`] | Deterministic reply when the gate rejects a query |
//! | [`answer`] | Query-time orchestration |
//!
//! [`Store`]: store::Store
//! [`Embedder`]: embedding::Embedder
//! [`ChatBackend`]: generation::ChatBackend

pub mod answer;
pub mod citation;
pub mod embedding;
pub mod error;
pub mod fallback;
pub mod fusion;
pub mod gate;
pub mod generation;
pub mod index;
pub mod models;
pub mod prompt;
pub mod segment;
pub mod store;

pub use error::{Backend, KbError};
