//! # kbase
//!
//! A local knowledge base that answers questions only from imported
//! documents, refuses when the evidence is weak, and checks every citation
//! the language model produces.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Import       │──▶│ Segment      │──▶│  SQLite   │
//! │ txt/md/docx  │   │ + Embed      │   │ + vectors │
//! └──────────────┘   └──────────────┘   └─────┬─────┘
//!                                             │
//!                     ┌───────────────────────┘
//!                     ▼
//!   ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌────────────────┐
//!   │ Retrieve │─▶│ Fuse     │─▶│ Gate     │─▶│ Generate +     │
//!   │ sem+lex  │  │ 0.6/0.4  │  │          │  │ verify / fall  │
//!   └──────────┘  └──────────┘  └──────────┘  │ back           │
//!                                             └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kb init                       # write config/kb.toml, create database
//! kb import ./docs              # extract, dedupe, segment
//! kb index                      # embed every chunk
//! kb ask "What is vector retrieval?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credential resolution |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`extract`] | Text extraction for txt, md, and docx |
//! | [`import`] | `kb import` |
//! | [`embedding`] | OpenAI-compatible embedding client |
//! | [`generation`] | OpenAI-compatible streaming chat client |
//! | [`index_cmd`] | `kb index` full and incremental builds |
//! | [`progress`] | Index build progress on stderr |
//! | [`ask`] | `kb ask` |
//! | [`docs`] | `kb docs list/show/delete` |
//! | [`stats`] | `kb stats` |
//! | [`eval`] | `kb eval` |

pub mod ask;
pub mod config;
pub mod db;
pub mod docs;
pub mod embedding;
pub mod eval;
pub mod extract;
pub mod generation;
pub mod import;
pub mod index_cmd;
pub mod migrate;
pub mod progress;
pub mod sqlite_store;
pub mod stats;
