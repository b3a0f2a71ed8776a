//! # kbase CLI (`kb`)
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Write a default config if missing, create the database |
//! | `kb import <paths>...` | Import txt, md, and docx files |
//! | `kb index [--pending]` | Embed chunks and store vectors |
//! | `kb ask "<question>"` | Answer from the knowledge base with citations |
//! | `kb docs list\|show\|delete` | Inspect or remove imported documents |
//! | `kb stats` | Counts, database size, and index metadata |
//! | `kb eval <file.jsonl>` | Measure hit rate, citation rate, and latency |
//!
//! Exit status is 2 for configuration errors (missing API key, invalid
//! settings) and 1 for every other failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kbase::progress::ProgressMode;
use kbase::{ask, config, docs, eval, import, index_cmd, migrate, stats};
use kbase_core::KbError;

/// kbase: question answering over your own documents, with verified citations.
#[derive(Parser)]
#[command(name = "kb", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema.
    ///
    /// Writes a default configuration file first when none exists.
    /// Safe to run repeatedly.
    Init,

    /// Import files or directories.
    ///
    /// Directories are walked recursively and filtered by the `[import]`
    /// globs. Files whose content was already imported are skipped.
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Embed chunks and store their vectors.
    ///
    /// Without flags every chunk is re-embedded and the stored index is
    /// replaced.
    Index {
        /// Only embed chunks that have no vector yet.
        #[arg(long)]
        pending: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal,
        /// `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Answer a question from the knowledge base.
    Ask {
        question: String,

        /// Number of evidence chunks (overrides `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the full outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or delete imported documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Show knowledge-base statistics.
    Stats,

    /// Run an evaluation set.
    Eval {
        /// JSON Lines file with `query` and `expected_docs` per line.
        file: PathBuf,

        /// Write the full JSON report here.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write per-query results as CSV here.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    /// List documents, newest first.
    List,
    /// Print a document's metadata and chunks.
    Show { id: i64 },
    /// Delete a document with its chunks and vectors.
    Delete { id: i64 },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kbase=info,kbase_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Init = cli.command {
        if config::write_default_config(&cli.config)? {
            println!("Wrote default configuration to {}", cli.config.display());
        }
    }

    let settings = config::load_config(&cli.config)?;
    let cfg = &settings.config;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Import { paths } => {
            import::run_import(cfg, &paths).await?;
        }
        Commands::Index { pending, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            index_cmd::run_index(&settings, pending, mode).await?;
        }
        Commands::Ask {
            question,
            top_k,
            json,
        } => {
            ask::run_ask(&settings, &question, top_k, json).await?;
        }
        Commands::Docs { action } => match action {
            DocsAction::List => docs::run_list(cfg).await?,
            DocsAction::Show { id } => docs::run_show(cfg, id).await?,
            DocsAction::Delete { id } => docs::run_delete(cfg, id).await?,
        },
        Commands::Stats => {
            stats::run_stats(cfg).await?;
        }
        Commands::Eval { file, report, csv } => {
            eval::run_eval(&settings, &file, report.as_deref(), csv.as_deref()).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<KbError>() {
                Some(kb) if kb.is_configuration() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
