//! ragline CLI entry point.
//!
//! Parses arguments, sets up logging on stderr, loads and validates the
//! configuration, and dispatches to the command modules in the library.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use ragline::config;
use ragline::ingest_cmd::{self, IngestOptions};
use ragline::progress::ProgressMode;
use ragline::{chat, search, stats};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ragline: ask questions about your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragline.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragline",
    about = "ragline — retrieval-augmented question answering over your documents",
    version,
    long_about = "ragline chunks and embeds PDF and text documents into a vector index, \
    then answers questions with a language model grounded on the most relevant chunks."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ragline.toml`. Chunking, embedding, retrieval,
    /// LLM, and index settings are read from this file.
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    /// Log debug output to stderr. `RUST_LOG` takes precedence.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Ingestion progress on stderr. `auto` shows human progress when
    /// stderr is a terminal.
    #[arg(long, global = true, value_enum, default_value = "auto")]
    progress: ProgressArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Human,
    Json,
    Off,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into the index.
    ///
    /// Each file is extracted, chunked, embedded, and written to the index
    /// under its file name. Re-ingesting a file replaces its previous
    /// entries. Directories are expanded one level deep to their `.pdf`,
    /// `.txt`, and `.md` files.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Stop starting new documents after the first failure.
        #[arg(long)]
        fail_fast: bool,

        /// Documents processed at once (overrides `[ingest] concurrency`).
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show the chunks closest to a query, without generating an answer.
    Search {
        /// The search query string.
        query: String,

        /// Number of results (overrides `[retrieval] top_k`).
        #[arg(long, short)]
        k: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a single question from the indexed documents.
    Ask {
        /// The question.
        question: String,
    },

    /// Interactive question-answering session on stdin.
    ///
    /// Earlier questions and answers are kept as conversation history.
    /// Ctrl-C cancels the current answer; `/clear` resets the history;
    /// `/exit` quits.
    Chat,

    /// Remove every index entry of a document.
    Delete {
        /// Document id (the file name used at ingestion).
        document_id: String,
    },

    /// Show index statistics.
    Stats {
        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "ragline=debug,ragline_core=debug"
    } else {
        "ragline=info,ragline_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            paths,
            fail_fast,
            concurrency,
        } => {
            let options = IngestOptions {
                fail_fast,
                concurrency,
            };
            let failed = ingest_cmd::run_ingest(cfg, &paths, options, cli.progress.mode()).await?;
            if failed > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Search { query, k, json } => {
            search::run_search(cfg, &query, k, json).await?;
        }
        Commands::Ask { question } => {
            chat::run_ask(cfg, &question).await?;
        }
        Commands::Chat => {
            chat::run_chat(cfg).await?;
        }
        Commands::Delete { document_id } => {
            ingest_cmd::run_delete(cfg, &document_id).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(cfg, json).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
