//! # docpool CLI
//!
//! ## Usage
//!
//! ```bash
//! docpool --config ./config/docpool.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docpool init` | Create the SQLite database and schema |
//! | `docpool ingest` | Scan, deduplicate, copy into the workspace, vectorize |
//! | `docpool vectorize` | Vectorize documents that have no vector yet |
//! | `docpool similar <id>` | Documents most similar to one document |
//! | `docpool cluster <dir>` | K-partition + grouping of a directory |
//! | `docpool group <dir>` | Greedy similarity grouping of a directory |
//! | `docpool cleanup <dir>` | Remove empty directories |
//! | `docpool search <mode> <kw>` | Filename/content search, copies hits to an export dir |
//! | `docpool tasks` | Recent task runs |
//! | `docpool tree [dir]` | Directory tree of the stored documents |
//!
//! Logs and progress go to stderr; results go to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use docpool::config;
use docpool::ingest;
use docpool::migrate;
use docpool::orchestrator;
use docpool::progress::{CancellationToken, ProgressMode, RunContext};
use docpool::reorganize;
use docpool::search::{self, SearchMode};
use docpool::tasks;
use docpool::tree_cmd;

/// docpool: deduplicate, index and reorganize a document pool.
#[derive(Parser)]
#[command(
    name = "docpool",
    about = "Deduplicate, index and reorganize a pool of documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docpool.toml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Progress output on stderr: human, json or off.
    ///
    /// Defaults to human when stderr is a terminal, off otherwise.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a source directory into the workspace.
    ///
    /// Files are deduplicated by content, unique ones are copied into the
    /// workspace (keeping their relative paths), persisted and vectorized.
    Ingest {
        /// Source directory; defaults to `workspace.source` in the config.
        #[arg(long)]
        source: Option<PathBuf>,

        /// Wipe the database and the workspace directory first.
        #[arg(long)]
        reset: bool,
    },

    /// Vectorize documents that have no vector yet.
    Vectorize {
        /// Stopwords added to `features.stopwords` (comma separated).
        /// Forces a full refit.
        #[arg(long, value_delimiter = ',')]
        stopwords: Option<Vec<String>>,
    },

    /// List the documents most similar to a document.
    Similar {
        /// Document id.
        id: i64,

        /// Number of results; defaults to `search.top_n`.
        #[arg(long)]
        top: Option<usize>,
    },

    /// Split a directory into K topic folders, then group near-duplicates
    /// inside each folder.
    Cluster {
        dir: PathBuf,

        /// Number of clusters; defaults to `clustering.k`.
        #[arg(long)]
        k: Option<usize>,

        /// Similarity threshold for the grouping pass.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Group similar documents of a directory into sub-folders.
    Group {
        dir: PathBuf,

        /// Similarity threshold; defaults to `clustering.similarity_threshold`.
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Remove empty directories below a directory.
    Cleanup { dir: PathBuf },

    /// Search by file name or content and copy the hits to an export folder.
    Search {
        /// `filename` or `content`.
        mode: SearchMode,

        keyword: String,

        /// Export root; defaults to `search.export_dir`.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Show recent task runs.
    Tasks {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Print the directory tree of the stored documents.
    Tree {
        /// Root of the tree; defaults to the workspace root.
        dir: Option<PathBuf>,

        /// Maximum path depth below the root.
        #[arg(long)]
        depth: Option<usize>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

/// First Ctrl-C cancels at the next checkpoint; a second one exits.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("docpool: cancelling after the current item (Ctrl-C again to abort)");
        handle.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let ctx = RunContext::new(progress.reporter(), cancel_on_ctrl_c());

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { source, reset } => {
            ingest::run_ingest(&cfg, source, reset, &ctx).await?;
        }
        Commands::Vectorize { stopwords } => {
            orchestrator::run_vectorize(&cfg, stopwords, &ctx).await?;
        }
        Commands::Similar { id, top } => {
            orchestrator::run_similar(&cfg, id, top).await?;
        }
        Commands::Cluster { dir, k, threshold } => {
            reorganize::run_cluster(&cfg, dir, k, threshold, &ctx).await?;
        }
        Commands::Group { dir, threshold } => {
            reorganize::run_group(&cfg, dir, threshold, &ctx).await?;
        }
        Commands::Cleanup { dir } => {
            reorganize::run_cleanup(&cfg, dir, &ctx).await?;
        }
        Commands::Search {
            mode,
            keyword,
            export,
        } => {
            search::run_search(&cfg, mode, &keyword, export, &ctx).await?;
        }
        Commands::Tasks { limit } => {
            tasks::run_tasks(&cfg, limit).await?;
        }
        Commands::Tree { dir, depth } => {
            tree_cmd::run_tree(&cfg, dir, depth).await?;
        }
    }

    Ok(())
}
