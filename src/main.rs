//! # Pagewise CLI (`pagewise`)
//!
//! Open PDF and EPUB files, keep track of the reading position and ask
//! questions that are answered only from the pages already read.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pagewise init` | Create the SQLite database and run schema migrations |
//! | `pagewise open <file>` | Parse a file and print its title, page count and outline |
//! | `pagewise context <file>` | Print the context window for a page |
//! | `pagewise progress <file>` | Show or set the saved page |
//! | `pagewise ask <file> "<question>"` | Ask one question and stream the answer |
//! | `pagewise chat <file>` | Interactive conversation while paging through |
//!
//! ## Examples
//!
//! ```bash
//! pagewise init --config ./config/pagewise.toml
//! pagewise progress moby-dick.epub --set 12
//! pagewise ask moby-dick.epub "Who is Queequeg?"
//! PAGEWISE_LOG=debug pagewise open report.pdf
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pagewise::{config, migrate};

/// Pagewise: a document reader whose assistant only knows what you have read.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults. See `config/pagewise.example.toml`.
#[derive(Parser)]
#[command(name = "pagewise", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pagewise.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Parse a document and print its outline.
    Open {
        /// PDF or EPUB file.
        file: PathBuf,
    },

    /// Print the text an answer on the given page may draw from.
    Context {
        file: PathBuf,

        /// 1-based page number. Defaults to the saved page.
        #[arg(long)]
        page: Option<usize>,
    },

    /// Show the saved page, or save a new one with `--set`.
    Progress {
        file: PathBuf,

        /// 1-based page number to save.
        #[arg(long)]
        set: Option<usize>,
    },

    /// Ask a single question about the pages read so far.
    Ask {
        file: PathBuf,

        /// 1-based page number. Defaults to the saved page.
        #[arg(long)]
        page: Option<usize>,

        question: String,
    },

    /// Interactive conversation. Page moves are saved as progress.
    Chat { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for piping.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PAGEWISE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Open { file } => {
            commands::run_open(&cfg, &file).await?;
        }
        Commands::Context { file, page } => {
            commands::run_context(&cfg, &file, page).await?;
        }
        Commands::Progress { file, set } => {
            commands::run_progress(&cfg, &file, set).await?;
        }
        Commands::Ask {
            file,
            page,
            question,
        } => {
            commands::run_ask(&cfg, &file, page, &question).await?;
        }
        Commands::Chat { file } => {
            commands::run_chat(&cfg, &file).await?;
        }
    }

    Ok(())
}
