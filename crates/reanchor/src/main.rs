//! # Reanchor CLI (`reanchor`)
//!
//! ## Usage
//!
//! ```bash
//! reanchor --config ./config/reanchor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reanchor init` | Create the SQLite database and run schema migrations |
//! | `reanchor import <doc-id> <file>` | Create a document at version 1 |
//! | `reanchor annotate <doc-id> --start N --end M` | Annotate a span of the current text |
//! | `reanchor connect <source> <target>` | Connect two chunks |
//! | `reanchor snapshot <doc-id>` | Freeze the current version against retention |
//! | `reanchor reprocess <doc-id> <file>` | Replace the text and recover everything built on it |
//! | `reanchor annotations <doc-id>` | List annotations with their recovery state |
//! | `reanchor sweep [<doc-id>]` | Remove superseded versions |
//! | `reanchor recover <doc-id> [--force]` | Clean up after a crashed run |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use reanchor::{annotate, config, connect, documents, logging, migrate, reprocess, sweep};

/// Reanchor: reprocess edited documents without losing annotations and
/// connections.
#[derive(Parser)]
#[command(name = "reanchor", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reanchor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Import a document as version 1.
    Import {
        document_id: String,
        /// File holding the document text.
        file: PathBuf,
    },

    /// Annotate a span of a document's current text.
    Annotate {
        document_id: String,
        /// Start character offset.
        #[arg(long)]
        start: usize,
        /// End character offset (exclusive).
        #[arg(long)]
        end: usize,
    },

    /// Create a user-validated connection between two chunks.
    Connect {
        source: String,
        target: String,
        #[arg(long = "type", default_value = "user")]
        connection_type: String,
        #[arg(long, default_value_t = 1.0)]
        strength: f64,
    },

    /// Freeze the current version's chunk set so retention keeps it.
    Snapshot { document_id: String },

    /// Replace a document's text and recover its chunks, annotations, and
    /// connections.
    Reprocess {
        document_id: String,
        /// File holding the new text.
        file: PathBuf,
        /// Label recorded on the new text version.
        #[arg(long, default_value = "user-edit")]
        triggered_by: String,
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List a document's annotations with their recovery state.
    Annotations { document_id: String },

    /// Remove versions outside the retention policy.
    Sweep { document_id: Option<String> },

    /// Roll back or finish a run abandoned by a crashed process.
    Recover {
        document_id: String,
        /// Recover even if the run started too recently to look abandoned.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { document_id, file } => {
            documents::run_import(&cfg, &document_id, &file).await?;
        }
        Commands::Annotate {
            document_id,
            start,
            end,
        } => {
            annotate::run_annotate(&cfg, &document_id, start, end).await?;
        }
        Commands::Connect {
            source,
            target,
            connection_type,
            strength,
        } => {
            connect::run_connect(&cfg, &source, &target, &connection_type, strength).await?;
        }
        Commands::Snapshot { document_id } => {
            documents::run_snapshot(&cfg, &document_id).await?;
        }
        Commands::Reprocess {
            document_id,
            file,
            triggered_by,
            json,
        } => {
            reprocess::run_reprocess(&cfg, &document_id, &file, &triggered_by, json).await?;
        }
        Commands::Annotations { document_id } => {
            annotate::run_list(&cfg, &document_id).await?;
        }
        Commands::Sweep { document_id } => {
            sweep::run_sweep(&cfg, document_id.as_deref()).await?;
        }
        Commands::Recover { document_id, force } => {
            reprocess::run_recover(&cfg, &document_id, force).await?;
        }
    }

    Ok(())
}
