//! Reprocessing runs and crash recovery.
//!
//! # Usage
//!
//! ```bash
//! # Replace the text of `essay` and carry its annotations and connections over
//! reanchor reprocess essay ./essay-v2.md --triggered-by user-edit
//!
//! # Finish or undo a run left behind by a crashed process
//! reanchor recover essay
//!
//! # Same, for a run that started too recently to look abandoned
//! reanchor recover essay --force
//! ```
//!
//! A reprocess run can be interrupted with Ctrl-C. The pipeline stops at its
//! next stage boundary, rolls back, and the command exits non-zero.

use anyhow::{Context, Result};
use chrono::Duration;
use std::path::Path;

use reanchor_core::derive::FallbackChunker;
use reanchor_core::error::ReprocessError;
use reanchor_core::pipeline::{CancelFlag, ReprocessPipeline, ReprocessReport};
use reanchor_core::version::{AbandonedRun, ChunkVersionManager};

use crate::config::{Config, DEFAULT_TIMEOUT_SECS};
use crate::db;
use crate::derivation::ScriptDerivationEngine;
use crate::sqlite_store::SqliteStore;

/// The configured derivation engine, if a `[derivation]` table is present.
pub fn build_engine(config: &Config) -> Result<Option<ScriptDerivationEngine>> {
    config
        .derivation
        .as_ref()
        .map(ScriptDerivationEngine::new)
        .transpose()
}

/// Age at which `recover` treats a run holding the flag as abandoned: the
/// derivation timeout plus a minute for the stages around it.
pub fn stale_after(config: &Config) -> Duration {
    let timeout = config
        .derivation
        .as_ref()
        .map_or(DEFAULT_TIMEOUT_SECS, |d| d.timeout_secs);
    Duration::seconds(timeout as i64 + 60)
}

/// Run the pipeline for `document_id` against the text in `path`.
///
/// The outer error is for setup (reading the file, opening the database);
/// the inner one is the run's own outcome.
pub async fn reprocess_document(
    config: &Config,
    document_id: &str,
    path: &Path,
    triggered_by: &str,
    cancel: CancelFlag,
) -> Result<std::result::Result<ReprocessReport, ReprocessError>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let engine = build_engine(config)?;

    let mut pipeline =
        ReprocessPipeline::new(&store, FallbackChunker::new(config.chunking.max_tokens))
            .with_thresholds(config.recovery.clone())
            .with_retention(config.retention)
            .with_cancel(cancel);
    if let Some(engine) = &engine {
        pipeline = pipeline.with_engine(engine);
    }

    let outcome = pipeline.reprocess(document_id, &text, triggered_by).await;
    pool.close().await;
    Ok(outcome)
}

fn print_report(report: &ReprocessReport) {
    println!(
        "reprocessed {}: version {} -> {}",
        report.document_id, report.previous_version, report.version
    );
    println!("  chunks:      {} ({})", report.chunks, report.derivation);
    if let Some(reason) = &report.fallback_reason {
        println!("  fallback:    {}", reason);
    }
    if let Some(m) = &report.metadata {
        println!(
            "  metadata:    {}/{} recovered (embedding {}, lexical {}, position {})",
            m.recovered, m.total, m.by_embedding, m.by_lexical, m.by_position
        );
    }
    let a = &report.annotations;
    println!(
        "  annotations: {} recovered, {} needs review, {} lost (rate {:.2})",
        a.recovered,
        a.needs_review,
        a.lost,
        a.recovery_rate()
    );
    let c = &report.connections;
    println!(
        "  connections: {} remapped, {} needs review, {} lost, {} skipped",
        c.auto_remapped, c.needs_review, c.lost, c.skipped
    );
    if let Some(s) = &report.sweep {
        println!(
            "  retention:   removed versions {:?} ({} chunks)",
            s.removed_versions, s.removed_chunks
        );
    }
    println!("ok");
}

/// CLI entry point for `reanchor reprocess`.
pub async fn run_reprocess(
    config: &Config,
    document_id: &str,
    path: &Path,
    triggered_by: &str,
    json: bool,
) -> Result<()> {
    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping at the next stage");
            on_interrupt.cancel();
        }
    });

    let outcome = reprocess_document(config, document_id, path, triggered_by, cancel).await;
    watcher.abort();

    match outcome? {
        Ok(report) if json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// CLI entry point for `reanchor recover <doc-id>`.
pub async fn run_recover(config: &Config, document_id: &str, force: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let stale = if force {
        Duration::zero()
    } else {
        stale_after(config)
    };
    let outcome = ChunkVersionManager::new(&store)
        .recover_abandoned(document_id, stale)
        .await;
    pool.close().await;

    match outcome {
        Ok(AbandonedRun::Clean) => println!("{}: nothing to recover", document_id),
        Ok(AbandonedRun::RolledBack { version }) => {
            println!("{}: abandoned version {} rolled back", document_id, version)
        }
        Ok(AbandonedRun::RolledForward { version }) => {
            println!("{}: interrupted commit finished at version {}", document_id, version)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}
