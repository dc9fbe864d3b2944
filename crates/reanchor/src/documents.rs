//! Document import and snapshots.
//!
//! # Usage
//!
//! ```bash
//! reanchor import essay ./essay.md
//! reanchor snapshot essay
//! ```

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::Path;

use reanchor_core::derive::{validate_derived, DerivationEngine, FallbackChunker};
use reanchor_core::models::{Chunk, Document, ReprocessingStatus, Snapshot, TextVersion};
use reanchor_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::reprocess::build_engine;
use crate::sqlite_store::SqliteStore;

/// Chunk a fresh text with the configured engine, or the fallback chunker
/// if there is none or it fails. Returns rows for version 1, all current.
async fn initial_chunks(config: &Config, document_id: &str, text: &str) -> Result<Vec<Chunk>> {
    let fallback = FallbackChunker::new(config.chunking.max_tokens);
    let derived = match build_engine(config)? {
        Some(engine) => match engine.derive(text).await {
            Ok(chunks) => match validate_derived(text, chunks) {
                Ok(chunks) => chunks,
                Err(reason) => {
                    tracing::warn!(%reason, "invalid derivation output; using fallback chunker");
                    fallback.chunk(text)
                }
            },
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::warn!(%error, "derivation failed; using fallback chunker");
                fallback.chunk(text)
            }
        },
        None => fallback.chunk(text),
    };

    Ok(derived
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let mut chunk = Chunk::from_derived(document_id, 1, i, d);
            chunk.is_current = true;
            chunk
        })
        .collect())
}

/// Create `document_id` at version 1 from the contents of `path`.
pub async fn import_document(config: &Config, document_id: &str, path: &Path) -> Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    if store.get_document(document_id).await?.is_some() {
        pool.close().await;
        bail!("document {} already exists; use `reprocess` to change its text", document_id);
    }

    let chunks = initial_chunks(config, document_id, &text).await?;
    let now = Utc::now();
    let doc = Document {
        id: document_id.to_string(),
        current_version: 1,
        status: ReprocessingStatus::Idle,
        created_at: now.timestamp(),
        updated_at: now.timestamp(),
    };
    let first = TextVersion {
        document_id: document_id.to_string(),
        version: 1,
        body: text,
        triggered_by: "import".to_string(),
        created_at: now,
    };
    let imported = store.import_document(&doc, &first, &chunks).await;
    pool.close().await;
    imported?;

    tracing::info!(document = %document_id, chunks = chunks.len(), "document imported");
    Ok(chunks.len())
}

/// CLI entry point for `reanchor import <doc-id> <file>`.
pub async fn run_import(config: &Config, document_id: &str, path: &Path) -> Result<()> {
    let chunks = import_document(config, document_id, path).await?;
    println!("imported {}: version 1, {} chunks", document_id, chunks);
    println!("ok");
    Ok(())
}

/// CLI entry point for `reanchor snapshot <doc-id>`.
pub async fn run_snapshot(config: &Config, document_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let Some(doc) = store.get_document(document_id).await? else {
        bail!("document not found: {}", document_id);
    };
    if doc.status == ReprocessingStatus::Reprocessing {
        bail!("document {} is being reprocessed; try again later", document_id);
    }
    let chunks = store.current_chunks(document_id).await?;
    let snapshot = Snapshot {
        id: uuid::Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        version: doc.current_version,
        chunk_ids: chunks.into_iter().map(|c| c.id).collect(),
        created_at: Utc::now().timestamp(),
    };
    store.insert_snapshot(&snapshot).await?;
    pool.close().await;

    println!(
        "snapshot {}: {} version {} ({} chunks)",
        snapshot.id,
        document_id,
        snapshot.version,
        snapshot.chunk_ids.len()
    );
    Ok(())
}
