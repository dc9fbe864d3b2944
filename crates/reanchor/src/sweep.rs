//! Retention sweeps from the command line.
//!
//! `reanchor sweep` runs over every document; `reanchor sweep <doc-id>`
//! over one. Documents with a run in flight are reported as skipped.

use anyhow::Result;

use reanchor_core::retention::{sweep, SweepReport};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Sweep one document, or all of them.
pub async fn sweep_documents(
    config: &Config,
    document_id: Option<&str>,
) -> Result<Vec<SweepReport>> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let ids = match document_id {
        Some(id) => vec![id.to_string()],
        None => store.document_ids().await?,
    };
    let mut reports = Vec::with_capacity(ids.len());
    for id in &ids {
        reports.push(sweep(&store, id, &config.retention).await?);
    }
    pool.close().await;
    Ok(reports)
}

/// CLI entry point for `reanchor sweep [<doc-id>]`.
pub async fn run_sweep(config: &Config, document_id: Option<&str>) -> Result<()> {
    let reports = sweep_documents(config, document_id).await?;
    for r in &reports {
        if r.skipped {
            println!("{}: skipped (reprocessing)", r.document_id);
            continue;
        }
        println!(
            "{}: kept {:?}, removed versions {:?} ({} chunks, {} connections)",
            r.document_id, r.protected, r.removed_versions, r.removed_chunks, r.removed_connections
        );
    }
    println!("swept {} documents", reports.len());
    println!("ok");
    Ok(())
}
