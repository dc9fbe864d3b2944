//! User-validated connections between chunks.

use anyhow::{bail, Result};
use chrono::Utc;

use reanchor_core::models::Connection;
use reanchor_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Connect two existing chunks. The connection is marked user-validated,
/// so it is carried through later reprocessing runs.
pub async fn create_connection(
    config: &Config,
    source: &str,
    target: &str,
    connection_type: &str,
    strength: f64,
) -> Result<Connection> {
    if !(0.0..=1.0).contains(&strength) {
        bail!("strength must be in [0.0, 1.0]");
    }
    if source == target {
        bail!("a chunk cannot be connected to itself");
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    for id in [source, target] {
        if store.get_chunk(id).await?.is_none() {
            pool.close().await;
            bail!("chunk not found: {}", id);
        }
    }

    let connection = Connection {
        id: uuid::Uuid::new_v4().to_string(),
        source_chunk_id: source.to_string(),
        target_chunk_id: target.to_string(),
        connection_type: connection_type.to_string(),
        strength,
        user_validated: true,
        metadata: serde_json::json!({}),
        created_at: Utc::now().timestamp(),
    };
    store.insert_connection(&connection).await?;
    pool.close().await;
    Ok(connection)
}

/// CLI entry point for `reanchor connect`.
pub async fn run_connect(
    config: &Config,
    source: &str,
    target: &str,
    connection_type: &str,
    strength: f64,
) -> Result<()> {
    let c = create_connection(config, source, target, connection_type, strength).await?;
    println!("connection {}: {} -> {} ({})", c.id, source, target, connection_type);
    Ok(())
}
