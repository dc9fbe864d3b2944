//! Database schema migrations.
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so running `reanchor init`
//! repeatedly is safe.
//!
//! Connections carry no foreign keys: a connection may point into a
//! document this database never reprocesses, and the retention sweep
//! removes chunk rows before the connections that touch them.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        current_version INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'idle',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS text_versions (
        document_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        body TEXT NOT NULL,
        triggered_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (document_id, version),
        FOREIGN KEY (document_id) REFERENCES documents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        is_current INTEGER NOT NULL DEFAULT 0,
        batch_id TEXT,
        metadata_json TEXT,
        metadata_source TEXT NOT NULL,
        embedding BLOB,
        recovered_from TEXT,
        recovery_method TEXT,
        recovery_confidence REAL,
        hash TEXT NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS annotations (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        quote TEXT NOT NULL,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        context_before TEXT,
        context_after TEXT,
        chunk_index INTEGER,
        chunk_ids_json TEXT NOT NULL DEFAULT '[]',
        recovery_json TEXT,
        FOREIGN KEY (document_id) REFERENCES documents(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS connections (
        id TEXT PRIMARY KEY,
        source_chunk_id TEXT NOT NULL,
        target_chunk_id TEXT NOT NULL,
        connection_type TEXT NOT NULL,
        strength REAL NOT NULL,
        user_validated INTEGER NOT NULL DEFAULT 0,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        chunk_ids_json TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (document_id) REFERENCES documents(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_doc_version ON chunks(document_id, version)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_current ON chunks(document_id, is_current)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_batch ON chunks(batch_id)",
    "CREATE INDEX IF NOT EXISTS idx_annotations_doc ON annotations(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_connections_source ON connections(source_chunk_id)",
    "CREATE INDEX IF NOT EXISTS idx_connections_target ON connections(target_chunk_id)",
    "CREATE INDEX IF NOT EXISTS idx_snapshots_doc ON snapshots(document_id)",
];

/// Apply the schema to an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Create the configured database (if needed) and apply the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}
