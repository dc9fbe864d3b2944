//! SQLite-backed [`Store`] implementation.
//!
//! Each method is one statement, or one transaction where a method writes
//! several rows. The status compare-and-swap is a single conditional
//! `UPDATE` whose affected-row count says whether this caller won.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

use reanchor_core::embedding::{blob_to_vec, vec_to_blob};
use reanchor_core::models::{
    Annotation, AnnotationRecovery, Chunk, ChunkMetadata, ChunkProvenance, Connection, Document,
    MetadataSource, ReprocessingStatus, Snapshot, TextContext, TextVersion,
};
use reanchor_core::store::Store;

/// SQLite implementation of the [`Store`] trait over the schema created by
/// [`migrate`](crate::migrate).
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new document with its first text version and chunk set.
    /// All rows land in one transaction, so a failure leaves no partial
    /// document behind.
    pub async fn import_document(
        &self,
        doc: &Document,
        text: &TextVersion,
        chunks: &[Chunk],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_document_row(&mut *tx, doc).await?;
        insert_text_row(&mut *tx, text).await?;
        for chunk in chunks {
            insert_chunk_row(&mut *tx, chunk).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Ids of every document, for whole-database sweeps.
    pub async fn document_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM documents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        current_version: row.get("current_version"),
        status: ReprocessingStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown document status '{}'", status))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_text_version(row: &SqliteRow) -> Result<TextVersion> {
    let created_at: String = row.get("created_at");
    Ok(TextVersion {
        document_id: row.get("document_id"),
        version: row.get("version"),
        body: row.get("body"),
        triggered_by: row.get("triggered_by"),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .with_context(|| format!("bad text version timestamp '{}'", created_at))?
            .with_timezone(&Utc),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let metadata_json: Option<String> = row.get("metadata_json");
    let metadata = match metadata_json {
        Some(json) => Some(serde_json::from_str::<ChunkMetadata>(&json)?),
        None => None,
    };
    let source: String = row.get("metadata_source");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let recovered_from: Option<String> = row.get("recovered_from");
    let recovery_method: Option<String> = row.get("recovery_method");
    let recovery_confidence: Option<f64> = row.get("recovery_confidence");
    let provenance = match (recovered_from, recovery_method, recovery_confidence) {
        (Some(source_chunk_id), Some(method), Some(confidence)) => Some(ChunkProvenance {
            source_chunk_id,
            method,
            confidence,
        }),
        _ => None,
    };
    let start: i64 = row.get("start_offset");
    let end: i64 = row.get("end_offset");

    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        version: row.get("version"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        start_offset: start as usize,
        end_offset: end as usize,
        is_current: row.get("is_current"),
        batch_id: row.get("batch_id"),
        metadata,
        metadata_source: MetadataSource::parse(&source)
            .ok_or_else(|| anyhow!("unknown metadata source '{}'", source))?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
        provenance,
        hash: row.get("hash"),
    })
}

fn row_to_annotation(row: &SqliteRow) -> Result<Annotation> {
    let before: Option<String> = row.get("context_before");
    let after: Option<String> = row.get("context_after");
    let context = match (before, after) {
        (None, None) => None,
        (before, after) => Some(TextContext {
            before: before.unwrap_or_default(),
            after: after.unwrap_or_default(),
        }),
    };
    let chunk_ids_json: String = row.get("chunk_ids_json");
    let recovery_json: Option<String> = row.get("recovery_json");
    let recovery = match recovery_json {
        Some(json) => Some(serde_json::from_str::<AnnotationRecovery>(&json)?),
        None => None,
    };
    let start: i64 = row.get("start_offset");
    let end: i64 = row.get("end_offset");
    let chunk_index: Option<i64> = row.get("chunk_index");

    Ok(Annotation {
        id: row.get("id"),
        document_id: row.get("document_id"),
        quote: row.get("quote"),
        start_offset: start as usize,
        end_offset: end as usize,
        context,
        chunk_index: chunk_index.map(|i| i as usize),
        chunk_ids: serde_json::from_str(&chunk_ids_json)?,
        recovery,
    })
}

fn row_to_connection(row: &SqliteRow) -> Result<Connection> {
    let metadata_json: String = row.get("metadata_json");
    Ok(Connection {
        id: row.get("id"),
        source_chunk_id: row.get("source_chunk_id"),
        target_chunk_id: row.get("target_chunk_id"),
        connection_type: row.get("connection_type"),
        strength: row.get("strength"),
        user_validated: row.get("user_validated"),
        metadata: serde_json::from_str(&metadata_json)?,
        created_at: row.get("created_at"),
    })
}

fn row_to_snapshot(row: &SqliteRow) -> Result<Snapshot> {
    let chunk_ids_json: String = row.get("chunk_ids_json");
    Ok(Snapshot {
        id: row.get("id"),
        document_id: row.get("document_id"),
        version: row.get("version"),
        chunk_ids: serde_json::from_str(&chunk_ids_json)?,
        created_at: row.get("created_at"),
    })
}

/// Push `(?, ?, ...)` for `ids` onto a query under construction.
fn push_id_list<'a>(qb: &mut QueryBuilder<'a, Sqlite>, ids: &'a [String]) {
    qb.push("(");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(id.as_str());
    }
    list.push_unseparated(")");
}

async fn insert_document_row<'e, E>(exec: E, doc: &Document) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO documents (id, current_version, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&doc.id)
    .bind(doc.current_version)
    .bind(doc.status.as_str())
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .execute(exec)
    .await
    .with_context(|| format!("Failed to insert document {}", doc.id))?;
    Ok(())
}

async fn insert_text_row<'e, E>(exec: E, version: &TextVersion) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO text_versions (document_id, version, body, triggered_by, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&version.document_id)
    .bind(version.version)
    .bind(&version.body)
    .bind(&version.triggered_by)
    .bind(version.created_at.to_rfc3339())
    .execute(exec)
    .await
    .with_context(|| {
        format!(
            "Failed to append version {} of document {}",
            version.version, version.document_id
        )
    })?;
    Ok(())
}

async fn insert_chunk_row<'e, E>(exec: E, chunk: &Chunk) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let metadata_json = chunk
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let provenance = chunk.provenance.as_ref();
    sqlx::query(&format!(
        "INSERT INTO chunks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        CHUNK_COLUMNS
    ))
    .bind(&chunk.id)
    .bind(&chunk.document_id)
    .bind(chunk.version)
    .bind(chunk.chunk_index)
    .bind(&chunk.content)
    .bind(chunk.start_offset as i64)
    .bind(chunk.end_offset as i64)
    .bind(chunk.is_current)
    .bind(&chunk.batch_id)
    .bind(metadata_json)
    .bind(chunk.metadata_source.as_str())
    .bind(chunk.embedding.as_deref().map(vec_to_blob))
    .bind(provenance.map(|p| p.source_chunk_id.clone()))
    .bind(provenance.map(|p| p.method.clone()))
    .bind(provenance.map(|p| p.confidence))
    .bind(&chunk.hash)
    .execute(exec)
    .await
    .with_context(|| format!("Failed to insert chunk {}", chunk.id))?;
    Ok(())
}

const CHUNK_COLUMNS: &str = "id, document_id, version, chunk_index, content, start_offset, \
    end_offset, is_current, batch_id, metadata_json, metadata_source, embedding, \
    recovered_from, recovery_method, recovery_confidence, hash";

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        insert_document_row(&self.pool, doc).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn try_begin_reprocessing(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'reprocessing', updated_at = ? \
             WHERE id = ? AND status = 'idle'",
        )
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_reprocessing(&self, id: &str, current_version: Option<i64>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'idle', \
             current_version = COALESCE(?, current_version), updated_at = ? WHERE id = ?",
        )
        .bind(current_version)
        .bind(now_ts())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document {} not found", id);
        }
        Ok(())
    }

    async fn append_text_version(&self, version: &TextVersion) -> Result<()> {
        insert_text_row(&self.pool, version).await
    }

    async fn get_text_version(
        &self,
        document_id: &str,
        version: i64,
    ) -> Result<Option<TextVersion>> {
        let row = sqlx::query("SELECT * FROM text_versions WHERE document_id = ? AND version = ?")
            .bind(document_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_text_version).transpose()
    }

    async fn list_text_versions(&self, document_id: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT version FROM text_versions WHERE document_id = ? ORDER BY version ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("version")).collect())
    }

    async fn delete_text_version(&self, document_id: &str, version: i64) -> Result<()> {
        sqlx::query("DELETE FROM text_versions WHERE document_id = ? AND version = ?")
            .bind(document_id)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            insert_chunk_row(&mut *tx, chunk).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn chunks_for_version(&self, document_id: &str, version: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE document_id = ? AND version = ? ORDER BY chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn current_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE document_id = ? AND is_current = 1 \
             ORDER BY chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn set_version_current(
        &self,
        document_id: &str,
        version: i64,
        is_current: bool,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE chunks SET is_current = ? \
             WHERE document_id = ? AND version = ? AND batch_id IS NULL",
        )
        .bind(is_current)
        .bind(document_id)
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn swap_current(
        &self,
        document_id: &str,
        batch_id: &str,
        retire_version: i64,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let promoted = sqlx::query("UPDATE chunks SET is_current = 1 WHERE batch_id = ?")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if promoted == 0 {
            return Ok(0);
        }
        sqlx::query(
            "UPDATE chunks SET is_current = 0 \
             WHERE document_id = ? AND version = ? AND batch_id IS NULL",
        )
        .bind(document_id)
        .bind(retire_version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(promoted)
    }

    async fn clear_batch(&self, batch_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE chunks SET batch_id = NULL WHERE batch_id = ?")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_batch(&self, batch_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE batch_id = ?")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn pending_batches(&self, document_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT batch_id FROM chunks \
             WHERE document_id = ? AND batch_id IS NOT NULL ORDER BY batch_id",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("batch_id")).collect())
    }

    async fn delete_version_chunks(
        &self,
        document_id: &str,
        version: i64,
    ) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT id FROM chunks WHERE document_id = ? AND version = ?")
            .bind(document_id)
            .bind(version)
            .fetch_all(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ? AND version = ?")
            .bind(document_id)
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn insert_annotation(&self, annotation: &Annotation) -> Result<()> {
        sqlx::query(
            "INSERT INTO annotations (id, document_id, quote, start_offset, end_offset, \
             context_before, context_after, chunk_index, chunk_ids_json, recovery_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&annotation.id)
        .bind(&annotation.document_id)
        .bind(&annotation.quote)
        .bind(annotation.start_offset as i64)
        .bind(annotation.end_offset as i64)
        .bind(annotation.context.as_ref().map(|c| c.before.clone()))
        .bind(annotation.context.as_ref().map(|c| c.after.clone()))
        .bind(annotation.chunk_index.map(|i| i as i64))
        .bind(serde_json::to_string(&annotation.chunk_ids)?)
        .bind(annotation.recovery.as_ref().map(serde_json::to_string).transpose()?)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert annotation {}", annotation.id))?;
        Ok(())
    }

    async fn list_annotations(&self, document_id: &str) -> Result<Vec<Annotation>> {
        let rows = sqlx::query(
            "SELECT * FROM annotations WHERE document_id = ? ORDER BY start_offset ASC, id ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_annotation).collect()
    }

    async fn update_annotation(&self, annotation: &Annotation) -> Result<()> {
        let result = sqlx::query(
            "UPDATE annotations SET quote = ?, start_offset = ?, end_offset = ?, \
             context_before = ?, context_after = ?, chunk_index = ?, chunk_ids_json = ?, \
             recovery_json = ? WHERE id = ?",
        )
        .bind(&annotation.quote)
        .bind(annotation.start_offset as i64)
        .bind(annotation.end_offset as i64)
        .bind(annotation.context.as_ref().map(|c| c.before.clone()))
        .bind(annotation.context.as_ref().map(|c| c.after.clone()))
        .bind(annotation.chunk_index.map(|i| i as i64))
        .bind(serde_json::to_string(&annotation.chunk_ids)?)
        .bind(annotation.recovery.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&annotation.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("annotation {} not found", annotation.id);
        }
        Ok(())
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<()> {
        sqlx::query(
            "INSERT INTO connections (id, source_chunk_id, target_chunk_id, connection_type, \
             strength, user_validated, metadata_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&connection.id)
        .bind(&connection.source_chunk_id)
        .bind(&connection.target_chunk_id)
        .bind(&connection.connection_type)
        .bind(connection.strength)
        .bind(connection.user_validated)
        .bind(connection.metadata.to_string())
        .bind(connection.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert connection {}", connection.id))?;
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
        let row = sqlx::query("SELECT * FROM connections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_connection).transpose()
    }

    async fn connections_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Connection>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM connections WHERE source_chunk_id IN ",
        );
        push_id_list(&mut qb, chunk_ids);
        qb.push(" OR target_chunk_id IN ");
        push_id_list(&mut qb, chunk_ids);
        qb.push(" ORDER BY created_at ASC, id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_connection).collect()
    }

    async fn delete_connection(&self, id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_connections_for_chunks(&self, chunk_ids: &[String]) -> Result<u64> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "DELETE FROM connections WHERE source_chunk_id IN ",
        );
        push_id_list(&mut qb, chunk_ids);
        qb.push(" OR target_chunk_id IN ");
        push_id_list(&mut qb, chunk_ids);

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshots (id, document_id, version, chunk_ids_json, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.document_id)
        .bind(snapshot.version)
        .bind(serde_json::to_string(&snapshot.chunk_ids)?)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_snapshots(&self, document_id: &str) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM snapshots WHERE document_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_snapshot).collect()
    }
}
