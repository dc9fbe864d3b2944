//! Storage abstraction for the recovery engine.
//!
//! The [`Store`] trait is deliberately row-granular: every method touches one
//! kind of row, and none of them promises multi-statement atomicity. The
//! [`ChunkVersionManager`](crate::version::ChunkVersionManager) builds the
//! versioned swap on top of these primitives as an explicit state machine,
//! so a backend only has to provide two atomic operations:
//! [`try_begin_reprocessing`](Store::try_begin_reprocessing), a
//! compare-and-swap on the document status flag, and
//! [`swap_current`](Store::swap_current), which exchanges the current chunk
//! set for a staged batch.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Annotation, Chunk, Connection, Document, Snapshot, TextVersion};

/// Abstract persistence for documents, text versions, chunks, annotations,
/// connections, and snapshots.
///
/// # Operations
///
/// | Group | Methods |
/// |-------|---------|
/// | Documents | [`insert_document`](Store::insert_document), [`get_document`](Store::get_document), [`try_begin_reprocessing`](Store::try_begin_reprocessing), [`finish_reprocessing`](Store::finish_reprocessing) |
/// | Text | [`append_text_version`](Store::append_text_version), [`get_text_version`](Store::get_text_version), [`list_text_versions`](Store::list_text_versions), [`delete_text_version`](Store::delete_text_version) |
/// | Chunks | [`insert_chunks`](Store::insert_chunks), [`chunks_for_version`](Store::chunks_for_version), [`current_chunks`](Store::current_chunks), [`set_version_current`](Store::set_version_current), [`swap_current`](Store::swap_current), [`clear_batch`](Store::clear_batch), [`delete_batch`](Store::delete_batch), [`pending_batches`](Store::pending_batches), [`delete_version_chunks`](Store::delete_version_chunks) |
/// | Annotations | [`insert_annotation`](Store::insert_annotation), [`list_annotations`](Store::list_annotations), [`update_annotation`](Store::update_annotation) |
/// | Connections | [`insert_connection`](Store::insert_connection), [`get_connection`](Store::get_connection), [`connections_for_chunks`](Store::connections_for_chunks), [`delete_connection`](Store::delete_connection), [`delete_connections_for_chunks`](Store::delete_connections_for_chunks) |
/// | Snapshots | [`insert_snapshot`](Store::insert_snapshot), [`list_snapshots`](Store::list_snapshots) |
#[async_trait]
pub trait Store: Send + Sync {
    // ── Documents ──────────────────────────────────────────────────────

    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Atomically move the document from `idle` to `reprocessing`.
    ///
    /// Returns `false` if the document is already reprocessing (or does not
    /// exist). Must be a single compare-and-swap: a read followed by a
    /// separate write races with a concurrent caller.
    async fn try_begin_reprocessing(&self, id: &str) -> Result<bool>;

    /// Return the document to `idle`, optionally pointing it at a new
    /// current version.
    async fn finish_reprocessing(&self, id: &str, current_version: Option<i64>) -> Result<()>;

    // ── Text versions ──────────────────────────────────────────────────

    async fn append_text_version(&self, version: &TextVersion) -> Result<()>;

    async fn get_text_version(&self, document_id: &str, version: i64)
        -> Result<Option<TextVersion>>;

    /// Version numbers present for a document, ascending.
    async fn list_text_versions(&self, document_id: &str) -> Result<Vec<i64>>;

    async fn delete_text_version(&self, document_id: &str, version: i64) -> Result<()>;

    /// The text version the document currently points at.
    async fn current_text(&self, document_id: &str) -> Result<Option<TextVersion>> {
        match self.get_document(document_id).await? {
            Some(doc) => self.get_text_version(document_id, doc.current_version).await,
            None => Ok(None),
        }
    }

    // ── Chunks ─────────────────────────────────────────────────────────

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// All rows of one version, ordered by chunk index.
    async fn chunks_for_version(&self, document_id: &str, version: i64) -> Result<Vec<Chunk>>;

    /// Rows with `is_current = true`, ordered by chunk index.
    async fn current_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Set `is_current` on every row of one version that carries no batch id.
    async fn set_version_current(
        &self,
        document_id: &str,
        version: i64,
        is_current: bool,
    ) -> Result<u64>;

    /// Promote a batch and clear `is_current` on the untagged rows of
    /// `retire_version`, as one atomic step: readers see either the old set
    /// or the new one, never both and never neither. Returns the number of
    /// rows promoted; an empty or unknown batch changes nothing.
    async fn swap_current(
        &self,
        document_id: &str,
        batch_id: &str,
        retire_version: i64,
    ) -> Result<u64>;

    /// Drop the batch id from its rows, making them ordinary chunks.
    async fn clear_batch(&self, batch_id: &str) -> Result<u64>;

    /// Delete every row tagged with the batch id.
    async fn delete_batch(&self, batch_id: &str) -> Result<u64>;

    /// Distinct batch ids still present on a document's rows.
    async fn pending_batches(&self, document_id: &str) -> Result<Vec<String>>;

    /// Delete all rows of one version, returning their ids.
    async fn delete_version_chunks(&self, document_id: &str, version: i64)
        -> Result<Vec<String>>;

    // ── Annotations ────────────────────────────────────────────────────

    async fn insert_annotation(&self, annotation: &Annotation) -> Result<()>;

    async fn list_annotations(&self, document_id: &str) -> Result<Vec<Annotation>>;

    /// Overwrite an annotation row in full.
    async fn update_annotation(&self, annotation: &Annotation) -> Result<()>;

    // ── Connections ────────────────────────────────────────────────────

    async fn insert_connection(&self, connection: &Connection) -> Result<()>;

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>>;

    /// Connections with either endpoint in `chunk_ids`.
    async fn connections_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Connection>>;

    /// Delete one connection row. Returns the number of rows removed.
    async fn delete_connection(&self, id: &str) -> Result<u64>;

    /// Delete connections with either endpoint in `chunk_ids`.
    async fn delete_connections_for_chunks(&self, chunk_ids: &[String]) -> Result<u64>;

    // ── Snapshots ──────────────────────────────────────────────────────

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn list_snapshots(&self, document_id: &str) -> Result<Vec<Snapshot>>;
}
