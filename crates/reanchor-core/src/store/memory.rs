//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Tables are `HashMap`/`Vec` behind `std::sync::RwLock`. The status
//! compare-and-swap and the chunk-set swap each hold one write lock for
//! their whole read-modify-write, which is what makes them atomic.
//!
//! Individual operations can be made to fail with
//! [`InMemoryStore::inject_failure`], so rollback paths can be exercised
//! without a real backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{
    Annotation, Chunk, Connection, Document, ReprocessingStatus, Snapshot, TextVersion,
};

use super::Store;

/// Every row held by an [`InMemoryStore`], cloned out for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDump {
    pub documents: Vec<Document>,
    pub text_versions: Vec<TextVersion>,
    pub chunks: Vec<Chunk>,
    pub annotations: Vec<Annotation>,
    pub connections: Vec<Connection>,
    pub snapshots: Vec<Snapshot>,
}

/// In-memory store for tests and single-process use.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    texts: RwLock<Vec<TextVersion>>,
    chunks: RwLock<Vec<Chunk>>,
    annotations: RwLock<Vec<Annotation>>,
    connections: RwLock<Vec<Connection>>,
    snapshots: RwLock<Vec<Snapshot>>,
    failures: Mutex<HashSet<&'static str>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            texts: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
            annotations: RwLock::new(Vec::new()),
            connections: RwLock::new(Vec::new()),
            snapshots: RwLock::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Make every later call to the named operation (the trait method name,
    /// e.g. `"swap_current"`) return an error.
    pub fn inject_failure(&self, op: &'static str) {
        if let Ok(mut f) = self.failures.lock() {
            f.insert(op);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut f) = self.failures.lock() {
            f.clear();
        }
    }

    /// Clone out every table, sorted so two dumps compare structurally.
    pub fn dump(&self) -> Result<MemoryDump> {
        let mut documents: Vec<Document> = read(&self.docs)?.values().cloned().collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        let mut chunks = read(&self.chunks)?.clone();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        let mut annotations = read(&self.annotations)?.clone();
        annotations.sort_by(|a, b| a.id.cmp(&b.id));
        let mut connections = read(&self.connections)?.clone();
        connections.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(MemoryDump {
            documents,
            text_versions: read(&self.texts)?.clone(),
            chunks,
            annotations,
            connections,
            snapshots: read(&self.snapshots)?.clone(),
        })
    }

    fn check(&self, op: &'static str) -> Result<()> {
        let failing = self
            .failures
            .lock()
            .map_err(|_| anyhow!("failure registry poisoned"))?
            .contains(op);
        if failing {
            bail!("injected failure in {}", op);
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("store lock poisoned"))
}

fn by_index(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_by_key(|c| c.chunk_index);
    chunks
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.check("insert_document")?;
        let mut docs = write(&self.docs)?;
        if docs.contains_key(&doc.id) {
            bail!("document {} already exists", doc.id);
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.check("get_document")?;
        Ok(read(&self.docs)?.get(id).cloned())
    }

    async fn try_begin_reprocessing(&self, id: &str) -> Result<bool> {
        self.check("try_begin_reprocessing")?;
        let mut docs = write(&self.docs)?;
        match docs.get_mut(id) {
            Some(doc) if doc.status == ReprocessingStatus::Idle => {
                doc.status = ReprocessingStatus::Reprocessing;
                doc.updated_at = now_ts();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_reprocessing(&self, id: &str, current_version: Option<i64>) -> Result<()> {
        self.check("finish_reprocessing")?;
        let mut docs = write(&self.docs)?;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| anyhow!("document {} not found", id))?;
        doc.status = ReprocessingStatus::Idle;
        if let Some(v) = current_version {
            doc.current_version = v;
        }
        doc.updated_at = now_ts();
        Ok(())
    }

    async fn append_text_version(&self, version: &TextVersion) -> Result<()> {
        self.check("append_text_version")?;
        let mut texts = write(&self.texts)?;
        if texts
            .iter()
            .any(|t| t.document_id == version.document_id && t.version == version.version)
        {
            bail!(
                "text version {} of {} already exists",
                version.version,
                version.document_id
            );
        }
        texts.push(version.clone());
        Ok(())
    }

    async fn get_text_version(
        &self,
        document_id: &str,
        version: i64,
    ) -> Result<Option<TextVersion>> {
        self.check("get_text_version")?;
        Ok(read(&self.texts)?
            .iter()
            .find(|t| t.document_id == document_id && t.version == version)
            .cloned())
    }

    async fn list_text_versions(&self, document_id: &str) -> Result<Vec<i64>> {
        self.check("list_text_versions")?;
        let mut versions: Vec<i64> = read(&self.texts)?
            .iter()
            .filter(|t| t.document_id == document_id)
            .map(|t| t.version)
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    async fn delete_text_version(&self, document_id: &str, version: i64) -> Result<()> {
        self.check("delete_text_version")?;
        write(&self.texts)?.retain(|t| !(t.document_id == document_id && t.version == version));
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        self.check("insert_chunks")?;
        write(&self.chunks)?.extend_from_slice(chunks);
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        self.check("get_chunk")?;
        Ok(read(&self.chunks)?.iter().find(|c| c.id == id).cloned())
    }

    async fn chunks_for_version(&self, document_id: &str, version: i64) -> Result<Vec<Chunk>> {
        self.check("chunks_for_version")?;
        let rows = read(&self.chunks)?
            .iter()
            .filter(|c| c.document_id == document_id && c.version == version)
            .cloned()
            .collect();
        Ok(by_index(rows))
    }

    async fn current_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.check("current_chunks")?;
        let rows = read(&self.chunks)?
            .iter()
            .filter(|c| c.document_id == document_id && c.is_current)
            .cloned()
            .collect();
        Ok(by_index(rows))
    }

    async fn set_version_current(
        &self,
        document_id: &str,
        version: i64,
        is_current: bool,
    ) -> Result<u64> {
        self.check("set_version_current")?;
        let mut changed = 0;
        for c in write(&self.chunks)?.iter_mut() {
            if c.document_id == document_id && c.version == version && c.batch_id.is_none() {
                c.is_current = is_current;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn swap_current(
        &self,
        document_id: &str,
        batch_id: &str,
        retire_version: i64,
    ) -> Result<u64> {
        self.check("swap_current")?;
        let mut chunks = write(&self.chunks)?;
        if !chunks.iter().any(|c| c.batch_id.as_deref() == Some(batch_id)) {
            return Ok(0);
        }
        let mut promoted = 0;
        for c in chunks.iter_mut() {
            if c.batch_id.as_deref() == Some(batch_id) {
                c.is_current = true;
                promoted += 1;
            } else if c.document_id == document_id
                && c.version == retire_version
                && c.batch_id.is_none()
            {
                c.is_current = false;
            }
        }
        Ok(promoted)
    }

    async fn clear_batch(&self, batch_id: &str) -> Result<u64> {
        self.check("clear_batch")?;
        let mut changed = 0;
        for c in write(&self.chunks)?.iter_mut() {
            if c.batch_id.as_deref() == Some(batch_id) {
                c.batch_id = None;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_batch(&self, batch_id: &str) -> Result<u64> {
        self.check("delete_batch")?;
        let mut chunks = write(&self.chunks)?;
        let before = chunks.len();
        chunks.retain(|c| c.batch_id.as_deref() != Some(batch_id));
        Ok((before - chunks.len()) as u64)
    }

    async fn pending_batches(&self, document_id: &str) -> Result<Vec<String>> {
        self.check("pending_batches")?;
        let mut batches: Vec<String> = read(&self.chunks)?
            .iter()
            .filter(|c| c.document_id == document_id)
            .filter_map(|c| c.batch_id.clone())
            .collect();
        batches.sort();
        batches.dedup();
        Ok(batches)
    }

    async fn delete_version_chunks(
        &self,
        document_id: &str,
        version: i64,
    ) -> Result<Vec<String>> {
        self.check("delete_version_chunks")?;
        let mut chunks = write(&self.chunks)?;
        let mut removed = Vec::new();
        chunks.retain(|c| {
            let gone = c.document_id == document_id && c.version == version;
            if gone {
                removed.push(c.id.clone());
            }
            !gone
        });
        Ok(removed)
    }

    async fn insert_annotation(&self, annotation: &Annotation) -> Result<()> {
        self.check("insert_annotation")?;
        write(&self.annotations)?.push(annotation.clone());
        Ok(())
    }

    async fn list_annotations(&self, document_id: &str) -> Result<Vec<Annotation>> {
        self.check("list_annotations")?;
        let mut rows: Vec<Annotation> = read(&self.annotations)?
            .iter()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.start_offset);
        Ok(rows)
    }

    async fn update_annotation(&self, annotation: &Annotation) -> Result<()> {
        self.check("update_annotation")?;
        let mut rows = write(&self.annotations)?;
        let slot = rows
            .iter_mut()
            .find(|a| a.id == annotation.id)
            .ok_or_else(|| anyhow!("annotation {} not found", annotation.id))?;
        *slot = annotation.clone();
        Ok(())
    }

    async fn insert_connection(&self, connection: &Connection) -> Result<()> {
        self.check("insert_connection")?;
        write(&self.connections)?.push(connection.clone());
        Ok(())
    }

    async fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
        self.check("get_connection")?;
        Ok(read(&self.connections)?.iter().find(|c| c.id == id).cloned())
    }

    async fn connections_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Connection>> {
        self.check("connections_for_chunks")?;
        let ids: HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();
        Ok(read(&self.connections)?
            .iter()
            .filter(|c| {
                ids.contains(c.source_chunk_id.as_str()) || ids.contains(c.target_chunk_id.as_str())
            })
            .cloned()
            .collect())
    }

    async fn delete_connection(&self, id: &str) -> Result<u64> {
        self.check("delete_connection")?;
        let mut rows = write(&self.connections)?;
        let before = rows.len();
        rows.retain(|c| c.id != id);
        Ok((before - rows.len()) as u64)
    }

    async fn delete_connections_for_chunks(&self, chunk_ids: &[String]) -> Result<u64> {
        self.check("delete_connections_for_chunks")?;
        let ids: HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();
        let mut rows = write(&self.connections)?;
        let before = rows.len();
        rows.retain(|c| {
            !(ids.contains(c.source_chunk_id.as_str()) || ids.contains(c.target_chunk_id.as_str()))
        });
        Ok((before - rows.len()) as u64)
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.check("insert_snapshot")?;
        write(&self.snapshots)?.push(snapshot.clone());
        Ok(())
    }

    async fn list_snapshots(&self, document_id: &str) -> Result<Vec<Snapshot>> {
        self.check("list_snapshots")?;
        Ok(read(&self.snapshots)?
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect())
    }
}
