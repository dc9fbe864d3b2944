//! Versioned chunk-set swap with rollback.
//!
//! A reprocessing run is a [`ReprocessSession`] driven through
//! [`ChunkVersionManager`]:
//!
//! ```text
//!  begin ──► Reprocessing ──stage*──► commit ──► Committed
//!                 │
//!                 └──────── rollback ──► RolledBack
//! ```
//!
//! The store offers no general multi-row transactions, so each transition
//! is a sequence of single-purpose writes ordered so that a failure at any
//! point can be undone:
//!
//! 1. **begin**: CAS the status flag and append the new text version. The
//!    old chunk set stays current for the whole run.
//! 2. **stage**: insert new rows tagged with the session's batch id.
//! 3. **commit**: swap the batch in for the old set, point the document at
//!    the new version (releasing the flag), delete connection rows
//!    superseded by remapped copies, then clear the batch id.
//! 4. **rollback**: remove everything the run wrote and restore the old
//!    set. Each step checks current state first, so it is safe after a
//!    partial commit and safe to repeat.
//!
//! The swap in step 3 is the store's one atomic chunk-set operation, so a
//! reader sees exactly one current set at every point of a run.
//!
//! Rows are only ever removed for good by the [`retention`](crate::retention)
//! sweep.

use anyhow::anyhow;
use chrono::{Duration, Utc};

use crate::connections::remapped_from;
use crate::error::{ReprocessError, Result};
use crate::models::{Annotation, Chunk, Connection, ReprocessingStatus, TextVersion};
use crate::store::Store;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Reprocessing,
    Committed,
    RolledBack,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reprocessing => "reprocessing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// One in-flight reprocessing run of one document.
#[derive(Debug)]
pub struct ReprocessSession {
    document_id: String,
    previous_version: i64,
    new_version: i64,
    batch_id: String,
    state: SessionState,
    staged: Vec<String>,
    saved_annotations: Vec<Annotation>,
    retired_connections: Vec<Connection>,
}

impl ReprocessSession {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn previous_version(&self) -> i64 {
        self.previous_version
    }

    pub fn new_version(&self) -> i64 {
        self.new_version
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Ids of every chunk staged so far.
    pub fn staged_chunk_ids(&self) -> &[String] {
        &self.staged
    }

    /// Keep the pre-run form of annotations about to be rewritten, so that
    /// rollback can put them back. Only the first copy of each id is kept.
    pub fn remember_annotations(&mut self, annotations: &[Annotation]) {
        for a in annotations {
            if !self.saved_annotations.iter().any(|s| s.id == a.id) {
                self.saved_annotations.push(a.clone());
            }
        }
    }

    /// Mark a connection row as replaced by a remapped copy. It is deleted
    /// at commit and put back by rollback if it was already gone.
    pub fn retire_connection(&mut self, connection: &Connection) {
        if !self.retired_connections.iter().any(|c| c.id == connection.id) {
            self.retired_connections.push(connection.clone());
        }
    }

    fn expect_reprocessing(&self, action: &'static str) -> Result<()> {
        if self.state == SessionState::Reprocessing {
            Ok(())
        } else {
            Err(ReprocessError::InvalidTransition {
                action,
                state: self.state.as_str().to_string(),
            })
        }
    }
}

impl Drop for ReprocessSession {
    fn drop(&mut self) {
        if self.state == SessionState::Reprocessing {
            tracing::warn!(
                document = %self.document_id,
                batch = %self.batch_id,
                "reprocess session dropped without commit or rollback"
            );
        }
    }
}

/// What [`ChunkVersionManager::recover_abandoned`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonedRun {
    /// Nothing was left over.
    Clean,
    /// The run died before the pointer moved; its writes were undone.
    RolledBack { version: i64 },
    /// The pointer had already moved; the commit was finished.
    RolledForward { version: i64 },
}

/// Drives [`ReprocessSession`] transitions against a [`Store`].
pub struct ChunkVersionManager<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> ChunkVersionManager<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Claim the document and record the new text.
    ///
    /// Fails with [`ReprocessError::NotFound`] for an unknown document and
    /// [`ReprocessError::ConcurrentReprocessing`] if another run holds it.
    pub async fn begin(
        &self,
        document_id: &str,
        text: &str,
        triggered_by: &str,
    ) -> Result<ReprocessSession> {
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| ReprocessError::NotFound(format!("document {}", document_id)))?;

        if !self.store.try_begin_reprocessing(document_id).await? {
            return Err(ReprocessError::ConcurrentReprocessing(
                document_id.to_string(),
            ));
        }

        let latest = self
            .store
            .list_text_versions(document_id)
            .await
            .map(|v| v.last().copied().unwrap_or(0));
        let new_version = match latest {
            Ok(latest) => latest.max(doc.current_version) + 1,
            Err(e) => {
                self.release(document_id).await;
                return Err(e.into());
            }
        };

        let mut session = ReprocessSession {
            document_id: document_id.to_string(),
            previous_version: doc.current_version,
            new_version,
            batch_id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Reprocessing,
            staged: Vec::new(),
            saved_annotations: Vec::new(),
            retired_connections: Vec::new(),
        };

        let entered = self
            .store
            .append_text_version(&TextVersion {
                document_id: document_id.to_string(),
                version: new_version,
                body: text.to_string(),
                triggered_by: triggered_by.to_string(),
                created_at: Utc::now(),
            })
            .await;

        if let Err(e) = entered {
            if let Err(undo) = self.rollback(&mut session).await {
                tracing::error!(
                    document = %document_id,
                    error = %undo,
                    "undo of failed begin also failed"
                );
            }
            return Err(e.into());
        }

        tracing::info!(
            document = %document_id,
            from = session.previous_version,
            to = session.new_version,
            batch = %session.batch_id,
            "reprocessing started"
        );
        Ok(session)
    }

    /// Insert new rows under the session's batch id. Document id, version,
    /// and flags on the input are overwritten.
    pub async fn stage(
        &self,
        session: &mut ReprocessSession,
        mut chunks: Vec<Chunk>,
    ) -> Result<Vec<Chunk>> {
        session.expect_reprocessing("stage")?;
        for c in &mut chunks {
            c.document_id = session.document_id.clone();
            c.version = session.new_version;
            c.is_current = false;
            c.batch_id = Some(session.batch_id.clone());
        }
        self.store.insert_chunks(&chunks).await?;
        session.staged.extend(chunks.iter().map(|c| c.id.clone()));
        tracing::debug!(batch = %session.batch_id, count = chunks.len(), "chunks staged");
        Ok(chunks)
    }

    /// Make the staged batch the document's current chunk set.
    ///
    /// Any store error becomes [`ReprocessError::CommitFailure`], as does a
    /// batch that no longer holds every staged row (someone else removed
    /// it). The session stays in `Reprocessing` so the caller can roll it
    /// back.
    pub async fn commit(&self, session: &mut ReprocessSession) -> Result<()> {
        session.expect_reprocessing("commit")?;
        let commit_failure = |source: anyhow::Error| ReprocessError::CommitFailure {
            document_id: session.document_id.clone(),
            source,
        };
        if session.staged.is_empty() {
            return Err(commit_failure(anyhow!("no chunks staged")));
        }

        let promoted = self
            .store
            .swap_current(
                &session.document_id,
                &session.batch_id,
                session.previous_version,
            )
            .await
            .map_err(commit_failure)?;
        if promoted != session.staged.len() as u64 {
            return Err(commit_failure(anyhow!(
                "batch {} holds {} of {} staged chunks",
                session.batch_id,
                promoted,
                session.staged.len()
            )));
        }
        self.store
            .finish_reprocessing(&session.document_id, Some(session.new_version))
            .await
            .map_err(commit_failure)?;
        for conn in &session.retired_connections {
            self.store
                .delete_connection(&conn.id)
                .await
                .map_err(commit_failure)?;
        }
        self.store
            .clear_batch(&session.batch_id)
            .await
            .map_err(commit_failure)?;

        session.state = SessionState::Committed;
        tracing::info!(
            document = %session.document_id,
            version = session.new_version,
            chunks = session.staged.len(),
            "reprocessing committed"
        );
        Ok(())
    }

    /// Undo everything the session wrote. Repeating a rollback is a no-op;
    /// rolling back a committed session is an [`InvalidTransition`].
    ///
    /// [`InvalidTransition`]: ReprocessError::InvalidTransition
    pub async fn rollback(&self, session: &mut ReprocessSession) -> Result<()> {
        match session.state {
            SessionState::RolledBack => return Ok(()),
            SessionState::Committed => session.expect_reprocessing("rollback")?,
            SessionState::Reprocessing => {}
        }
        let doc_id = session.document_id.clone();

        if !session.staged.is_empty() {
            self.store
                .delete_connections_for_chunks(&session.staged)
                .await?;
        }
        for conn in &session.retired_connections {
            if self.store.get_connection(&conn.id).await?.is_none() {
                self.store.insert_connection(conn).await?;
            }
        }
        for saved in &session.saved_annotations {
            self.store.update_annotation(saved).await?;
        }
        if self
            .store
            .pending_batches(&doc_id)
            .await?
            .contains(&session.batch_id)
        {
            self.store.delete_batch(&session.batch_id).await?;
        }
        // Rows of the new version that already lost their batch tag.
        self.store
            .delete_version_chunks(&doc_id, session.new_version)
            .await?;

        self.restore_previous(&doc_id, session.previous_version, session.new_version)
            .await?;

        session.state = SessionState::RolledBack;
        tracing::warn!(
            document = %doc_id,
            version = session.previous_version,
            batch = %session.batch_id,
            "reprocessing rolled back"
        );
        Ok(())
    }

    /// Clean up after a run that never reached commit or rollback, e.g.
    /// because the process died.
    ///
    /// A run whose flag was set less than `stale_after` ago may still be
    /// alive and is refused with [`ReprocessError::RunStillActive`]; pass
    /// [`Duration::zero`] to force recovery.
    ///
    /// If the document still points at its old version the run's writes are
    /// undone; annotations it moved are restored from the anchor recorded
    /// in their recovery state. If the document already points at the new
    /// version, the commit is finished instead: superseded connection rows
    /// are deleted and the remaining batch tags cleared.
    pub async fn recover_abandoned(
        &self,
        document_id: &str,
        stale_after: Duration,
    ) -> Result<AbandonedRun> {
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| ReprocessError::NotFound(format!("document {}", document_id)))?;

        if doc.status == ReprocessingStatus::Idle {
            let batches = self.store.pending_batches(document_id).await?;
            if batches.is_empty() {
                return Ok(AbandonedRun::Clean);
            }
            self.retire_superseded(document_id).await?;
            for batch in &batches {
                self.store.clear_batch(batch).await?;
            }
            tracing::warn!(
                document = %document_id,
                version = doc.current_version,
                "finished interrupted commit"
            );
            return Ok(AbandonedRun::RolledForward {
                version: doc.current_version,
            });
        }

        let age_secs = Utc::now().timestamp() - doc.updated_at;
        if age_secs < stale_after.num_seconds() {
            return Err(ReprocessError::RunStillActive {
                document_id: document_id.to_string(),
                age_secs,
            });
        }

        let versions = self.store.list_text_versions(document_id).await?;
        let abandoned: Vec<i64> = versions
            .into_iter()
            .filter(|v| *v > doc.current_version)
            .collect();

        for batch in self.store.pending_batches(document_id).await? {
            self.store.delete_batch(&batch).await?;
        }
        for &version in &abandoned {
            let removed = self
                .store
                .delete_version_chunks(document_id, version)
                .await?;
            if !removed.is_empty() {
                self.store.delete_connections_for_chunks(&removed).await?;
            }
        }
        for mut annotation in self.store.list_annotations(document_id).await? {
            let touched = annotation
                .recovery
                .as_ref()
                .is_some_and(|r| abandoned.contains(&r.version));
            if !touched {
                continue;
            }
            if let Some(prev) = annotation.recovery.take().and_then(|r| r.previous) {
                annotation.set_anchor(prev);
            }
            self.store.update_annotation(&annotation).await?;
        }

        let newest = abandoned.iter().copied().max().unwrap_or(doc.current_version);
        for &version in &abandoned {
            self.store.delete_text_version(document_id, version).await?;
        }
        self.store
            .set_version_current(document_id, doc.current_version, true)
            .await?;
        self.store.finish_reprocessing(document_id, None).await?;
        tracing::warn!(document = %document_id, abandoned = newest, "rolled back abandoned run");
        Ok(AbandonedRun::RolledBack { version: newest })
    }

    /// Delete connection rows that a remapped copy on the current chunk set
    /// replaces.
    async fn retire_superseded(&self, document_id: &str) -> Result<()> {
        let current: Vec<String> = self
            .store
            .current_chunks(document_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        for conn in self.store.connections_for_chunks(&current).await? {
            if let Some(old) = remapped_from(&conn) {
                self.store.delete_connection(old).await?;
            }
        }
        Ok(())
    }

    /// Point the document back at `previous`, make its rows current again,
    /// drop the appended text, and release the flag.
    async fn restore_previous(&self, doc_id: &str, previous: i64, new_version: i64) -> Result<()> {
        let current = self.store.current_chunks(doc_id).await?;
        if current.iter().all(|c| c.version != previous) {
            self.store
                .set_version_current(doc_id, previous, true)
                .await?;
        }
        if self
            .store
            .get_text_version(doc_id, new_version)
            .await?
            .is_some()
        {
            self.store.delete_text_version(doc_id, new_version).await?;
        }
        let doc = self.store.get_document(doc_id).await?;
        let repoint = doc
            .as_ref()
            .is_some_and(|d| d.current_version != previous)
            .then_some(previous);
        self.store.finish_reprocessing(doc_id, repoint).await?;
        Ok(())
    }

    /// Release the status flag after a failure that wrote nothing.
    async fn release(&self, document_id: &str) {
        if let Err(e) = self.store.finish_reprocessing(document_id, None).await {
            tracing::error!(
                document = %document_id,
                error = %e,
                "failed to release reprocessing flag"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnnotationRecovery, DerivedChunk, MatchMethod};
    use crate::store::memory::InMemoryStore;
    use crate::testing::{rows, seed_annotation, seed_document};

    fn new_chunks(doc: &str, text: &str) -> Vec<Chunk> {
        let n = text.chars().count();
        vec![Chunk::from_derived(
            doc,
            0,
            0,
            DerivedChunk {
                content: text.to_string(),
                start: 0,
                end: n,
                metadata: None,
                embedding: None,
            },
        )]
    }

    async fn current_versions(store: &InMemoryStore, doc: &str) -> Vec<i64> {
        let mut v: Vec<i64> = store
            .current_chunks(doc)
            .await
            .unwrap()
            .iter()
            .map(|c| c.version)
            .collect();
        v.dedup();
        v
    }

    #[tokio::test]
    async fn test_begin_stage_commit() {
        let store = InMemoryStore::new();
        seed_document(&store, "d", "alpha beta", &[(0, 5), (5, 10)]).await;
        let mgr = ChunkVersionManager::new(&store);

        let mut session = mgr.begin("d", "alpha beta gamma", "edit").await.unwrap();
        assert_eq!((session.previous_version(), session.new_version()), (1, 2));
        // The old set stays readable while the run is in flight.
        assert_eq!(current_versions(&store, "d").await, vec![1]);
        assert!(!store.try_begin_reprocessing("d").await.unwrap());

        let staged = mgr
            .stage(&mut session, new_chunks("d", "alpha beta gamma"))
            .await
            .unwrap();
        assert_eq!(staged[0].batch_id.as_deref(), Some(session.batch_id()));
        mgr.commit(&mut session).await.unwrap();

        assert_eq!(session.state(), SessionState::Committed);
        assert_eq!(current_versions(&store, "d").await, vec![2]);
        let doc = store.get_document("d").await.unwrap().unwrap();
        assert_eq!(doc.current_version, 2);
        assert_eq!(doc.status, ReprocessingStatus::Idle);
        assert!(store.pending_batches("d").await.unwrap().is_empty());
        assert_eq!(
            store.current_text("d").await.unwrap().unwrap().body,
            "alpha beta gamma"
        );
    }

    #[tokio::test]
    async fn test_concurrent_begin_rejected() {
        let store = InMemoryStore::new();
        seed_document(&store, "d", "text", &[(0, 4)]).await;
        let mgr = ChunkVersionManager::new(&store);
        let mut first = mgr.begin("d", "text 2", "edit").await.unwrap();
        let second = mgr.begin("d", "text 3", "edit").await;
        assert!(matches!(
            second,
            Err(ReprocessError::ConcurrentReprocessing(_))
        ));
        mgr.rollback(&mut first).await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_unknown_document() {
        let store = InMemoryStore::new();
        let mgr = ChunkVersionManager::new(&store);
        assert!(matches!(
            mgr.begin("nope", "t", "edit").await,
            Err(ReprocessError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_restores_rows_exactly() {
        let store = InMemoryStore::new();
        seed_document(&store, "d", "one two three", &[(0, 4), (4, 13)]).await;
        seed_annotation(&store, "d", "a1", "two", 4, 7).await;
        let before = rows(&store);

        let mgr = ChunkVersionManager::new(&store);
        let mut session = mgr.begin("d", "one 2 three", "edit").await.unwrap();
        let anns = store.list_annotations("d").await.unwrap();
        session.remember_annotations(&anns);
        let mut moved = anns[0].clone();
        moved.start_offset = 0;
        store.update_annotation(&moved).await.unwrap();
        mgr.stage(&mut session, new_chunks("d", "one 2 three"))
            .await
            .unwrap();

        mgr.rollback(&mut session).await.unwrap();
        assert_eq!(rows(&store), before);

        // Repeat is a no-op; commit afterwards is illegal.
        mgr.rollback(&mut session).await.unwrap();
        assert!(matches!(
            mgr.commit(&mut session).await,
            Err(ReprocessError::InvalidTransition { action: "commit", .. })
        ));
    }

    #[tokio::test]
    async fn test_rollback_after_partial_commit() {
        let store = InMemoryStore::new();
        seed_document(&store, "d", "one two", &[(0, 7)]).await;
        let before = rows(&store);

        let mgr = ChunkVersionManager::new(&store);
        let mut session = mgr.begin("d", "one two!", "edit").await.unwrap();
        mgr.stage(&mut session, new_chunks("d", "one two!"))
            .await
            .unwrap();
        store.inject_failure("clear_batch");
        let err = mgr.commit(&mut session).await.unwrap_err();
        assert!(matches!(err, ReprocessError::CommitFailure { .. }));
        assert_eq!(current_versions(&store, "d").await, vec![1]);
        store.clear_failures();

        mgr.rollback(&mut session).await.unwrap();
        assert_eq!(current_versions(&store, "d").await, vec![1]);
        assert_eq!(rows(&store), before);
    }

    #[tokio::test]
    async fn test_commit_empty_batch_fails() {
        let store = InMemoryStore::new();
        seed_document(&store, "d", "x", &[(0, 1)]).await;
        let mgr = ChunkVersionManager::new(&store);
        let mut session = mgr.begin("d", "y", "edit").await.unwrap();
        assert!(matches!(
            mgr.commit(&mut session).await,
            Err(ReprocessError::CommitFailure { .. })
        ));
        mgr.rollback(&mut session).await.unwrap();
        assert_eq!(current_versions(&store, "d").await, vec![1]);
    }

    #[tokio::test]
    async fn test_failed_begin_releases_flag() {
        let store = InMemoryStore::new();
        seed_document(&store, "d", "x", &[(0, 1)]).await;
        store.inject_failure("append_text_version");
        let mgr = ChunkVersionManager::new(&store);
        assert!(mgr.begin("d", "y", "edit").await.is_err());
        store.clear_failures();
        let doc = store.get_document("d").await.unwrap().unwrap();
        assert_eq!(doc.status, ReprocessingStatus::Idle);
        assert_eq!(current_versions(&store, "d").await, vec![1]);
    }

    #[tokio::test]
    async fn test_recover_abandoned_run() {
        let store = InMemoryStore::new();
        seed_document(&store, "d", "one two", &[(0, 7)]).await;
        seed_annotation(&store, "d", "a1", "two", 4, 7).await;
        let before = rows(&store);

        let mgr = ChunkVersionManager::new(&store);
        let mut session = mgr.begin("d", "zero one two", "edit").await.unwrap();
        mgr.stage(&mut session, new_chunks("d", "zero one two"))
            .await
            .unwrap();
        let mut ann = store.list_annotations("d").await.unwrap().remove(0);
        let previous = ann.anchor();
        ann.start_offset = 9;
        ann.end_offset = 12;
        ann.recovery = Some(AnnotationRecovery {
            method: Some(MatchMethod::Exact),
            confidence: 1.0,
            needs_review: false,
            suggested_start: None,
            suggested_end: None,
            version: session.new_version(),
            previous: Some(previous),
        });
        store.update_annotation(&ann).await.unwrap();
        // Simulate the process dying: the session is never resolved.
        std::mem::forget(session);

        let outcome = mgr.recover_abandoned("d", Duration::zero()).await.unwrap();
        assert_eq!(outcome, AbandonedRun::RolledBack { version: 2 });
        assert_eq!(rows(&store), before);
        assert_eq!(
            mgr.recover_abandoned("d", Duration::zero()).await.unwrap(),
            AbandonedRun::Clean
        );
    }

    fn link(id: &str, source: &str, target: &str, metadata: serde_json::Value) -> Connection {
        Connection {
            id: id.to_string(),
            source_chunk_id: source.to_string(),
            target_chunk_id: target.to_string(),
            connection_type: "thematic".into(),
            strength: 0.7,
            user_validated: true,
            metadata,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_recover_refuses_live_run() {
        let store = InMemoryStore::new();
        seed_document(&store, "d", "one two", &[(0, 7)]).await;
        let before = rows(&store);

        let mgr = ChunkVersionManager::new(&store);
        let mut session = mgr.begin("d", "one two three", "edit").await.unwrap();
        mgr.stage(&mut session, new_chunks("d", "one two three"))
            .await
            .unwrap();

        let err = mgr
            .recover_abandoned("d", Duration::minutes(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ReprocessError::RunStillActive { .. }));
        assert_eq!(store.pending_batches("d").await.unwrap().len(), 1);

        // Forced anyway: the live run must notice its batch is gone.
        let forced = mgr.recover_abandoned("d", Duration::zero()).await.unwrap();
        assert_eq!(forced, AbandonedRun::RolledBack { version: 2 });
        let err = mgr.commit(&mut session).await.unwrap_err();
        assert!(matches!(err, ReprocessError::CommitFailure { .. }));

        mgr.rollback(&mut session).await.unwrap();
        let doc = store.get_document("d").await.unwrap().unwrap();
        assert_eq!(doc.current_version, 1);
        assert_eq!(store.current_text("d").await.unwrap().unwrap().body, "one two");
        assert_eq!(rows(&store), before);
    }

    #[tokio::test]
    async fn test_commit_retires_superseded_connections() {
        let store = InMemoryStore::new();
        let old = seed_document(&store, "d", "one two", &[(0, 7)]).await;
        let original = link("c1", &old[0].id, "elsewhere", serde_json::json!({}));
        store.insert_connection(&original).await.unwrap();

        let mgr = ChunkVersionManager::new(&store);
        let mut session = mgr.begin("d", "one two!", "edit").await.unwrap();
        let staged = mgr
            .stage(&mut session, new_chunks("d", "one two!"))
            .await
            .unwrap();
        let copy = link(
            "c2",
            &staged[0].id,
            "elsewhere",
            serde_json::json!({"remapped_from": {"connection_id": "c1"}}),
        );
        store.insert_connection(&copy).await.unwrap();
        session.retire_connection(&original);
        mgr.commit(&mut session).await.unwrap();

        assert!(store.get_connection("c1").await.unwrap().is_none());
        assert_eq!(store.get_connection("c2").await.unwrap(), Some(copy));
    }

    #[tokio::test]
    async fn test_rollback_restores_retired_connections() {
        let store = InMemoryStore::new();
        let old = seed_document(&store, "d", "one two", &[(0, 7)]).await;
        let original = link("c1", &old[0].id, "elsewhere", serde_json::json!({}));
        store.insert_connection(&original).await.unwrap();
        let before = rows(&store);

        let mgr = ChunkVersionManager::new(&store);
        let mut session = mgr.begin("d", "one two!", "edit").await.unwrap();
        let staged = mgr
            .stage(&mut session, new_chunks("d", "one two!"))
            .await
            .unwrap();
        store
            .insert_connection(&link("c2", &staged[0].id, "elsewhere", serde_json::json!({})))
            .await
            .unwrap();
        session.retire_connection(&original);

        // Fails after the old row is already deleted.
        store.inject_failure("clear_batch");
        assert!(mgr.commit(&mut session).await.is_err());
        store.clear_failures();
        assert!(store.get_connection("c1").await.unwrap().is_none());

        mgr.rollback(&mut session).await.unwrap();
        assert_eq!(rows(&store), before);
    }

    #[tokio::test]
    async fn test_recover_finishes_interrupted_commit() {
        let store = InMemoryStore::new();
        let old = seed_document(&store, "d", "one two", &[(0, 7)]).await;
        store
            .insert_connection(&link("c1", &old[0].id, "elsewhere", serde_json::json!({})))
            .await
            .unwrap();

        let mgr = ChunkVersionManager::new(&store);
        let mut session = mgr.begin("d", "one two!", "edit").await.unwrap();
        let staged = mgr
            .stage(&mut session, new_chunks("d", "one two!"))
            .await
            .unwrap();
        store
            .insert_connection(&link(
                "c2",
                &staged[0].id,
                "elsewhere",
                serde_json::json!({"remapped_from": {"connection_id": "c1"}}),
            ))
            .await
            .unwrap();
        // The process dies after the pointer moved but before cleanup.
        store
            .swap_current("d", session.batch_id(), 1)
            .await
            .unwrap();
        store.finish_reprocessing("d", Some(2)).await.unwrap();
        std::mem::forget(session);

        let outcome = mgr.recover_abandoned("d", Duration::zero()).await.unwrap();
        assert_eq!(outcome, AbandonedRun::RolledForward { version: 2 });
        assert!(store.pending_batches("d").await.unwrap().is_empty());
        assert_eq!(current_versions(&store, "d").await, vec![2]);
        assert!(store.get_connection("c1").await.unwrap().is_none());
        assert!(store.get_connection("c2").await.unwrap().is_some());
    }
}
