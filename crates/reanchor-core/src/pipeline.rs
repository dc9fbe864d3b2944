//! End-to-end reprocessing of one document.
//!
//! ```text
//! begin ─► derive ─┬─► (engine ok) ───────────────────┐
//!                  └─► fallback chunker ─► metadata ───┤
//!                                                      ▼
//!        stage ─► annotations ─► connections ─► commit ─► sweep
//! ```
//!
//! Any error after `begin` rolls the session back before it is returned.
//! Derivation errors are not run failures: the fallback chunker takes over
//! and metadata is recovered from the previous version instead. A run can
//! be cancelled between stages through a [`CancelFlag`]; it is then rolled
//! back and reported as [`ReprocessError::Aborted`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::annotations::{recover_annotations, AnnotationRecoverer, AnnotationRecoveryReport};
use crate::connections::{remap_connections, ConnectionRemapReport, ConnectionRemapper};
use crate::derive::{validate_derived, DerivationEngine, FallbackChunker};
use crate::error::{ReprocessError, Result};
use crate::fuzzy::FuzzyMatcher;
use crate::metadata::{recover_metadata, MetadataReport};
use crate::models::{Chunk, DerivedChunk};
use crate::retention::{sweep, RetentionPolicy, SweepReport};
use crate::store::Store;
use crate::thresholds::RecoveryThresholds;
use crate::version::{ChunkVersionManager, ReprocessSession};

/// Shared cancellation switch, checked between pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a completed run did.
#[derive(Debug, Clone, Serialize)]
pub struct ReprocessReport {
    pub document_id: String,
    pub previous_version: i64,
    pub version: i64,
    pub chunks: usize,
    /// Name of the engine that produced the chunks, or `"fallback"`.
    pub derivation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Present only when the fallback chunker ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataReport>,
    pub annotations: AnnotationRecoveryReport,
    pub connections: ConnectionRemapReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepReport>,
}

/// Reprocesses documents held in a [`Store`].
pub struct ReprocessPipeline<'a, S: Store + ?Sized> {
    store: &'a S,
    engine: Option<&'a dyn DerivationEngine>,
    fallback: FallbackChunker,
    thresholds: RecoveryThresholds,
    retention: RetentionPolicy,
    matcher: FuzzyMatcher,
    cancel: CancelFlag,
}

impl<'a, S: Store + ?Sized> ReprocessPipeline<'a, S> {
    /// Pipeline with no derivation engine (fallback chunking only) and
    /// default thresholds and retention.
    pub fn new(store: &'a S, fallback: FallbackChunker) -> Self {
        let thresholds = RecoveryThresholds::default();
        Self {
            store,
            engine: None,
            fallback,
            matcher: FuzzyMatcher::new(&thresholds),
            thresholds,
            retention: RetentionPolicy::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_engine(mut self, engine: &'a dyn DerivationEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_thresholds(mut self, thresholds: RecoveryThresholds) -> Self {
        self.matcher = FuzzyMatcher::new(&thresholds);
        self.thresholds = thresholds;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the document's text and carry its derived index over.
    ///
    /// On error the document is left exactly as it was, except for
    /// `NotFound` and `ConcurrentReprocessing`, which fail before anything
    /// is written.
    pub async fn reprocess(
        &self,
        document_id: &str,
        new_text: &str,
        triggered_by: &str,
    ) -> Result<ReprocessReport> {
        let manager = ChunkVersionManager::new(self.store);
        let mut session = manager.begin(document_id, new_text, triggered_by).await?;

        let mut report = match self.run(&manager, &mut session, new_text).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(
                    document = %document_id,
                    error = %e,
                    "reprocessing failed; rolling back"
                );
                if let Err(rb) = manager.rollback(&mut session).await {
                    tracing::error!(document = %document_id, error = %rb, "rollback failed");
                }
                return Err(e);
            }
        };

        match sweep(self.store, document_id, &self.retention).await {
            Ok(swept) => report.sweep = Some(swept),
            Err(e) => {
                tracing::warn!(document = %document_id, error = %e, "retention sweep failed")
            }
        }
        Ok(report)
    }

    fn checkpoint(&self, session: &ReprocessSession) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ReprocessError::Aborted(session.document_id().to_string()));
        }
        Ok(())
    }

    /// Chunks for `text` from the engine, or from the fallback chunker with
    /// the reason the engine was bypassed.
    async fn derive(
        &self,
        session: &ReprocessSession,
        text: &str,
    ) -> (Vec<Chunk>, String, Option<String>) {
        let to_rows = |derived: Vec<DerivedChunk>| -> Vec<Chunk> {
            derived
                .into_iter()
                .enumerate()
                .map(|(i, d)| {
                    Chunk::from_derived(session.document_id(), session.new_version(), i, d)
                })
                .collect()
        };

        let failure = match self.engine {
            Some(engine) => {
                let derived = engine
                    .derive(text)
                    .await
                    .map_err(|e| format!("{:#}", e))
                    .and_then(|chunks| validate_derived(text, chunks));
                match derived {
                    Ok(chunks) => return (to_rows(chunks), engine.name().to_string(), None),
                    Err(reason) => ReprocessError::DerivationFailure(reason),
                }
            }
            None => ReprocessError::DerivationFailure("no derivation engine configured".into()),
        };
        tracing::warn!(error = %failure, "using fallback chunker");

        (
            to_rows(self.fallback.chunk(text)),
            "fallback".to_string(),
            Some(failure.to_string()),
        )
    }

    async fn run(
        &self,
        manager: &ChunkVersionManager<'_, S>,
        session: &mut ReprocessSession,
        new_text: &str,
    ) -> Result<ReprocessReport> {
        let doc_id = session.document_id().to_string();
        let previous = self
            .store
            .chunks_for_version(&doc_id, session.previous_version())
            .await?;

        let (mut chunks, derivation, fallback_reason) = self.derive(session, new_text).await;
        let metadata = fallback_reason
            .is_some()
            .then(|| recover_metadata(&mut chunks, &previous, &self.thresholds));
        self.checkpoint(session)?;

        let staged = manager.stage(session, chunks).await?;

        let recoverer = AnnotationRecoverer::new(&self.matcher, &self.thresholds);
        let annotations =
            recover_annotations(self.store, session, &recoverer, new_text, &staged).await?;
        self.checkpoint(session)?;

        let remapper = ConnectionRemapper::new(&self.thresholds);
        let connections =
            remap_connections(self.store, session, &remapper, &previous, &staged).await?;
        self.checkpoint(session)?;

        manager.commit(session).await?;

        Ok(ReprocessReport {
            document_id: doc_id,
            previous_version: session.previous_version(),
            version: session.new_version(),
            chunks: staged.len(),
            derivation,
            fallback_reason,
            metadata,
            annotations,
            connections,
            sweep: None,
        })
    }
}
