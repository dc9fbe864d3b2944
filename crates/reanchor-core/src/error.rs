//! Error taxonomy for the reprocessing pipeline.
//!
//! Per-item failures (a single annotation or connection that cannot be
//! re-anchored) never surface here: they are counted in the recovery
//! reports. Only run-level failures become a [`ReprocessError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReprocessError {
    /// The document or one of its text versions does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The chunk/metadata derivation engine failed. The pipeline absorbs
    /// this by switching to the fallback chunker.
    #[error("chunk derivation failed: {0}")]
    DerivationFailure(String),

    /// A single item could not be matched. Reported, never propagated by
    /// the orchestrators.
    #[error("no match for {item}: {reason}")]
    MatchFailure { item: String, reason: String },

    /// Persisting the final swap failed; the run was rolled back.
    #[error("commit failed for document {document_id}: {source}")]
    CommitFailure {
        document_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Another run already holds the document.
    #[error("document {0} is already being reprocessed")]
    ConcurrentReprocessing(String),

    /// Recovery was asked to clean up a run that started too recently to be
    /// considered abandoned.
    #[error("run on document {document_id} started {age_secs}s ago and may still be live")]
    RunStillActive { document_id: String, age_secs: i64 },

    /// The run was cancelled before commit and has been rolled back.
    #[error("reprocessing of document {0} was aborted")]
    Aborted(String),

    /// The version state machine was driven through an illegal move.
    #[error("invalid transition: cannot {action} a session in state {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ReprocessError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CommitFailure { .. }
                | Self::Aborted(_)
                | Self::RunStillActive { .. }
                | Self::Store(_)
        )
    }
}

pub type Result<T, E = ReprocessError> = std::result::Result<T, E>;
