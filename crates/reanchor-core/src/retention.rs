//! Mark-and-sweep removal of superseded versions.
//!
//! The protected set of a document is its current version, the most recent
//! `keep_versions` versions up to the current one, and every version a
//! snapshot refers to. The set is computed in full before anything is
//! deleted; only then are chunk rows, the connections touching them, and
//! text versions outside the set removed.
//!
//! Documents with a run in flight are never swept.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ReprocessError, Result};
use crate::models::{ReprocessingStatus, Snapshot};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Most recent versions kept, counting the current one.
    pub keep_versions: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { keep_versions: 3 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub document_id: String,
    pub protected: Vec<i64>,
    pub removed_versions: Vec<i64>,
    pub removed_chunks: usize,
    pub removed_connections: u64,
    /// Set when the document was mid-run and left alone.
    pub skipped: bool,
}

/// Versions that must survive a sweep.
pub fn protected_versions(
    current: i64,
    versions: &[i64],
    snapshots: &[Snapshot],
    policy: &RetentionPolicy,
) -> BTreeSet<i64> {
    let mut keep: BTreeSet<i64> = versions
        .iter()
        .copied()
        .filter(|v| *v <= current)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .rev()
        .take(policy.keep_versions.max(1))
        .collect();
    keep.insert(current);
    keep.extend(snapshots.iter().map(|s| s.version));
    // Anything newer than current belongs to a run that has not committed.
    keep.extend(versions.iter().copied().filter(|v| *v > current));
    keep
}

/// Sweep one document.
pub async fn sweep<S: Store + ?Sized>(
    store: &S,
    document_id: &str,
    policy: &RetentionPolicy,
) -> Result<SweepReport> {
    let doc = store
        .get_document(document_id)
        .await?
        .ok_or_else(|| ReprocessError::NotFound(format!("document {}", document_id)))?;

    let mut report = SweepReport {
        document_id: document_id.to_string(),
        ..Default::default()
    };
    if doc.status == ReprocessingStatus::Reprocessing {
        report.skipped = true;
        return Ok(report);
    }

    // Mark.
    let versions = store.list_text_versions(document_id).await?;
    let snapshots = store.list_snapshots(document_id).await?;
    let protected = protected_versions(doc.current_version, &versions, &snapshots, policy);
    let doomed: Vec<i64> = versions
        .iter()
        .copied()
        .filter(|v| !protected.contains(v))
        .collect();

    // Sweep.
    for &version in &doomed {
        let removed = store.delete_version_chunks(document_id, version).await?;
        if !removed.is_empty() {
            report.removed_connections += store.delete_connections_for_chunks(&removed).await?;
        }
        report.removed_chunks += removed.len();
        store.delete_text_version(document_id, version).await?;
    }

    report.protected = protected.into_iter().collect();
    report.removed_versions = doomed;
    tracing::info!(
        document = %document_id,
        removed_versions = report.removed_versions.len(),
        removed_chunks = report.removed_chunks,
        "retention sweep finished"
    );
    Ok(report)
}
