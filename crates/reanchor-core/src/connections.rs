//! Re-anchor user-validated connections onto a new chunk set.
//!
//! Each endpoint of a connection is tagged [`EndpointOwnership::Owned`] when
//! its chunk belongs to the version being replaced, and
//! [`EndpointOwnership::Foreign`] otherwise (typically a chunk of another,
//! untouched document). Foreign endpoints pass through unchanged with
//! similarity `1.0`, unless their chunk is no longer current: such a row is
//! left over from an earlier run and its foreign side counts as lost.
//! Owned endpoints move to the new chunk whose embedding is
//! closest to the old chunk's stored embedding.
//!
//! The connection is classified by the weaker of its two endpoints:
//!
//! | Similarity | Outcome |
//! |------------|---------|
//! | ≥ auto floor (0.95) | new connection row inserted with provenance |
//! | ≥ review floor (0.85) | reported with suggested chunk ids, nothing written |
//! | below | lost |
//!
//! Connections that were never user-validated are skipped; detection
//! regenerates them against the committed chunks. The old row of an
//! auto-remapped connection is handed to the session and deleted when the
//! run commits. Rows in the other two buckets stay where they are until
//! retention removes their chunks.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::embedding::most_similar;
use crate::error::Result;
use crate::models::{Chunk, Connection};
use crate::store::Store;
use crate::thresholds::RecoveryThresholds;
use crate::version::ReprocessSession;

/// Whether an endpoint belongs to the document being reprocessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointOwnership {
    Owned,
    Foreign,
}

/// Where one endpoint ends up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointMapping {
    pub ownership: EndpointOwnership,
    pub old_chunk_id: String,
    /// `None` when no candidate could be scored.
    pub new_chunk_id: Option<String>,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapStatus {
    AutoRemapped,
    NeedsReview,
    Lost,
}

impl RemapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoRemapped => "auto_remapped",
            Self::NeedsReview => "needs_review",
            Self::Lost => "lost",
        }
    }
}

/// Per-connection line of the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionOutcome {
    pub connection_id: String,
    pub status: RemapStatus,
    pub source: EndpointMapping,
    pub target: EndpointMapping,
    /// Id of the inserted row, for auto-remapped connections.
    pub new_connection_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionRemapReport {
    /// Validated connections considered.
    pub total: usize,
    pub auto_remapped: usize,
    pub needs_review: usize,
    pub lost: usize,
    /// Unvalidated connections left for detection to regenerate.
    pub skipped: usize,
    pub items: Vec<ConnectionOutcome>,
}

impl ConnectionRemapReport {
    fn push(&mut self, outcome: ConnectionOutcome) {
        self.total += 1;
        match outcome.status {
            RemapStatus::AutoRemapped => self.auto_remapped += 1,
            RemapStatus::NeedsReview => self.needs_review += 1,
            RemapStatus::Lost => self.lost += 1,
        }
        self.items.push(outcome);
    }
}

/// Plans connection remaps from one chunk set to the next.
pub struct ConnectionRemapper<'a> {
    thresholds: &'a RecoveryThresholds,
}

impl<'a> ConnectionRemapper<'a> {
    pub fn new(thresholds: &'a RecoveryThresholds) -> Self {
        Self { thresholds }
    }

    fn map_endpoint(
        &self,
        chunk_id: &str,
        previous: &HashMap<&str, &Chunk>,
        new_chunks: &[Chunk],
        stale: &HashSet<String>,
    ) -> EndpointMapping {
        let Some(old) = previous.get(chunk_id) else {
            let live = !stale.contains(chunk_id);
            return EndpointMapping {
                ownership: EndpointOwnership::Foreign,
                old_chunk_id: chunk_id.to_string(),
                new_chunk_id: live.then(|| chunk_id.to_string()),
                similarity: if live { 1.0 } else { 0.0 },
            };
        };
        let best = old.embedding.as_deref().and_then(|query| {
            most_similar(query, new_chunks.iter().map(|c| c.embedding.as_deref()))
        });
        EndpointMapping {
            ownership: EndpointOwnership::Owned,
            old_chunk_id: chunk_id.to_string(),
            new_chunk_id: best.map(|(i, _)| new_chunks[i].id.clone()),
            similarity: best.map_or(0.0, |(_, sim)| sim.max(0.0)),
        }
    }

    /// Classify each connection and build the replacement row for those
    /// that clear the auto floor. Unvalidated connections are not planned.
    ///
    /// `stale` holds foreign chunk ids that are no longer current (or no
    /// longer exist); endpoints on them are lost.
    pub fn plan(
        &self,
        connections: &[Connection],
        previous_chunks: &[Chunk],
        new_chunks: &[Chunk],
        stale: &HashSet<String>,
    ) -> Vec<(ConnectionOutcome, Option<Connection>)> {
        let previous: HashMap<&str, &Chunk> =
            previous_chunks.iter().map(|c| (c.id.as_str(), c)).collect();

        connections
            .iter()
            .filter(|c| c.user_validated)
            .map(|conn| {
                let source =
                    self.map_endpoint(&conn.source_chunk_id, &previous, new_chunks, stale);
                let target =
                    self.map_endpoint(&conn.target_chunk_id, &previous, new_chunks, stale);
                let weakest = source.similarity.min(target.similarity);
                let both_placed = source.new_chunk_id.is_some() && target.new_chunk_id.is_some();

                let status = if both_placed && weakest >= self.thresholds.connection_auto_floor {
                    RemapStatus::AutoRemapped
                } else if both_placed && weakest >= self.thresholds.connection_review_floor {
                    RemapStatus::NeedsReview
                } else {
                    RemapStatus::Lost
                };

                let row = (status == RemapStatus::AutoRemapped)
                    .then(|| remapped_row(conn, &source, &target));
                let outcome = ConnectionOutcome {
                    connection_id: conn.id.clone(),
                    status,
                    source,
                    target,
                    new_connection_id: row.as_ref().map(|r| r.id.clone()),
                };
                (outcome, row)
            })
            .collect()
    }
}

/// Copy of `conn` pointing at the new endpoints, with provenance merged
/// into its metadata.
fn remapped_row(
    conn: &Connection,
    source: &EndpointMapping,
    target: &EndpointMapping,
) -> Connection {
    let mut meta = match &conn.metadata {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            m.insert("original".to_string(), other.clone());
            m
        }
    };
    meta.insert(
        "remapped_from".to_string(),
        json!({
            "connection_id": conn.id,
            "source_chunk_id": source.old_chunk_id,
            "target_chunk_id": target.old_chunk_id,
        }),
    );
    meta.insert("source_similarity".to_string(), json!(source.similarity));
    meta.insert("target_similarity".to_string(), json!(target.similarity));
    meta.insert(
        "remapped_at".to_string(),
        json!(chrono::Utc::now().to_rfc3339()),
    );

    Connection {
        id: uuid::Uuid::new_v4().to_string(),
        source_chunk_id: source.new_chunk_id.clone().unwrap_or_default(),
        target_chunk_id: target.new_chunk_id.clone().unwrap_or_default(),
        connection_type: conn.connection_type.clone(),
        strength: conn.strength,
        user_validated: conn.user_validated,
        metadata: Value::Object(meta),
        created_at: chrono::Utc::now().timestamp(),
    }
}

/// Id of the connection `conn` was remapped from, if any.
pub fn remapped_from(conn: &Connection) -> Option<&str> {
    conn.metadata
        .get("remapped_from")
        .and_then(|m| m.get("connection_id"))
        .and_then(Value::as_str)
}

/// Foreign endpoints of `connections` whose chunk is gone or no longer
/// current.
async fn stale_foreign_chunks<S: Store + ?Sized>(
    store: &S,
    connections: &[Connection],
    previous_chunks: &[Chunk],
) -> Result<HashSet<String>> {
    let owned: HashSet<&str> = previous_chunks.iter().map(|c| c.id.as_str()).collect();
    let foreign: HashSet<&str> = connections
        .iter()
        .flat_map(|c| [c.source_chunk_id.as_str(), c.target_chunk_id.as_str()])
        .filter(|id| !owned.contains(id))
        .collect();

    let mut stale = HashSet::new();
    for id in foreign {
        let live = store.get_chunk(id).await?.is_some_and(|c| c.is_current);
        if !live {
            stale.insert(id.to_string());
        }
    }
    Ok(stale)
}

/// Remap every connection touching the previous chunk set onto the staged
/// chunks and insert the auto-remapped rows. The rows they replace are
/// retired through the session.
pub async fn remap_connections<S: Store + ?Sized>(
    store: &S,
    session: &mut ReprocessSession,
    remapper: &ConnectionRemapper<'_>,
    previous_chunks: &[Chunk],
    new_chunks: &[Chunk],
) -> Result<ConnectionRemapReport> {
    let old_ids: Vec<String> = previous_chunks.iter().map(|c| c.id.clone()).collect();
    let mut connections = store.connections_for_chunks(&old_ids).await?;
    // A connection between two chunks of the document arrives once per side.
    let mut seen = HashSet::new();
    connections.retain(|c| seen.insert(c.id.clone()));

    let mut report = ConnectionRemapReport {
        skipped: connections.iter().filter(|c| !c.user_validated).count(),
        ..Default::default()
    };
    let stale = stale_foreign_chunks(store, &connections, previous_chunks).await?;
    let planned = remapper.plan(&connections, previous_chunks, new_chunks, &stale);
    for (outcome, row) in planned {
        if let Some(row) = row {
            store.insert_connection(&row).await?;
            if let Some(old) = connections.iter().find(|c| c.id == outcome.connection_id) {
                session.retire_connection(old);
            }
        }
        report.push(outcome);
    }

    tracing::info!(
        document = %session.document_id(),
        total = report.total,
        auto_remapped = report.auto_remapped,
        needs_review = report.needs_review,
        lost = report.lost,
        skipped = report.skipped,
        "connections remapped"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DerivedChunk;

    fn chunk(doc: &str, version: i64, emb: Option<Vec<f32>>) -> Chunk {
        Chunk::from_derived(
            doc,
            version,
            0,
            DerivedChunk {
                content: "x".into(),
                start: 0,
                end: 1,
                metadata: None,
                embedding: emb,
            },
        )
    }

    fn connection(source: &str, target: &str, validated: bool) -> Connection {
        Connection {
            id: uuid::Uuid::new_v4().to_string(),
            source_chunk_id: source.to_string(),
            target_chunk_id: target.to_string(),
            connection_type: "thematic".into(),
            strength: 0.8,
            user_validated: validated,
            metadata: json!({"note": "kept"}),
            created_at: 0,
        }
    }

    /// Unit vector at cosine `sim` from `[1, 0]`.
    fn at(sim: f32) -> Vec<f32> {
        vec![sim, (1.0 - sim * sim).sqrt()]
    }

    #[test]
    fn test_cross_document_only_owned_side_moves() {
        let th = RecoveryThresholds::default();
        let old_a = chunk("x", 1, Some(vec![1.0, 0.0]));
        let foreign_b = chunk("y", 1, Some(vec![0.0, 1.0]));
        let new_chunks = vec![chunk("x", 2, Some(at(0.97))), chunk("x", 2, Some(at(0.2)))];
        let conn = connection(&old_a.id, &foreign_b.id, true);

        let planned = ConnectionRemapper::new(&th).plan(
            &[conn.clone()],
            &[old_a.clone()],
            &new_chunks,
            &HashSet::new(),
        );
        let (outcome, row) = &planned[0];

        assert_eq!(outcome.status, RemapStatus::AutoRemapped);
        assert_eq!(outcome.source.ownership, EndpointOwnership::Owned);
        assert!((outcome.source.similarity - 0.97).abs() < 1e-4);
        assert_eq!(outcome.target.ownership, EndpointOwnership::Foreign);
        assert_eq!(outcome.target.similarity, 1.0);

        let row = row.as_ref().unwrap();
        assert_eq!(row.source_chunk_id, new_chunks[0].id);
        assert_eq!(row.target_chunk_id, foreign_b.id);
        assert_eq!(row.connection_type, conn.connection_type);
        assert_eq!(row.metadata["note"], "kept");
        assert_eq!(row.metadata["remapped_from"]["source_chunk_id"], json!(old_a.id));
        assert_eq!(row.metadata["target_similarity"], json!(1.0));
    }

    #[test]
    fn test_review_and_lost_buckets() {
        let th = RecoveryThresholds::default();
        let old_a = chunk("x", 1, Some(vec![1.0, 0.0]));
        let other = chunk("y", 1, None);
        let conn = connection(&old_a.id, &other.id, true);
        let remapper = ConnectionRemapper::new(&th);

        let review = remapper.plan(
            &[conn.clone()],
            &[old_a.clone()],
            &[chunk("x", 2, Some(at(0.9)))],
            &HashSet::new(),
        );
        assert_eq!(review[0].0.status, RemapStatus::NeedsReview);
        assert!(review[0].1.is_none());
        assert!(review[0].0.source.new_chunk_id.is_some());

        let lost = remapper.plan(
            &[conn.clone()],
            &[old_a.clone()],
            &[chunk("x", 2, Some(at(0.5)))],
            &HashSet::new(),
        );
        assert_eq!(lost[0].0.status, RemapStatus::Lost);

        let bare = remapper.plan(&[conn], &[old_a], &[chunk("x", 2, None)], &HashSet::new());
        assert_eq!(bare[0].0.status, RemapStatus::Lost);
        assert_eq!(bare[0].0.source.similarity, 0.0);
    }

    #[test]
    fn test_owned_endpoint_without_embedding_is_lost() {
        let th = RecoveryThresholds::default();
        let old_a = chunk("x", 1, None);
        let conn = connection(&old_a.id, "elsewhere", true);
        let planned = ConnectionRemapper::new(&th).plan(
            &[conn],
            &[old_a],
            &[chunk("x", 2, Some(at(1.0)))],
            &HashSet::new(),
        );
        assert_eq!(planned[0].0.status, RemapStatus::Lost);
    }

    #[test]
    fn test_unvalidated_connections_not_planned() {
        let th = RecoveryThresholds::default();
        let old_a = chunk("x", 1, Some(vec![1.0, 0.0]));
        let conn = connection(&old_a.id, "elsewhere", false);
        let planned = ConnectionRemapper::new(&th).plan(
            &[conn],
            &[old_a],
            &[chunk("x", 2, Some(at(1.0)))],
            &HashSet::new(),
        );
        assert!(planned.is_empty());
    }

    #[test]
    fn test_superseded_foreign_endpoint_is_lost() {
        let th = RecoveryThresholds::default();
        let old_b = chunk("y", 1, Some(vec![1.0, 0.0]));
        let superseded_a = chunk("x", 1, Some(vec![0.0, 1.0]));
        let conn = connection(&superseded_a.id, &old_b.id, true);
        let stale: HashSet<String> = [superseded_a.id.clone()].into_iter().collect();

        let planned = ConnectionRemapper::new(&th).plan(
            &[conn],
            &[old_b],
            &[chunk("y", 2, Some(at(1.0)))],
            &stale,
        );
        let (outcome, row) = &planned[0];
        assert_eq!(outcome.status, RemapStatus::Lost);
        assert_eq!(outcome.source.ownership, EndpointOwnership::Foreign);
        assert_eq!(outcome.source.new_chunk_id, None);
        assert_eq!(outcome.target.similarity, 1.0);
        assert!(row.is_none());
    }
}
