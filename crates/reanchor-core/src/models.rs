//! Core data models shared by the recovery engine and its stores.
//!
//! Rows are plain data: every mutation goes through a [`Store`](crate::store::Store)
//! so that the in-memory and SQLite backends enforce the same rules.
//!
//! All offsets are **character** offsets (Unicode scalar values) into the
//! text version the row belongs to, matching the external chunker's
//! `start_index`/`end_index` output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Whether a document is free to be reprocessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprocessingStatus {
    Idle,
    Reprocessing,
}

impl ReprocessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reprocessing => "reprocessing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "reprocessing" => Some(Self::Reprocessing),
            _ => None,
        }
    }
}

/// A document whose canonical text is versioned.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub current_version: i64,
    pub status: ReprocessingStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Immutable snapshot of a document's full text. Append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct TextVersion {
    pub document_id: String,
    pub version: i64,
    pub body: String,
    /// Who or what produced this version (`"import"`, `"user-edit"`, …).
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

/// Emotional tone attached to a chunk by the derivation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EmotionalMetadata {
    #[serde(default)]
    pub polarity: f64,
    #[serde(default)]
    pub primary_emotion: String,
    #[serde(default)]
    pub intensity: f64,
}

/// A key concept with its importance inside a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub text: String,
    #[serde(default)]
    pub importance: f64,
}

/// Semantic metadata produced by the derivation engine.
///
/// Field names follow the engine's JSON output so rows can be stored and
/// reloaded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub emotional: Option<EmotionalMetadata>,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Where a chunk's semantic metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    /// Produced by the derivation engine.
    Derived,
    /// Copied from a matching chunk of the previous version.
    Recovered,
    /// Fallback chunk with no metadata yet; awaiting backfill.
    Fallback,
}

impl MetadataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Derived => "derived",
            Self::Recovered => "recovered",
            Self::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "derived" => Some(Self::Derived),
            "recovered" => Some(Self::Recovered),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

/// How a chunk's metadata was carried over from a prior chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProvenance {
    pub source_chunk_id: String,
    pub method: String,
    pub confidence: f64,
}

/// A contiguous span of one text version.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub version: i64,
    pub chunk_index: i64,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub is_current: bool,
    /// Set only while the chunk belongs to an in-flight reprocessing batch.
    pub batch_id: Option<String>,
    pub metadata: Option<ChunkMetadata>,
    pub metadata_source: MetadataSource,
    pub embedding: Option<Vec<f32>>,
    pub provenance: Option<ChunkProvenance>,
    /// SHA-256 of `content`.
    pub hash: String,
}

impl Chunk {
    /// Build an unsaved row from a derived chunk. Metadata source is
    /// `derived` when the engine supplied metadata, `fallback` otherwise.
    pub fn from_derived(
        document_id: &str,
        version: i64,
        index: usize,
        derived: DerivedChunk,
    ) -> Self {
        let metadata_source = if derived.metadata.is_some() {
            MetadataSource::Derived
        } else {
            MetadataSource::Fallback
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            version,
            chunk_index: index as i64,
            hash: content_hash(&derived.content),
            content: derived.content,
            start_offset: derived.start,
            end_offset: derived.end,
            is_current: false,
            batch_id: None,
            metadata: derived.metadata,
            metadata_source,
            embedding: derived.embedding,
            provenance: None,
        }
    }

    /// Whether this chunk's span intersects `[start, end)`.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start_offset < end && start < self.end_offset
    }
}

/// Hex SHA-256 of a text payload.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk as returned by the external derivation engine (or the fallback
/// chunker), before it is assigned an id and a version.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedChunk {
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub metadata: Option<ChunkMetadata>,
    pub embedding: Option<Vec<f32>>,
}

/// Short strings recorded immediately before and after an annotated span.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextContext {
    pub before: String,
    pub after: String,
}

/// Which tier of the fuzzy matcher produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Context,
    ChunkBounded,
    Trigram,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Context => "context",
            Self::ChunkBounded => "chunk_bounded",
            Self::Trigram => "trigram",
        }
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the last recovery attempt for an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecovery {
    pub method: Option<MatchMethod>,
    pub confidence: f64,
    pub needs_review: bool,
    /// Proposed position while the annotation awaits review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_end: Option<usize>,
    /// Text version the attempt ran against.
    pub version: i64,
    /// Where the annotation sat before this attempt moved it. Lets a run
    /// that died mid-flight be undone from the rows alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Anchor>,
}

/// The positional part of an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub quote: String,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(default)]
    pub context: Option<TextContext>,
    #[serde(default)]
    pub chunk_index: Option<usize>,
    #[serde(default)]
    pub chunk_ids: Vec<String>,
}

/// A user-created marker over a span of the current text.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: String,
    pub document_id: String,
    pub quote: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub context: Option<TextContext>,
    /// Index of the chunk (in its version's chunk list) the span started in.
    pub chunk_index: Option<usize>,
    /// Every chunk the span overlaps.
    pub chunk_ids: Vec<String>,
    pub recovery: Option<AnnotationRecovery>,
}

impl Annotation {
    pub fn anchor(&self) -> Anchor {
        Anchor {
            quote: self.quote.clone(),
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            context: self.context.clone(),
            chunk_index: self.chunk_index,
            chunk_ids: self.chunk_ids.clone(),
        }
    }

    pub fn set_anchor(&mut self, anchor: Anchor) {
        self.quote = anchor.quote;
        self.start_offset = anchor.start_offset;
        self.end_offset = anchor.end_offset;
        self.context = anchor.context;
        self.chunk_index = anchor.chunk_index;
        self.chunk_ids = anchor.chunk_ids;
    }
}

/// A relationship between two chunks, possibly in different documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: String,
    pub source_chunk_id: String,
    pub target_chunk_id: String,
    pub connection_type: String,
    pub strength: f64,
    pub user_validated: bool,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

/// A frozen capture of one document version's chunk set.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub document_id: String,
    pub version: i64,
    pub chunk_ids: Vec<String>,
    pub created_at: i64,
}

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Slice `s` by character offsets, clamping to the string's length.
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let byte_at = |idx: usize| s.char_indices().nth(idx).map(|(b, _)| b).unwrap_or(s.len());
    let start_b = byte_at(start);
    let end_b = byte_at(end.max(start));
    &s[start_b..end_b]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_slice_multibyte() {
        let s = "héllo wörld";
        assert_eq!(char_slice(s, 0, 5), "héllo");
        assert_eq!(char_slice(s, 6, 11), "wörld");
        assert_eq!(char_slice(s, 6, 100), "wörld");
        assert_eq!(char_slice(s, 8, 3), "");
    }

    #[test]
    fn test_metadata_roundtrips_engine_json() {
        let raw = r#"{
            "themes": ["memory"],
            "concepts": [{"text": "recall", "importance": 0.8}],
            "importance": 0.7,
            "summary": "On remembering",
            "emotional": {"polarity": 0.2, "primaryEmotion": "curious", "intensity": 0.4},
            "domain": "philosophy"
        }"#;
        let meta: ChunkMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.themes, vec!["memory"]);
        assert_eq!(
            meta.emotional.as_ref().map(|e| e.primary_emotion.as_str()),
            Some("curious")
        );
        let back = serde_json::to_string(&meta).unwrap();
        assert!(back.contains("primaryEmotion"));
    }

    #[test]
    fn test_chunk_overlap_is_half_open() {
        let chunk = Chunk {
            id: "c".into(),
            document_id: "d".into(),
            version: 1,
            chunk_index: 0,
            content: String::new(),
            start_offset: 10,
            end_offset: 20,
            is_current: true,
            batch_id: None,
            metadata: None,
            metadata_source: MetadataSource::Fallback,
            embedding: None,
            provenance: None,
            hash: String::new(),
        };
        assert!(chunk.overlaps(19, 25));
        assert!(!chunk.overlaps(20, 25));
        assert!(!chunk.overlaps(0, 10));
    }
}
