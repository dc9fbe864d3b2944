//! Fixtures shared by the unit tests.

use chrono::Utc;

use crate::annotations::new_annotation;
use crate::models::{
    char_slice, Annotation, Chunk, DerivedChunk, Document, ReprocessingStatus, TextVersion,
};
use crate::store::memory::{InMemoryStore, MemoryDump};
use crate::store::Store;

/// Create document `id` at version 1 with the given chunks, all current.
pub(crate) async fn seed_with(
    store: &InMemoryStore,
    id: &str,
    text: &str,
    derived: Vec<DerivedChunk>,
) -> Vec<Chunk> {
    store
        .insert_document(&Document {
            id: id.to_string(),
            current_version: 1,
            status: ReprocessingStatus::Idle,
            created_at: 0,
            updated_at: 0,
        })
        .await
        .unwrap();
    store
        .append_text_version(&TextVersion {
            document_id: id.to_string(),
            version: 1,
            body: text.to_string(),
            triggered_by: "import".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    let chunks: Vec<Chunk> = derived
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let mut c = Chunk::from_derived(id, 1, i, d);
            c.is_current = true;
            c
        })
        .collect();
    store.insert_chunks(&chunks).await.unwrap();
    chunks
}

/// [`seed_with`] over bare chunks cut at `spans` (char offsets).
pub(crate) async fn seed_document(
    store: &InMemoryStore,
    id: &str,
    text: &str,
    spans: &[(usize, usize)],
) -> Vec<Chunk> {
    let derived = spans
        .iter()
        .map(|&(start, end)| DerivedChunk {
            content: char_slice(text, start, end).to_string(),
            start,
            end,
            metadata: None,
            embedding: None,
        })
        .collect();
    seed_with(store, id, text, derived).await
}

/// Annotate `[start, end)` of the document's current text under a fixed id.
pub(crate) async fn seed_annotation(
    store: &InMemoryStore,
    document_id: &str,
    id: &str,
    quote: &str,
    start: usize,
    end: usize,
) -> Annotation {
    let text = store.current_text(document_id).await.unwrap().unwrap().body;
    let chunks = store.current_chunks(document_id).await.unwrap();
    let mut a = new_annotation(document_id, &text, &chunks, start, end).unwrap();
    assert_eq!(a.quote, quote, "fixture span does not cover the quote");
    a.id = id.to_string();
    store.insert_annotation(&a).await.unwrap();
    a
}

/// Every row in the store, with document timestamps zeroed so that dumps
/// taken before and after a rolled-back run compare equal.
pub(crate) fn rows(store: &InMemoryStore) -> MemoryDump {
    let mut dump = store.dump().unwrap();
    for d in &mut dump.documents {
        d.updated_at = 0;
    }
    dump
}
