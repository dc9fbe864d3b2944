//! Annotation creation and listing.
//!
//! Offsets on the command line are character offsets into the document's
//! current text, end exclusive.

use anyhow::{anyhow, bail, Result};

use reanchor_core::annotations::new_annotation;
use reanchor_core::models::Annotation;
use reanchor_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Annotate `[start, end)` of the current text of `document_id`.
pub async fn create_annotation(
    config: &Config,
    document_id: &str,
    start: usize,
    end: usize,
) -> Result<Annotation> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let Some(text) = store.current_text(document_id).await? else {
        bail!("document not found: {}", document_id);
    };
    let chunks = store.current_chunks(document_id).await?;
    let annotation =
        new_annotation(document_id, &text.body, &chunks, start, end).map_err(|e| anyhow!(e))?;
    store.insert_annotation(&annotation).await?;
    pool.close().await;
    Ok(annotation)
}

/// CLI entry point for `reanchor annotate`.
pub async fn run_annotate(
    config: &Config,
    document_id: &str,
    start: usize,
    end: usize,
) -> Result<()> {
    let a = create_annotation(config, document_id, start, end).await?;
    println!("annotation {}", a.id);
    println!("  quote:  {:?}", a.quote);
    println!("  span:   {}..{}", a.start_offset, a.end_offset);
    if let Some(index) = a.chunk_index {
        println!("  chunk:  {}", index);
    }
    Ok(())
}

/// Short label for an annotation's last recovery outcome.
pub fn recovery_label(a: &Annotation) -> String {
    match &a.recovery {
        None => "original".to_string(),
        Some(r) if r.needs_review => match (r.suggested_start, r.suggested_end) {
            (Some(s), Some(e)) => format!(
                "needs_review ({:.2}, suggested {}..{})",
                r.confidence, s, e
            ),
            _ => format!("needs_review ({:.2})", r.confidence),
        },
        Some(r) => match r.method {
            Some(method) => format!("recovered v{} ({} {:.2})", r.version, method, r.confidence),
            None => format!("lost at v{}", r.version),
        },
    }
}

/// CLI entry point for `reanchor annotations <doc-id>`.
pub async fn run_list(config: &Config, document_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    if store.get_document(document_id).await?.is_none() {
        bail!("document not found: {}", document_id);
    }
    let annotations = store.list_annotations(document_id).await?;
    pool.close().await;

    println!("--- Annotations ({}) ---", annotations.len());
    for a in &annotations {
        println!(
            "{}  {}..{}  {}  {:?}",
            a.id,
            a.start_offset,
            a.end_offset,
            recovery_label(a),
            a.quote
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reanchor_core::models::{AnnotationRecovery, MatchMethod};

    fn annotation(recovery: Option<AnnotationRecovery>) -> Annotation {
        Annotation {
            id: "a".into(),
            document_id: "d".into(),
            quote: "q".into(),
            start_offset: 0,
            end_offset: 1,
            context: None,
            chunk_index: None,
            chunk_ids: Vec::new(),
            recovery,
        }
    }

    fn recovery(method: Option<MatchMethod>, confidence: f64, review: bool) -> AnnotationRecovery {
        AnnotationRecovery {
            method,
            confidence,
            needs_review: review,
            suggested_start: review.then_some(4),
            suggested_end: review.then_some(9),
            version: 2,
            previous: None,
        }
    }

    #[test]
    fn test_recovery_labels() {
        assert_eq!(recovery_label(&annotation(None)), "original");
        assert_eq!(
            recovery_label(&annotation(Some(recovery(Some(MatchMethod::Exact), 1.0, false)))),
            "recovered v2 (exact 1.00)"
        );
        assert_eq!(
            recovery_label(&annotation(Some(recovery(Some(MatchMethod::Trigram), 0.8, true)))),
            "needs_review (0.80, suggested 4..9)"
        );
        assert_eq!(
            recovery_label(&annotation(Some(recovery(None, 0.0, false)))),
            "lost at v2"
        );
    }
}
