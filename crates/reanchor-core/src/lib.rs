//! # Reanchor Core
//!
//! Reprocessing and recovery for documents whose text changes after
//! downstream state has been built on it. Derived chunks carry metadata and
//! embeddings; user annotations and chunk-to-chunk connections hang off
//! them by character offset and chunk id.
//!
//! A run ([`pipeline::ReprocessPipeline::reprocess`]) re-derives chunks for
//! the new text, re-anchors annotations with the tiered
//! [`fuzzy::FuzzyMatcher`], remaps connections by embedding similarity and
//! swaps the new chunk set in atomically through
//! [`version::ChunkVersionManager`]. A failed run leaves the document
//! exactly as it was.
//!
//! Persistence goes through the async [`store::Store`] trait. This crate
//! ships an in-memory implementation; the `reanchor` application crate
//! provides SQLite.

pub mod annotations;
pub mod connections;
pub mod derive;
pub mod embedding;
pub mod error;
pub mod fuzzy;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod retention;
pub mod store;
pub mod thresholds;
pub mod version;

#[cfg(test)]
mod testing;
