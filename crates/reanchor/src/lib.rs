//! # Reanchor
//!
//! **Reprocess edited documents without losing the work built on them.**
//!
//! This crate is the SQLite-backed application around
//! [`reanchor_core`]: configuration, schema, the [`Store`](reanchor_core::store::Store)
//! implementation, the external derivation command, and the `reanchor` CLI.
//!
//! ## Data Flow
//!
//! ```text
//! import ──► text v1 + chunks v1
//!                 │
//!   annotate / connect / snapshot
//!                 │
//! reprocess ──► text v2 ──► derive (script | fallback)
//!                              │
//!              annotations re-anchored, connections remapped
//!                              │
//!                    commit (or roll back) ──► sweep
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema creation |
//! | [`sqlite_store`] | `Store` over SQLite |
//! | [`derivation`] | Chunk/metadata derivation over a subprocess |
//! | [`documents`] | `import` and `snapshot` |
//! | [`annotate`] | `annotate` and `annotations` |
//! | [`connect`] | `connect` |
//! | [`reprocess`] | `reprocess` and `recover` |
//! | [`sweep`] | `sweep` |
//! | [`logging`] | `tracing` subscriber setup |

pub mod annotate;
pub mod config;
pub mod connect;
pub mod db;
pub mod derivation;
pub mod documents;
pub mod logging;
pub mod migrate;
pub mod reprocess;
pub mod sqlite_store;
pub mod sweep;

pub use reanchor_core::store;
