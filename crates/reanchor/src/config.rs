//! Configuration parsing and validation.
//!
//! Reanchor is configured through a TOML file (default
//! `./config/reanchor.toml`). Only `[db]` is required; every other table
//! falls back to defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/reanchor.sqlite"
//!
//! [chunking]
//! max_tokens = 700
//!
//! [derivation]
//! command = "python3"
//! args = ["worker/scripts/chonkie_chunk.py"]
//! timeout_secs = 120
//! chunker_type = "recursive"
//!
//! [recovery]
//! annotation_recover_floor = 0.85
//!
//! [retention]
//! keep_versions = 3
//! ```
//!
//! Without a `[derivation]` table every run uses the offsets-only fallback
//! chunker, followed by metadata recovery from the previous version.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use reanchor_core::retention::RetentionPolicy;
use reanchor_core::thresholds::RecoveryThresholds;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub derivation: Option<DerivationConfig>,
    #[serde(default)]
    pub recovery: RecoveryThresholds,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Settings for the fallback chunker.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

/// External chunk/metadata derivation command.
#[derive(Debug, Deserialize, Clone)]
pub struct DerivationConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_chunker_type")]
    pub chunker_type: String,
    /// Extra keys forwarded verbatim in the request's `config` object.
    #[serde(default)]
    pub options: toml::Table,
}

/// Derivation timeout when `[derivation]` sets none.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_chunker_type() -> String {
    "recursive".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if let Some(derivation) = &config.derivation {
        if derivation.command.trim().is_empty() {
            bail!("derivation.command must not be empty");
        }
        if derivation.timeout_secs == 0 {
            bail!("derivation.timeout_secs must be > 0");
        }
    }

    if let Err(msg) = config.recovery.validate() {
        bail!(msg);
    }

    if config.retention.keep_versions < 1 {
        bail!("retention.keep_versions must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"x.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.max_tokens, 700);
        assert!(cfg.derivation.is_none());
        assert_eq!(cfg.recovery, RecoveryThresholds::default());
        assert_eq!(cfg.retention.keep_versions, 3);
    }

    #[test]
    fn test_partial_recovery_table() {
        let cfg = parse(
            r#"
[db]
path = "x.sqlite"

[recovery]
annotation_recover_floor = 0.9
"#,
        )
        .unwrap();
        assert_eq!(cfg.recovery.annotation_recover_floor, 0.9);
        assert_eq!(cfg.recovery.annotation_review_floor, 0.75);
    }

    #[test]
    fn test_derivation_table() {
        let cfg = parse(
            r#"
[db]
path = "x.sqlite"

[derivation]
command = "python3"
args = ["chunk.py"]

[derivation.options]
chunk_size = 512
"#,
        )
        .unwrap();
        let d = cfg.derivation.unwrap();
        assert_eq!(d.timeout_secs, 120);
        assert_eq!(d.chunker_type, "recursive");
        assert_eq!(d.options.get("chunk_size").and_then(|v| v.as_integer()), Some(512));
    }

    #[test]
    fn test_rejects_inverted_floors() {
        let err = parse(
            r#"
[db]
path = "x.sqlite"

[recovery]
connection_auto_floor = 0.8
connection_review_floor = 0.9
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("connection_review_floor"));
    }

    #[test]
    fn test_rejects_zero_keep_versions() {
        let err = parse("[db]\npath = \"x\"\n[retention]\nkeep_versions = 0\n").unwrap_err();
        assert!(err.to_string().contains("keep_versions"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = parse("[db]\npath = \"x\"\n[derivation]\ncommand = \"x\"\ntimeout_secs = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }
}
