//! External chunk/metadata derivation over a subprocess.
//!
//! The configured command receives one JSON object on stdin:
//!
//! ```json
//! {"markdown": "<full text>", "config": {"chunker_type": "recursive", ...}}
//! ```
//!
//! and must write a JSON array to stdout:
//!
//! ```json
//! [{"text": "...", "start_index": 0, "end_index": 42,
//!   "metadata": {"themes": ["..."], "importance": 0.7}, "embedding": [0.1, ...]}]
//! ```
//!
//! `start_index`/`end_index` are character offsets into the input text.
//! `metadata` and `embedding` are optional per chunk. A non-zero exit,
//! unparseable output or a timeout fails the derivation, and the pipeline
//! switches to the fallback chunker.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use reanchor_core::derive::DerivationEngine;
use reanchor_core::models::{ChunkMetadata, DerivedChunk};

use crate::config::DerivationConfig;

#[derive(Serialize)]
struct Request<'a> {
    markdown: &'a str,
    config: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ScriptChunk {
    text: String,
    start_index: usize,
    end_index: usize,
    #[serde(default)]
    metadata: Option<ChunkMetadata>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

impl From<ScriptChunk> for DerivedChunk {
    fn from(c: ScriptChunk) -> Self {
        DerivedChunk {
            content: c.text,
            start: c.start_index,
            end: c.end_index,
            metadata: c.metadata,
            embedding: c.embedding,
        }
    }
}

/// Runs `derivation.command` once per text.
pub struct ScriptDerivationEngine {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    request_config: serde_json::Value,
}

impl ScriptDerivationEngine {
    pub fn new(config: &DerivationConfig) -> Result<Self> {
        let mut request_config = serde_json::to_value(&config.options)
            .context("derivation.options is not representable as JSON")?;
        if let Some(obj) = request_config.as_object_mut() {
            obj.insert(
                "chunker_type".to_string(),
                serde_json::Value::String(config.chunker_type.clone()),
            );
        }
        Ok(Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            request_config,
        })
    }

    async fn run(&self, text: &str) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(&Request {
            markdown: text,
            config: self.request_config.clone(),
        })?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.command))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("child stdin unavailable"))?;
        // A command that exits without reading its input is judged by its
        // exit status below, not by the broken pipe.
        if let Err(e) = stdin.write_all(&payload).await {
            tracing::debug!(command = %self.command, error = %e, "stdin closed early");
        }
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            );
        }
        Ok(output.stdout)
    }
}

/// Decode the command's stdout.
fn parse_output(stdout: &[u8]) -> Result<Vec<DerivedChunk>> {
    let chunks: Vec<ScriptChunk> =
        serde_json::from_slice(stdout).context("derivation output is not a JSON chunk array")?;
    Ok(chunks.into_iter().map(DerivedChunk::from).collect())
}

#[async_trait]
impl DerivationEngine for ScriptDerivationEngine {
    fn name(&self) -> &str {
        &self.command
    }

    async fn derive(&self, text: &str) -> Result<Vec<DerivedChunk>> {
        let stdout = timeout(self.timeout, self.run(text))
            .await
            .map_err(|_| anyhow!("derivation timed out after {}s", self.timeout.as_secs()))??;
        let chunks = parse_output(&stdout)?;
        tracing::debug!(command = %self.command, chunks = chunks.len(), "derivation finished");
        Ok(chunks)
    }
}
