use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::metric::VectorMetric;

/// Controls how documents are split into chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Token budget per chunk. Must be > 0.
    pub max_tokens: usize,
    /// Trailing tokens duplicated at the head of the next chunk.
    /// Must be < `max_tokens`.
    pub overlap_tokens: usize,
    /// Track brace/paren/bracket nesting and suppress cuts inside a block
    /// (up to a 1.2× budget ceiling).
    pub structure_aware: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 64,
            structure_aware: true,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(CoreError::config("max_tokens must be > 0"));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(CoreError::config(format!(
                "overlap_tokens ({}) must be < max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Concurrency and batching knobs for the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker tasks draining the chunk channel. Minimum 1.
    pub max_workers: usize,
    /// Chunks accumulated per worker before one embed call. Minimum 1.
    pub batch_size: usize,
    /// Attempts per batch for transient embed/store failures.
    pub max_retries: u32,
    /// Base backoff between retries, doubled per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            batch_size: 16,
            max_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(CoreError::config("max_workers must be >= 1"));
        }
        if self.batch_size == 0 {
            return Err(CoreError::config("batch_size must be >= 1"));
        }
        Ok(())
    }
}

/// Persistent store settings, fixed per store instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Embedding dimension D. Every persisted vector must match.
    pub dimension: usize,
    /// Distance metric recorded in schema metadata; inserts and queries agree.
    pub metric: VectorMetric,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimension: 256,
            metric: VectorMetric::L2,
        }
    }
}

/// Embedding backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// HuggingFace model repo ID used by Model2Vec-RS, or "hash" for the
    /// deterministic offline backend.
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "minishlab/potion-retrieval-32M".to_string(),
        }
    }
}

/// Retrieval defaults when a request leaves a knob unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Final result-size cap.
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_limit: 10 }
    }
}

/// Files larger than this are **always** skipped by the reader, regardless of
/// config. Protects low-RAM machines from a 10 MB minified bundle.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 1_000_000; // 1 MB

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the flat-file store (relative to the corpus root).
    pub store_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    /// Directory *names* to skip anywhere in the tree (e.g. "generated").
    pub exclude_dir_names: Vec<String>,
    /// Per-file byte cap applied by the reader.
    pub max_file_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".corpex"),
            chunking: ChunkingConfig::default(),
            pipeline: PipelineConfig::default(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            exclude_dir_names: vec![],
            max_file_bytes: 512 * 1024,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.pipeline.validate()?;
        if self.store.dimension == 0 {
            return Err(CoreError::config("store dimension must be > 0"));
        }
        Ok(())
    }
}

pub fn load_config(root: &Path) -> Config {
    let primary = root.join(".corpex.json");

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|_| Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_stay_below_budget() {
        let cfg = ChunkingConfig {
            max_tokens: 8,
            overlap_tokens: 8,
            structure_aware: false,
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.search.default_limit, 10);
    }
}
