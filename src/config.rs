//! Configuration loading and validation

use crate::error::{MemoryError, Result};
use crate::summarizer::SummarizerConfig;
use secrecy::SecretString;
use serde::Deserialize;

/// Top-level configuration, loaded from a TOML file with environment
/// overrides (`CONTEXT_MEMORY__<SECTION>__<KEY>`)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MemoryConfig {
    pub engine: EngineConfig,
    pub summarizer: SummarizerConfig,
    pub embedding: EmbeddingConfig,
    pub vector_index: VectorIndexConfig,
    pub storage: StorageConfig,
}

/// Thresholds and switches for the context memory engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Messages since the last summary that force a summarization
    pub message_limit_threshold: usize,
    /// Percentage of the model token limit that forces a summarization
    pub token_limit_percentage: f32,
    /// Fixed model context window used for the token threshold
    pub model_token_limit: usize,
    /// Minimum similarity for inferring SIMILAR relationships
    pub similarity_threshold: f32,
    /// Neighbors fetched when inferring SIMILAR relationships
    pub similar_context_limit: usize,
    /// Hierarchical summary count that triggers a meta-summary
    pub meta_summary_threshold: usize,
    /// Glob patterns for context ids that must never be recorded
    pub ignore_patterns: Vec<String>,
    /// Total context count at or below which eviction is skipped
    pub cleanup_floor: usize,
    /// Days of inactivity before a context is eligible for eviction
    pub retention_days: i64,
    /// Every n-th message on a context triggers an eviction pass
    pub cleanup_interval: usize,
    pub hierarchical_enabled: bool,
    pub vector_enabled: bool,
    pub graph_enabled: bool,
    /// Token estimator selection: "word" or "tiktoken"
    pub token_estimator: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            message_limit_threshold: 10,
            token_limit_percentage: 80.0,
            model_token_limit: 4096,
            similarity_threshold: 0.7,
            similar_context_limit: 5,
            meta_summary_threshold: 5,
            ignore_patterns: Vec::new(),
            cleanup_floor: 10,
            retention_days: 7,
            cleanup_interval: 10,
            hierarchical_enabled: true,
            vector_enabled: true,
            graph_enabled: true,
            token_estimator: "word".to_string(),
        }
    }
}

/// Embedding service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/embeddings".to_string(),
            api_key: None,
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            timeout_secs: 30,
        }
    }
}

/// Vector index backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    /// Qdrant endpoint; when unset an in-memory index is used
    pub url: Option<String>,
    pub collection_name: String,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection_name: "context-summaries".to_string(),
        }
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: "./context-memory".to_string(),
        }
    }
}

impl MemoryConfig {
    /// Load configuration from an optional TOML file layered under
    /// environment variable overrides. Missing files fall back to defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CONTEXT_MEMORY").separator("__"),
        );

        let cfg: MemoryConfig = builder
            .build()
            .map_err(|e| MemoryError::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| MemoryError::Configuration(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.engine.message_limit_threshold == 0 {
            return Err(MemoryError::Configuration(
                "message_limit_threshold must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.engine.token_limit_percentage) {
            return Err(MemoryError::Configuration(format!(
                "token_limit_percentage {} outside 0..=100",
                self.engine.token_limit_percentage
            )));
        }
        if !(0.0..=1.0).contains(&self.engine.similarity_threshold) {
            return Err(MemoryError::Configuration(format!(
                "similarity_threshold {} outside 0..=1",
                self.engine.similarity_threshold
            )));
        }
        if self.engine.cleanup_interval == 0 {
            return Err(MemoryError::Configuration(
                "cleanup_interval must be at least 1".to_string(),
            ));
        }
        for pattern in &self.engine.ignore_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                MemoryError::Configuration(format!("bad ignore pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = MemoryConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.engine.model_token_limit, 4096);
        assert_eq!(cfg.engine.message_limit_threshold, 10);
        assert_eq!(cfg.embedding.dimension, 384);
    }

    #[test]
    fn rejects_bad_threshold() {
        let mut cfg = MemoryConfig::default();
        cfg.engine.similarity_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_ignore_pattern() {
        let mut cfg = MemoryConfig::default();
        cfg.engine.ignore_patterns = vec!["[".to_string()];
        assert!(cfg.validate().is_err());
    }
}
