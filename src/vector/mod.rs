//! Vector similarity repository
//!
//! Maintains embeddings for context summaries and answers nearest-neighbor
//! queries. Construction attempts to initialize the embedding pipeline and
//! the index backend; any failure sets a fallback flag for the lifetime of
//! the instance, after which every operation is forwarded to the keyword
//! index instead of raising.

pub mod embedder;
pub mod index;
pub mod keyword;

pub use embedder::{Embedder, HttpEmbedder};
pub use index::{InMemoryVectorIndex, QdrantVectorIndex, VectorIndex};
pub use keyword::KeywordIndex;

use crate::config::{EmbeddingConfig, VectorIndexConfig};
use crate::error::{MemoryError, Result};
use crate::memory::models::ContextSummary;
use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A similarity query hit
#[derive(Debug, Clone, Serialize)]
pub struct SimilarContext {
    pub context_id: String,
    pub similarity: f32,
}

/// Bidirectional mapping between context ids and dense point ids. Index
/// backends address points by integer, not string key.
#[derive(Default)]
struct IdMappings {
    by_context: HashMap<String, u64>,
    by_point: HashMap<u64, String>,
    next_id: u64,
}

impl IdMappings {
    fn get_or_allocate(&mut self, context_id: &str) -> u64 {
        if let Some(&id) = self.by_context.get(context_id) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_context.insert(context_id.to_string(), id);
        self.by_point.insert(id, context_id.to_string());
        id
    }
}

/// Embedding-backed similarity search with a keyword fallback
pub struct VectorRepository {
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn VectorIndex>>,
    keyword: KeywordIndex,
    fallback_mode: bool,
    mappings: RwLock<IdMappings>,
    embedding_cache: Cache<String, Arc<Vec<f32>>>,
}

const EMBEDDING_CACHE_SIZE: u64 = 10_000;

impl VectorRepository {
    /// Primary-mode repository over the given embedder and index backend
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder: Some(embedder),
            index: Some(index),
            keyword: KeywordIndex::new(),
            fallback_mode: false,
            mappings: RwLock::new(IdMappings::default()),
            embedding_cache: Cache::new(EMBEDDING_CACHE_SIZE),
        }
    }

    /// Repository permanently in keyword fallback mode
    pub fn fallback() -> Self {
        Self {
            embedder: None,
            index: None,
            keyword: KeywordIndex::new(),
            fallback_mode: true,
            mappings: RwLock::new(IdMappings::default()),
            embedding_cache: Cache::new(EMBEDDING_CACHE_SIZE),
        }
    }

    /// Attempt full initialization from configuration, degrading to keyword
    /// fallback on any failure. The outcome is terminal for the lifetime of
    /// the instance; there is no mid-request retry.
    pub async fn initialize(embedding: &EmbeddingConfig, index_config: &VectorIndexConfig) -> Self {
        let embedder = match HttpEmbedder::new(embedding.clone()) {
            Ok(e) => e,
            Err(e) => {
                warn!("embedder initialization failed, using keyword fallback: {}", e);
                return Self::fallback();
            }
        };

        let index: Arc<dyn VectorIndex> = if index_config.url.is_some() {
            match QdrantVectorIndex::new(index_config, embedding.dimension).await {
                Ok(index) => Arc::new(index),
                Err(e) => {
                    warn!("vector index initialization failed, using keyword fallback: {}", e);
                    return Self::fallback();
                }
            }
        } else {
            Arc::new(InMemoryVectorIndex::new())
        };

        Self::new(Arc::new(embedder), index)
    }

    /// Whether this instance degraded to the keyword index at construction
    pub fn is_fallback(&self) -> bool {
        self.fallback_mode
    }

    async fn embed_cached(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| MemoryError::SubsystemUnavailable("embedder".to_string()))?
            .clone();
        let key = hex::encode(Sha256::digest(text.as_bytes()));
        let text = text.to_string();
        self.embedding_cache
            .try_get_with(key, async move { embedder.embed(&text).await.map(Arc::new) })
            .await
            .map_err(|e: Arc<MemoryError>| MemoryError::Embedding(e.to_string()))
    }

    /// Compute or refresh the embedding for a summary and upsert it
    pub async fn add_summary(&self, summary: &ContextSummary) -> Result<()> {
        if self.fallback_mode {
            self.keyword.add_summary(summary).await;
            return Ok(());
        }
        let vector = self.embed_cached(&summary.summary).await?;
        let point_id = {
            let mut mappings = self.mappings.write().await;
            mappings.get_or_allocate(&summary.context_id)
        };
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| MemoryError::SubsystemUnavailable("vector index".to_string()))?;
        index.add(point_id, vector.as_ref().clone()).await?;
        debug!(
            "indexed summary for '{}' as point {}",
            summary.context_id, point_id
        );
        Ok(())
    }

    /// Nearest stored summaries for `text`, sorted descending by similarity
    pub async fn find_similar_contexts(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SimilarContext>> {
        if self.fallback_mode {
            return Ok(self.keyword.find_similar_contexts(text, limit).await);
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embed_cached(text).await?;
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| MemoryError::SubsystemUnavailable("vector index".to_string()))?;
        let hits = index.search(&vector, limit).await?;

        let mappings = self.mappings.read().await;
        Ok(hits
            .into_iter()
            .filter_map(|(point_id, similarity)| {
                mappings.by_point.get(&point_id).map(|context_id| SimilarContext {
                    context_id: context_id.clone(),
                    similarity,
                })
            })
            .collect())
    }

    /// Remove mapping entries and the indexed point, if any
    pub async fn delete_context(&self, context_id: &str) -> Result<()> {
        if self.fallback_mode {
            self.keyword.delete_context(context_id).await;
            return Ok(());
        }
        let point_id = {
            let mut mappings = self.mappings.write().await;
            let Some(id) = mappings.by_context.remove(context_id) else {
                return Ok(());
            };
            mappings.by_point.remove(&id);
            id
        };
        if let Some(index) = &self.index {
            index.remove(point_id).await?;
        }
        Ok(())
    }

    pub async fn has_context(&self, context_id: &str) -> bool {
        if self.fallback_mode {
            return self.keyword.has_context(context_id).await;
        }
        self.mappings.read().await.by_context.contains_key(context_id)
    }
}
