//! Nearest-neighbor index backends
//!
//! Backends address points by dense integer id; the repository owns the
//! mapping between context ids and point ids.

use crate::config::VectorIndexConfig;
use crate::error::{MemoryError, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use qdrant_client::client::{Payload, QdrantClient};
use qdrant_client::qdrant::{
    point_id::PointIdOptions, points_selector::PointsSelectorOneOf, CreateCollection, Distance,
    PointStruct, PointsIdsList, PointsSelector, SearchPoints, VectorParams, VectorsConfig,
};
use tokio::sync::RwLock;
use tracing::info;

/// Approximate-nearest-neighbor index over integer point ids
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, id: u64, vector: Vec<f32>) -> Result<()>;

    /// Nearest neighbors sorted descending by similarity, at most `limit`
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(u64, f32)>>;

    async fn remove(&self, id: u64) -> Result<()>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Brute-force cosine index for tests and embedded use
#[derive(Default)]
pub struct InMemoryVectorIndex {
    vectors: RwLock<IndexMap<u64, Vec<f32>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn add(&self, id: u64, vector: Vec<f32>) -> Result<()> {
        self.vectors.write().await.insert(id, vector);
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(u64, f32)>> {
        let vectors = self.vectors.read().await;
        let mut scored: Vec<(u64, f32)> = vectors
            .iter()
            .map(|(id, stored)| (*id, cosine_similarity(vector, stored)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.vectors.write().await.shift_remove(&id);
        Ok(())
    }
}

/// Qdrant-backed index using a cosine-distance collection
pub struct QdrantVectorIndex {
    client: QdrantClient,
    collection_name: String,
}

impl QdrantVectorIndex {
    /// Connect and ensure the collection exists
    pub async fn new(config: &VectorIndexConfig, dimension: usize) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            MemoryError::Configuration("vector_index.url not configured".to_string())
        })?;
        let client = QdrantClient::from_url(url)
            .build()
            .map_err(|e| MemoryError::SubsystemUnavailable(format!("qdrant: {}", e)))?;

        let index = Self {
            client,
            collection_name: config.collection_name.clone(),
        };
        index.ensure_collection(dimension).await?;
        Ok(index)
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| MemoryError::SubsystemUnavailable(format!("qdrant: {}", e)))?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection_name);

        if !exists {
            info!("creating vector collection: {}", self.collection_name);
            self.client
                .create_collection(&CreateCollection {
                    collection_name: self.collection_name.clone(),
                    vectors_config: Some(VectorsConfig {
                        config: Some(qdrant_client::qdrant::vectors_config::Config::Params(
                            VectorParams {
                                size: dimension as u64,
                                distance: Distance::Cosine.into(),
                                ..Default::default()
                            },
                        )),
                    }),
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    MemoryError::SubsystemUnavailable(format!("qdrant create collection: {}", e))
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn add(&self, id: u64, vector: Vec<f32>) -> Result<()> {
        let point = PointStruct::new(id, vector, Payload::new());
        self.client
            .upsert_points(&self.collection_name, None, vec![point], None)
            .await
            .map_err(|e| MemoryError::Internal(format!("qdrant upsert: {}", e)))?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(u64, f32)>> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.collection_name.clone(),
                vector: vector.to_vec(),
                limit: limit as u64,
                ..Default::default()
            })
            .await
            .map_err(|e| MemoryError::Internal(format!("qdrant search: {}", e)))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = match point.id.and_then(|id| id.point_id_options) {
                    Some(PointIdOptions::Num(n)) => n,
                    _ => return None,
                };
                Some((id, point.score))
            })
            .collect())
    }

    async fn remove(&self, id: u64) -> Result<()> {
        let selector = PointsSelector {
            points_selector_one_of: Some(PointsSelectorOneOf::Points(PointsIdsList {
                ids: vec![id.into()],
            })),
        };
        self.client
            .delete_points(&self.collection_name, None, &selector, None)
            .await
            .map_err(|e| MemoryError::Internal(format!("qdrant delete: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn in_memory_index_ranks_by_similarity() {
        let index = InMemoryVectorIndex::new();
        index.add(1, vec![1.0, 0.0]).await.unwrap();
        index.add(2, vec![0.9, 0.1]).await.unwrap();
        index.add(3, vec![0.0, 1.0]).await.unwrap();

        let results = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 2);
        assert!(results[0].1 >= results[1].1);
    }

    #[tokio::test]
    async fn in_memory_index_remove() {
        let index = InMemoryVectorIndex::new();
        index.add(1, vec![1.0, 0.0]).await.unwrap();
        index.remove(1).await.unwrap();
        assert!(index.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }
}
