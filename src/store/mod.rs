//! Durable summary storage
//!
//! One JSON document per context summary, one per hierarchical summary
//! (under `hierarchical-summaries`), one per meta-summary (under
//! `meta-summaries`), and one document holding the full graph edge list.
//! Writes are whole-file rewrites; the orchestrator serializes writers per
//! context.

use crate::error::{MemoryError, Result};
use crate::graph::ContextEdge;
use crate::memory::models::{ContextSummary, HierarchicalSummary, MetaSummary};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Durable store for summaries and the relationship edge list
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn save_summary(&self, summary: &ContextSummary) -> Result<()>;
    async fn load_summary(&self, context_id: &str) -> Result<Option<ContextSummary>>;
    async fn delete_summary(&self, context_id: &str) -> Result<()>;
    async fn get_all_context_ids(&self) -> Result<Vec<String>>;

    async fn save_hierarchical_summary(&self, summary: &HierarchicalSummary) -> Result<()>;
    async fn load_hierarchical_summary(
        &self,
        context_id: &str,
    ) -> Result<Option<HierarchicalSummary>>;
    async fn get_all_hierarchical_context_ids(&self) -> Result<Vec<String>>;

    async fn save_meta_summary(&self, summary: &MetaSummary) -> Result<()>;
    async fn load_meta_summary(&self, id: &str) -> Result<Option<MetaSummary>>;
    async fn get_all_meta_summary_ids(&self) -> Result<Vec<String>>;

    async fn save_graph(&self, edges: &[ContextEdge]) -> Result<()>;
    async fn load_graph(&self) -> Result<Vec<ContextEdge>>;
}

const HIERARCHICAL_DIR: &str = "hierarchical-summaries";
const META_DIR: &str = "meta-summaries";
const GRAPH_FILE: &str = "relationships.json";

/// File-backed store writing one JSON document per summary
pub struct FileSummaryStore {
    base_dir: PathBuf,
}

impl FileSummaryStore {
    /// Create the store, ensuring the directory layout exists
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        tokio::fs::create_dir_all(base_dir.join(HIERARCHICAL_DIR)).await?;
        tokio::fs::create_dir_all(base_dir.join(META_DIR)).await?;
        Ok(Self { base_dir })
    }

    /// Map an id to a safe file name. Context ids are caller-supplied, so
    /// path separators and other unsafe characters are percent-escaped.
    /// The escaping is injective: distinct ids never share a file.
    fn file_name(id: &str) -> String {
        let mut name = String::with_capacity(id.len() + 5);
        for c in id.chars() {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                name.push(c);
            } else {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).as_bytes() {
                    name.push_str(&format!("%{:02X}", byte));
                }
            }
        }
        name.push_str(".json");
        name
    }

    fn summary_path(&self, context_id: &str) -> PathBuf {
        self.base_dir.join(Self::file_name(context_id))
    }

    fn hierarchical_path(&self, context_id: &str) -> PathBuf {
        self.base_dir
            .join(HIERARCHICAL_DIR)
            .join(Self::file_name(context_id))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(META_DIR).join(Self::file_name(id))
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List the ids stored in `dir` by reading `id_field` out of each JSON
    /// document. File names are escaped forms of the id, so the document is
    /// the source of truth for the real id. Unreadable documents are skipped.
    async fn list_ids(dir: &Path, id_field: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::Store(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("skipping unreadable document {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(doc) => {
                    if let Some(id) = doc.get(id_field).and_then(|v| v.as_str()) {
                        ids.push(id.to_string());
                    }
                }
                Err(e) => warn!("skipping malformed document {}: {}", path.display(), e),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl SummaryStore for FileSummaryStore {
    async fn save_summary(&self, summary: &ContextSummary) -> Result<()> {
        debug!(
            "persisting summary for '{}' (version {})",
            summary.context_id, summary.version
        );
        Self::write_json(&self.summary_path(&summary.context_id), summary).await
    }

    async fn load_summary(&self, context_id: &str) -> Result<Option<ContextSummary>> {
        Self::read_json(&self.summary_path(context_id)).await
    }

    async fn delete_summary(&self, context_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.summary_path(context_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_context_ids(&self) -> Result<Vec<String>> {
        // the graph edge list shares the base directory but carries no
        // context_id field, so the listing skips it
        Self::list_ids(&self.base_dir, "context_id").await
    }

    async fn save_hierarchical_summary(&self, summary: &HierarchicalSummary) -> Result<()> {
        Self::write_json(&self.hierarchical_path(&summary.summary.context_id), summary).await
    }

    async fn load_hierarchical_summary(
        &self,
        context_id: &str,
    ) -> Result<Option<HierarchicalSummary>> {
        Self::read_json(&self.hierarchical_path(context_id)).await
    }

    async fn get_all_hierarchical_context_ids(&self) -> Result<Vec<String>> {
        Self::list_ids(&self.base_dir.join(HIERARCHICAL_DIR), "context_id").await
    }

    async fn save_meta_summary(&self, summary: &MetaSummary) -> Result<()> {
        Self::write_json(&self.meta_path(&summary.id), summary).await
    }

    async fn load_meta_summary(&self, id: &str) -> Result<Option<MetaSummary>> {
        Self::read_json(&self.meta_path(id)).await
    }

    async fn get_all_meta_summary_ids(&self) -> Result<Vec<String>> {
        Self::list_ids(&self.base_dir.join(META_DIR), "id").await
    }

    async fn save_graph(&self, edges: &[ContextEdge]) -> Result<()> {
        Self::write_json(&self.base_dir.join(GRAPH_FILE), &edges).await
    }

    async fn load_graph(&self) -> Result<Vec<ContextEdge>> {
        Ok(Self::read_json(&self.base_dir.join(GRAPH_FILE))
            .await?
            .unwrap_or_default())
    }
}

/// In-memory store for tests and embedded use
#[derive(Default)]
pub struct MemorySummaryStore {
    summaries: RwLock<HashMap<String, ContextSummary>>,
    hierarchical: RwLock<HashMap<String, HierarchicalSummary>>,
    meta: RwLock<HashMap<String, MetaSummary>>,
    edges: RwLock<Vec<ContextEdge>>,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryStore for MemorySummaryStore {
    async fn save_summary(&self, summary: &ContextSummary) -> Result<()> {
        self.summaries
            .write()
            .await
            .insert(summary.context_id.clone(), summary.clone());
        Ok(())
    }

    async fn load_summary(&self, context_id: &str) -> Result<Option<ContextSummary>> {
        Ok(self.summaries.read().await.get(context_id).cloned())
    }

    async fn delete_summary(&self, context_id: &str) -> Result<()> {
        self.summaries.write().await.remove(context_id);
        Ok(())
    }

    async fn get_all_context_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.summaries.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_hierarchical_summary(&self, summary: &HierarchicalSummary) -> Result<()> {
        self.hierarchical
            .write()
            .await
            .insert(summary.summary.context_id.clone(), summary.clone());
        Ok(())
    }

    async fn load_hierarchical_summary(
        &self,
        context_id: &str,
    ) -> Result<Option<HierarchicalSummary>> {
        Ok(self.hierarchical.read().await.get(context_id).cloned())
    }

    async fn get_all_hierarchical_context_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.hierarchical.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_meta_summary(&self, summary: &MetaSummary) -> Result<()> {
        self.meta
            .write()
            .await
            .insert(summary.id.clone(), summary.clone());
        Ok(())
    }

    async fn load_meta_summary(&self, id: &str) -> Result<Option<MetaSummary>> {
        Ok(self.meta.read().await.get(id).cloned())
    }

    async fn get_all_meta_summary_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.meta.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_graph(&self, edges: &[ContextEdge]) -> Result<()> {
        *self.edges.write().await = edges.to_vec();
        Ok(())
    }

    async fn load_graph(&self) -> Result<Vec<ContextEdge>> {
        Ok(self.edges.read().await.clone())
    }
}
