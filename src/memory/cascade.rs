//! Hierarchical summarization cascade
//!
//! Builds hierarchical summaries from groups of leaf summaries when a child
//! updates, and meta-summaries from groups of hierarchical summaries once
//! enough of them exist. Steps whose summarizer capability is absent are
//! skipped, never probed per call.

use crate::error::Result;
use crate::memory::models::{CodeBlock, ContextSummary, HierarchicalSummary, MetaSummary};
use crate::store::SummaryStore;
use crate::summarizer::{Summarizer, SummarizerCapabilities};
use chrono::Utc;
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Shared parent → ordered child-set index
pub type HierarchyMap = Arc<RwLock<IndexMap<String, IndexSet<String>>>>;

const MAX_KEY_INSIGHTS: usize = 7;
const CODE_BLOCK_IMPORTANCE_FLOOR: f32 = 0.7;
const MAX_SHARED_CODE_BLOCKS: usize = 10;

/// Cascades summary updates up the context hierarchy
pub struct HierarchicalCascade {
    store: Arc<dyn SummaryStore>,
    summarizer: Arc<dyn Summarizer>,
    capabilities: SummarizerCapabilities,
    hierarchy: HierarchyMap,
    meta_summary_threshold: usize,
}

impl HierarchicalCascade {
    pub fn new(
        store: Arc<dyn SummaryStore>,
        summarizer: Arc<dyn Summarizer>,
        hierarchy: HierarchyMap,
        meta_summary_threshold: usize,
    ) -> Self {
        let capabilities = summarizer.capabilities();
        Self {
            store,
            summarizer,
            capabilities,
            hierarchy,
            meta_summary_threshold,
        }
    }

    /// Rebuild the hierarchical summary for `parent_id` from its current
    /// children. No-ops when the parent has no children, no child summary
    /// loads, or the summarizer lacks the hierarchical capability.
    pub async fn update_hierarchical_summary(
        &self,
        parent_id: &str,
    ) -> Result<Option<HierarchicalSummary>> {
        let children: Vec<String> = {
            let hierarchy = self.hierarchy.read().await;
            match hierarchy.get(parent_id) {
                Some(children) => children.iter().cloned().collect(),
                None => Vec::new(),
            }
        };
        if children.is_empty() {
            return Ok(None);
        }
        if !self.capabilities.hierarchical {
            debug!("summarizer lacks hierarchical capability, skipping cascade");
            return Ok(None);
        }

        let mut child_summaries: Vec<ContextSummary> = Vec::new();
        for child_id in &children {
            match self.store.load_summary(child_id).await {
                Ok(Some(summary)) => child_summaries.push(summary),
                Ok(None) => debug!("child '{}' has no summary yet, skipping", child_id),
                Err(e) => warn!("failed to load child summary '{}': {}", child_id, e),
            }
        }
        if child_summaries.is_empty() {
            return Ok(None);
        }

        let text = self
            .summarizer
            .summarize_hierarchy(&child_summaries, parent_id)
            .await?;

        let previous = self.store.load_hierarchical_summary(parent_id).await?;
        let version = previous.as_ref().map(|p| p.summary.version + 1).unwrap_or(1);

        let message_count = child_summaries.iter().map(|s| s.message_count).sum();
        let importance_score = child_summaries
            .iter()
            .map(|s| {
                if s.importance_score.is_finite() {
                    s.importance_score
                } else {
                    0.5
                }
            })
            .sum::<f32>()
            / child_summaries.len() as f32;

        let code_blocks: Vec<CodeBlock> = child_summaries
            .iter()
            .flat_map(|child| {
                child
                    .code_blocks
                    .iter()
                    .filter(|b| b.importance >= CODE_BLOCK_IMPORTANCE_FLOOR)
                    .map(|b| CodeBlock {
                        source_context_id: Some(child.context_id.clone()),
                        ..b.clone()
                    })
            })
            .collect();

        let mut key_insights: Vec<String> = Vec::new();
        for child in &child_summaries {
            for insight in &child.key_insights {
                if !key_insights.contains(insight) {
                    key_insights.push(insight.clone());
                }
            }
        }
        key_insights.truncate(MAX_KEY_INSIGHTS);

        let hierarchical = HierarchicalSummary {
            summary: ContextSummary {
                context_id: parent_id.to_string(),
                updated_at: Utc::now(),
                summary: text,
                code_blocks,
                message_count,
                version,
                key_insights,
                importance_score,
                related_contexts: Default::default(),
            },
            parent_context_id: previous.as_ref().and_then(|p| p.parent_context_id.clone()),
            child_context_ids: children.into_iter().collect(),
            hierarchy_level: previous.as_ref().map(|p| p.hierarchy_level).unwrap_or(0),
        };

        self.store.save_hierarchical_summary(&hierarchical).await?;
        info!(
            "updated hierarchical summary '{}' (version {}, {} children)",
            parent_id,
            version,
            hierarchical.child_context_ids.len()
        );

        if let Err(e) = self.check_for_meta_summary(None).await {
            warn!("meta-summary check failed: {}", e);
        }

        Ok(Some(hierarchical))
    }

    /// Create or refresh a meta-summary once enough hierarchical summaries
    /// exist. Returns `None` below the threshold or when the capability is
    /// absent.
    pub async fn check_for_meta_summary(&self, id: Option<String>) -> Result<Option<MetaSummary>> {
        let ids = self.store.get_all_hierarchical_context_ids().await?;
        if ids.len() < self.meta_summary_threshold {
            return Ok(None);
        }
        if !self.capabilities.meta {
            debug!("summarizer lacks meta capability, skipping meta-summary");
            return Ok(None);
        }

        let mut summaries: Vec<HierarchicalSummary> = Vec::new();
        for context_id in &ids {
            if let Some(summary) = self.store.load_hierarchical_summary(context_id).await? {
                summaries.push(summary);
            }
        }
        if summaries.is_empty() {
            return Ok(None);
        }

        let text = self.summarizer.summarize_meta(&summaries).await?;

        let id = id.unwrap_or_else(|| format!("meta_{}", Utc::now().timestamp_millis()));
        let existing = self.store.load_meta_summary(&id).await?;
        let now = Utc::now();

        let mut shared_code_blocks: Vec<CodeBlock> = summaries
            .iter()
            .flat_map(|s| s.summary.code_blocks.iter().cloned())
            .collect();
        shared_code_blocks.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        shared_code_blocks.truncate(MAX_SHARED_CODE_BLOCKS);

        let meta = MetaSummary {
            id: id.clone(),
            created_at: existing.map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
            summary: text,
            context_ids: ids,
            shared_code_blocks,
            hierarchy_level: 1,
        };
        self.store.save_meta_summary(&meta).await?;
        info!(
            "created meta-summary '{}' over {} hierarchical summaries",
            id,
            meta.context_ids.len()
        );
        Ok(Some(meta))
    }
}
