//! Keyword fallback index
//!
//! Deterministic term-overlap ranking over stored summary text, used
//! whenever the primary similarity index is unavailable.

use crate::memory::models::ContextSummary;
use crate::vector::SimilarContext;
use indexmap::IndexMap;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Exact/substring term-overlap index over stored summaries
#[derive(Default)]
pub struct KeywordIndex {
    summaries: RwLock<IndexMap<String, String>>,
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_summary(&self, summary: &ContextSummary) {
        self.summaries
            .write()
            .await
            .insert(summary.context_id.clone(), summary.summary.clone());
    }

    pub async fn delete_context(&self, context_id: &str) {
        // shift_remove keeps insertion order for deterministic tie-breaks
        self.summaries.write().await.shift_remove(context_id);
    }

    pub async fn has_context(&self, context_id: &str) -> bool {
        self.summaries.read().await.contains_key(context_id)
    }

    /// Rank stored summaries by normalized term overlap with `text`.
    /// Empty queries return no results. Ties fall back to insertion order.
    pub async fn find_similar_contexts(&self, text: &str, limit: usize) -> Vec<SimilarContext> {
        let query_terms = terms(text);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let summaries = self.summaries.read().await;
        let mut scored: Vec<SimilarContext> = summaries
            .iter()
            .filter_map(|(context_id, summary)| {
                let summary_terms = terms(summary);
                let overlap = query_terms.intersection(&summary_terms).count();
                if overlap == 0 {
                    return None;
                }
                Some(SimilarContext {
                    context_id: context_id.clone(),
                    similarity: overlap as f32 / query_terms.len() as f32,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    fn summary(id: &str, text: &str) -> ContextSummary {
        ContextSummary {
            context_id: id.to_string(),
            updated_at: Utc::now(),
            summary: text.to_string(),
            code_blocks: vec![],
            message_count: 1,
            version: 1,
            key_insights: vec![],
            importance_score: 0.5,
            related_contexts: HashSet::new(),
        }
    }

    async fn seeded() -> KeywordIndex {
        let index = KeywordIndex::new();
        index.add_summary(&summary("ctx-1", "apples and oranges")).await;
        index.add_summary(&summary("ctx-2", "bananas and apples")).await;
        index.add_summary(&summary("ctx-3", "grapes")).await;
        index
    }

    #[tokio::test]
    async fn empty_query_returns_nothing() {
        let index = seeded().await;
        assert!(index.find_similar_contexts("", 5).await.is_empty());
        assert!(index.find_similar_contexts("  \t ", 5).await.is_empty());
    }

    #[tokio::test]
    async fn matches_by_term_overlap() {
        let index = seeded().await;
        let results = index.find_similar_contexts("apples", 2).await;
        assert_eq!(results.len(), 2);
        let ids: Vec<&str> = results.iter().map(|r| r.context_id.as_str()).collect();
        assert!(ids.contains(&"ctx-1"));
        assert!(ids.contains(&"ctx-2"));
        for r in &results {
            assert!(r.similarity > 0.0);
        }
    }

    #[tokio::test]
    async fn no_overlap_returns_nothing() {
        let index = seeded().await;
        assert!(index.find_similar_contexts("kiwi", 5).await.is_empty());
    }

    #[tokio::test]
    async fn results_sorted_descending() {
        let index = KeywordIndex::new();
        index.add_summary(&summary("one-hit", "apples only")).await;
        index
            .add_summary(&summary("two-hits", "apples and oranges here"))
            .await;
        let results = index.find_similar_contexts("apples oranges", 5).await;
        assert_eq!(results[0].context_id, "two-hits");
        assert!(results[0].similarity >= results[1].similarity);
    }

    #[tokio::test]
    async fn ties_are_deterministic() {
        let index = seeded().await;
        let a = index.find_similar_contexts("apples", 5).await;
        let b = index.find_similar_contexts("apples", 5).await;
        let ids_a: Vec<_> = a.iter().map(|r| r.context_id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|r| r.context_id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn delete_and_has() {
        let index = seeded().await;
        assert!(index.has_context("ctx-1").await);
        index.delete_context("ctx-1").await;
        assert!(!index.has_context("ctx-1").await);
        let results = index.find_similar_contexts("apples", 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].context_id, "ctx-2");
    }
}
