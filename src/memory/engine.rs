//! Context memory engine
//!
//! Owns per-context working state, decides when to summarize, wires the
//! vector repository, relationship graph, and hierarchical cascade together,
//! and runs the relevance-based eviction pass. Message ingestion must never
//! fail because one of its side-effects (importance analysis, automatic
//! summarization, vector indexing, auto-cleanup) failed; those are logged
//! and swallowed.

use crate::config::{EngineConfig, MemoryConfig};
use crate::error::{MemoryError, Result};
use crate::graph::{Direction, GraphRepository, PathStrategy, RelationshipType};
use crate::memory::cascade::{HierarchicalCascade, HierarchyMap};
use crate::memory::models::{ContextSummary, ContextWorkingState, Message};
use crate::memory::token_estimator::{TiktokenEstimator, TokenEstimator, WordBasedEstimator};
use crate::metrics::MemoryMetrics;
use crate::store::SummaryStore;
use crate::summarizer::{
    extract_key_insights, heuristic_importance, Summarizer, SummarizerCapabilities,
};
use crate::vector::{SimilarContext, VectorRepository};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MAX_KEY_INSIGHTS: usize = 7;
/// Minimum message count before SIMILAR relationships are inferred
const SIMILARITY_MIN_MESSAGES: usize = 3;
/// Neighbors considered when seeding the eviction retain-set
const CLEANUP_SIMILAR_LIMIT: usize = 20;

/// Persisted summary plus in-memory recent messages for one context
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub summary: Option<ContextSummary>,
    pub recent_messages: Vec<Message>,
}

#[derive(Debug, Clone)]
struct RetainEntry {
    importance: f32,
    reason: &'static str,
}

/// Orchestrates summarization, similarity indexing, relationships, and
/// eviction over per-context conversation streams
pub struct ContextMemoryEngine {
    config: EngineConfig,
    store: Arc<dyn SummaryStore>,
    summarizer: Arc<dyn Summarizer>,
    capabilities: SummarizerCapabilities,
    vector: Option<Arc<VectorRepository>>,
    graph: Option<Arc<GraphRepository>>,
    cascade: HierarchicalCascade,
    hierarchy: HierarchyMap,
    states: DashMap<String, Arc<Mutex<ContextWorkingState>>>,
    estimator: Arc<dyn TokenEstimator>,
    ignore_patterns: Vec<glob::Pattern>,
    metrics: Arc<MemoryMetrics>,
}

impl ContextMemoryEngine {
    /// Build an engine from configuration, initializing the vector and graph
    /// subsystems. Vector initialization failure degrades to keyword
    /// fallback; it never fails construction.
    pub async fn from_config(
        config: MemoryConfig,
        store: Arc<dyn SummaryStore>,
        summarizer: Arc<dyn Summarizer>,
        metrics: Arc<MemoryMetrics>,
    ) -> Result<Self> {
        let vector = if config.engine.vector_enabled {
            let repo = VectorRepository::initialize(&config.embedding, &config.vector_index).await;
            Some(Arc::new(repo))
        } else {
            None
        };

        let graph = if config.engine.graph_enabled {
            Some(Arc::new(GraphRepository::with_store(
                PathStrategy::Weighted,
                store.clone(),
            )))
        } else {
            None
        };

        let estimator: Arc<dyn TokenEstimator> = match config.engine.token_estimator.as_str() {
            "tiktoken" => Arc::new(TiktokenEstimator::new()?),
            _ => Arc::new(WordBasedEstimator::default()),
        };

        Self::with_components(
            config.engine,
            store,
            summarizer,
            vector,
            graph,
            estimator,
            metrics,
        )
        .await
    }

    /// Build an engine from explicit components
    pub async fn with_components(
        config: EngineConfig,
        store: Arc<dyn SummaryStore>,
        summarizer: Arc<dyn Summarizer>,
        vector: Option<Arc<VectorRepository>>,
        graph: Option<Arc<GraphRepository>>,
        estimator: Arc<dyn TokenEstimator>,
        metrics: Arc<MemoryMetrics>,
    ) -> Result<Self> {
        let ignore_patterns = config
            .ignore_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| {
                    MemoryError::Configuration(format!("bad ignore pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(vector) = &vector {
            metrics
                .vector_fallback_active
                .set(if vector.is_fallback() { 1 } else { 0 });
        }

        let hierarchy: HierarchyMap = Default::default();
        let capabilities = summarizer.capabilities();
        let cascade = HierarchicalCascade::new(
            store.clone(),
            summarizer.clone(),
            hierarchy.clone(),
            config.meta_summary_threshold,
        );

        let engine = Self {
            config,
            store,
            summarizer,
            capabilities,
            vector,
            graph,
            cascade,
            hierarchy,
            states: DashMap::new(),
            estimator,
            ignore_patterns,
            metrics,
        };
        engine.rebuild_hierarchy().await;
        Ok(engine)
    }

    /// Rebuild the parent → children index from persisted hierarchical
    /// summaries
    async fn rebuild_hierarchy(&self) {
        let ids = match self.store.get_all_hierarchical_context_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("failed to list hierarchical summaries: {}", e);
                return;
            }
        };
        let mut hierarchy = self.hierarchy.write().await;
        for id in ids {
            match self.store.load_hierarchical_summary(&id).await {
                Ok(Some(summary)) => {
                    hierarchy
                        .entry(id)
                        .or_default()
                        .extend(summary.child_context_ids.iter().cloned());
                }
                Ok(None) => {}
                Err(e) => warn!("failed to load hierarchical summary '{}': {}", id, e),
            }
        }
        if !hierarchy.is_empty() {
            debug!("rebuilt hierarchy map with {} parents", hierarchy.len());
        }
    }

    fn is_ignored(&self, context_id: &str) -> bool {
        self.ignore_patterns.iter().any(|p| p.matches(context_id))
    }

    async fn parent_of(&self, context_id: &str) -> Option<String> {
        let hierarchy = self.hierarchy.read().await;
        hierarchy
            .iter()
            .find(|(_, children)| children.contains(context_id))
            .map(|(parent, _)| parent.clone())
    }

    /// Fetch or lazily create the working state for a context, hydrating
    /// bookkeeping from persisted data on creation
    async fn state_entry(&self, context_id: &str) -> Arc<Mutex<ContextWorkingState>> {
        if let Some(existing) = self.states.get(context_id) {
            return existing.clone();
        }
        let mut state = ContextWorkingState::new(context_id);
        match self.store.load_summary(context_id).await {
            Ok(Some(summary)) => {
                state.has_summary = true;
                state.last_summarized_at = Some(summary.updated_at);
                state.importance_score = summary.importance_score;
                state.related_contexts = summary.related_contexts;
            }
            Ok(None) => {}
            Err(e) => warn!("failed to hydrate state for '{}': {}", context_id, e),
        }
        state.parent_context_id = self.parent_of(context_id).await;

        self.states
            .entry(context_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(state)))
            .clone()
    }

    /// Append a message to a context, triggering summarization, similarity
    /// linking, and eviction as policies fire. Returns a snapshot of the
    /// working state after ingestion.
    pub async fn add_message(
        &self,
        context_id: &str,
        mut message: Message,
    ) -> Result<ContextWorkingState> {
        if self.is_ignored(context_id) {
            return Err(MemoryError::IgnoredContext(context_id.to_string()));
        }

        let state_arc = self.state_entry(context_id).await;
        let message_total;
        {
            let mut state = state_arc.lock().await;

            if message.importance.is_none() {
                let level = if self.capabilities.importance_analysis {
                    match self.summarizer.analyze_importance(&message, context_id).await {
                        Ok(level) => level,
                        Err(e) => {
                            debug!("importance analysis failed, using heuristic: {}", e);
                            heuristic_importance(&message.content)
                        }
                    }
                } else {
                    heuristic_importance(&message.content)
                };
                message.importance = Some(level);
            }
            if let Some(level) = message.importance {
                self.metrics
                    .messages_ingested
                    .with_label_values(&[level.as_str()])
                    .inc();
            }

            state.token_count += self.estimator.estimate(&message.content);
            state.messages.push(message);
            state.messages_since_last_summary += 1;
            state.last_activity = Utc::now();
            message_total = state.messages.len();

            if self.should_summarize(&state) {
                if let Err(e) = self.summarize_state(&mut state).await {
                    warn!("automatic summarization for '{}' failed: {}", context_id, e);
                }
            }
        }

        self.link_similar_contexts(context_id).await;

        if message_total % self.config.cleanup_interval == 0 {
            match self.cleanup_irrelevant_contexts(context_id).await {
                Ok(removed) if !removed.is_empty() => {
                    info!("eviction removed {} contexts", removed.len());
                }
                Ok(_) => {}
                Err(e) => warn!("eviction pass failed: {}", e),
            }
        }

        let snapshot = state_arc.lock().await.clone();
        Ok(snapshot)
    }

    /// Summarization policy: enough high-importance messages, message-count
    /// threshold, or token threshold
    fn should_summarize(&self, state: &ContextWorkingState) -> bool {
        let recent = state
            .messages
            .iter()
            .rev()
            .take(state.messages_since_last_summary);
        let high_importance = recent
            .filter(|m| {
                m.importance
                    .map(|level| level >= crate::memory::models::ImportanceLevel::High)
                    .unwrap_or(false)
            })
            .count();
        if high_importance >= 2 {
            return true;
        }
        if state.messages_since_last_summary >= self.config.message_limit_threshold {
            return true;
        }
        let token_limit = (self.config.model_token_limit as f32
            * self.config.token_limit_percentage
            / 100.0) as usize;
        state.token_count >= token_limit
    }

    /// Summarize a context on demand. Returns false when there is no
    /// working state, no messages, or the summarizer produced nothing; in
    /// those cases the working state is left untouched.
    pub async fn summarize_context(&self, context_id: &str) -> Result<bool> {
        let Some(state_arc) = self.states.get(context_id).map(|s| s.clone()) else {
            return Ok(false);
        };
        let mut state = state_arc.lock().await;
        self.summarize_state(&mut state).await
    }

    async fn summarize_state(&self, state: &mut ContextWorkingState) -> Result<bool> {
        if state.messages.is_empty() {
            return Ok(false);
        }
        let context_id = state.context_id.clone();
        let timer = self.metrics.summarization_duration.start_timer();

        let text = match self.summarizer.summarize(&state.messages, &context_id).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                timer.observe_duration();
                self.metrics
                    .summarizations
                    .with_label_values(&["failure"])
                    .inc();
                warn!("summarizer returned empty text for '{}'", context_id);
                return Ok(false);
            }
            Err(e) => {
                timer.observe_duration();
                self.metrics
                    .summarizations
                    .with_label_values(&["failure"])
                    .inc();
                warn!("summarizer failed for '{}': {}", context_id, e);
                return Ok(false);
            }
        };

        let previous = self.store.load_summary(&context_id).await?;
        let version = previous.map(|p| p.version + 1).unwrap_or(1);

        let importance_score = state
            .messages
            .iter()
            .map(|m| m.importance.map(|l| l.score()).unwrap_or(0.5))
            .sum::<f32>()
            / state.messages.len() as f32;

        let code_blocks = state
            .messages
            .iter()
            .flat_map(|m| {
                crate::memory::models::extract_code_blocks(
                    &m.content,
                    m.importance.map(|l| l.score()).unwrap_or(0.5),
                )
            })
            .collect();

        let summary = ContextSummary {
            context_id: context_id.clone(),
            updated_at: Utc::now(),
            summary: text,
            code_blocks,
            message_count: state.messages.len(),
            version,
            key_insights: extract_key_insights(&summary_text_for_insights(state), MAX_KEY_INSIGHTS),
            importance_score,
            related_contexts: state.related_contexts.clone(),
        };
        self.store.save_summary(&summary).await?;

        state.messages_since_last_summary = 0;
        state.has_summary = true;
        state.last_summarized_at = Some(summary.updated_at);
        state.importance_score = importance_score;

        timer.observe_duration();
        self.metrics
            .summarizations
            .with_label_values(&["success"])
            .inc();
        info!(
            "summarized '{}' (version {}, {} messages)",
            context_id, version, summary.message_count
        );

        if let Some(vector) = &self.vector {
            if let Err(e) = vector.add_summary(&summary).await {
                warn!("failed to index summary for '{}': {}", context_id, e);
            }
        }

        let parent = match &state.parent_context_id {
            Some(parent) => Some(parent.clone()),
            None => self.parent_of(&context_id).await,
        };
        if let Some(parent) = parent {
            if let Err(e) = self.cascade.update_hierarchical_summary(&parent).await {
                warn!("hierarchical cascade for '{}' failed: {}", parent, e);
            }
        }

        Ok(true)
    }

    /// Push the current summary into the vector repository and record
    /// SIMILAR relationships for close neighbors of the latest message.
    /// Failures here never surface to `add_message`.
    async fn link_similar_contexts(&self, context_id: &str) {
        let Some(vector) = &self.vector else {
            return;
        };
        let Some(state_arc) = self.states.get(context_id).map(|s| s.clone()) else {
            return;
        };
        let (has_summary, message_count, latest_content) = {
            let state = state_arc.lock().await;
            (
                state.has_summary,
                state.messages.len(),
                state.messages.last().map(|m| m.content.clone()),
            )
        };
        if !has_summary || message_count < SIMILARITY_MIN_MESSAGES {
            return;
        }
        let Some(latest_content) = latest_content else {
            return;
        };

        match self.store.load_summary(context_id).await {
            Ok(Some(summary)) => {
                if let Err(e) = vector.add_summary(&summary).await {
                    warn!("failed to refresh vector entry for '{}': {}", context_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("failed to load summary for '{}': {}", context_id, e),
        }

        let neighbors = match vector
            .find_similar_contexts(&latest_content, self.config.similar_context_limit)
            .await
        {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!("similarity query for '{}' failed: {}", context_id, e);
                return;
            }
        };
        for neighbor in neighbors {
            // only strictly-above-threshold neighbors are linked
            if neighbor.context_id == context_id
                || neighbor.similarity <= self.config.similarity_threshold
            {
                continue;
            }
            if let Err(e) = self
                .add_relationship(
                    context_id,
                    &neighbor.context_id,
                    RelationshipType::Similar,
                    neighbor.similarity,
                    None,
                )
                .await
            {
                warn!(
                    "failed to record SIMILAR edge {} -> {}: {}",
                    context_id, neighbor.context_id, e
                );
            }
        }
    }

    /// Record a typed relationship. Graph failures are surfaced; the
    /// in-memory mirrors (related-context sets, hierarchy map) are updated
    /// on success.
    pub async fn add_relationship(
        &self,
        source: &str,
        target: &str,
        relationship: RelationshipType,
        weight: f32,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| MemoryError::SubsystemUnavailable("graph".to_string()))?;
        graph
            .add_relationship(source, target, relationship, weight, metadata)
            .await?;
        self.metrics.graph_edges.set(graph.edge_count().await as i64);

        if source == target {
            return Ok(());
        }

        // hierarchy mirror: a PARENT edge points from parent to child
        match relationship {
            RelationshipType::Parent => {
                let mut hierarchy = self.hierarchy.write().await;
                hierarchy
                    .entry(source.to_string())
                    .or_default()
                    .insert(target.to_string());
            }
            RelationshipType::Child => {
                let mut hierarchy = self.hierarchy.write().await;
                hierarchy
                    .entry(target.to_string())
                    .or_default()
                    .insert(source.to_string());
            }
            _ => {}
        }

        // related-context mirrors for loaded states only
        for (id, other) in [(source, target), (target, source)] {
            if let Some(state_arc) = self.states.get(id).map(|s| s.clone()) {
                let mut state = state_arc.lock().await;
                state.related_contexts.insert(other.to_string());
                if relationship == RelationshipType::Child && id == source {
                    state.parent_context_id = Some(other.to_string());
                } else if relationship == RelationshipType::Parent && id == target {
                    state.parent_context_id = Some(other.to_string());
                }
            }
        }
        Ok(())
    }

    /// Similarity search over stored summaries. Empty when the vector
    /// subsystem is disabled, never an error for that case.
    pub async fn find_similar_contexts(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SimilarContext>> {
        match &self.vector {
            Some(vector) => vector.find_similar_contexts(text, limit).await,
            None => Ok(Vec::new()),
        }
    }

    /// Shortest path between two contexts; empty when the graph subsystem
    /// is disabled
    pub async fn find_path(&self, source: &str, target: &str) -> Vec<String> {
        match &self.graph {
            Some(graph) => graph.find_path(source, target).await,
            None => Vec::new(),
        }
    }

    /// Related context ids, optionally filtered by type and direction;
    /// empty when the graph subsystem is disabled
    pub async fn get_related_contexts(
        &self,
        context_id: &str,
        relationship: Option<RelationshipType>,
        direction: Direction,
    ) -> Vec<String> {
        match &self.graph {
            Some(graph) => {
                graph
                    .get_related_contexts(context_id, relationship, direction)
                    .await
            }
            None => Vec::new(),
        }
    }

    /// Persisted summary plus in-memory recent messages for a context
    pub async fn retrieve_context(&self, context_id: &str) -> Result<Option<RetrievedContext>> {
        let summary = self.store.load_summary(context_id).await?;
        let recent_messages = match self.states.get(context_id).map(|s| s.clone()) {
            Some(state_arc) => state_arc.lock().await.messages.clone(),
            None => Vec::new(),
        };
        if summary.is_none() && recent_messages.is_empty() {
            return Ok(None);
        }
        Ok(Some(RetrievedContext {
            summary,
            recent_messages,
        }))
    }

    /// Multi-signal eviction pass anchored at one context. Builds a
    /// retain-set from similarity, graph relations, hierarchy, persisted
    /// importance, and recency, then removes everything else. The anchor is
    /// always retained.
    pub async fn cleanup_irrelevant_contexts(&self, anchor: &str) -> Result<Vec<String>> {
        let mut all_ids: IndexSet<String> =
            self.store.get_all_context_ids().await?.into_iter().collect();
        for entry in self.states.iter() {
            all_ids.insert(entry.key().to_string());
        }
        if all_ids.len() <= self.config.cleanup_floor {
            return Ok(Vec::new());
        }
        let Some(anchor_summary) = self.store.load_summary(anchor).await? else {
            return Ok(Vec::new());
        };

        let mut retained: HashMap<String, RetainEntry> = HashMap::new();
        retained.insert(
            anchor.to_string(),
            RetainEntry {
                importance: 1.0,
                reason: "anchor",
            },
        );

        // similarity neighbors of the anchor's summary
        if let Some(vector) = &self.vector {
            let floor = self.config.similarity_threshold / 2.0;
            match vector
                .find_similar_contexts(&anchor_summary.summary, CLEANUP_SIMILAR_LIMIT)
                .await
            {
                Ok(neighbors) => {
                    for neighbor in neighbors {
                        if neighbor.similarity < floor {
                            continue;
                        }
                        retained
                            .entry(neighbor.context_id)
                            .and_modify(|e| e.importance = e.importance.max(neighbor.similarity))
                            .or_insert(RetainEntry {
                                importance: neighbor.similarity,
                                reason: "similar",
                            });
                    }
                }
                Err(e) => warn!("similarity lookup during eviction failed: {}", e),
            }
        }

        // direct graph relations of the anchor
        if let Some(graph) = &self.graph {
            for edge in graph.get_relationships(anchor, Direction::Outgoing).await {
                boost_or_insert(&mut retained, &edge.target, 0.7, "related");
            }
            for edge in graph.get_relationships(anchor, Direction::Incoming).await {
                boost_or_insert(&mut retained, &edge.source, 0.6, "referenced-by");
            }
        }

        // hierarchy: parent, siblings, children
        if self.config.hierarchical_enabled {
            let hierarchy = self.hierarchy.read().await;
            if let Some((parent, siblings)) = hierarchy
                .iter()
                .find(|(_, children)| children.contains(anchor))
            {
                boost_or_insert(&mut retained, parent, 0.8, "parent");
                for sibling in siblings {
                    if sibling != anchor {
                        boost_or_insert(&mut retained, sibling, 0.5, "sibling");
                    }
                }
            }
            if let Some(children) = hierarchy.get(anchor) {
                for child in children {
                    boost_or_insert(&mut retained, child, 0.7, "child");
                }
            }
        }

        // persisted importance and recent activity
        let activity_cutoff = Utc::now() - Duration::days(self.config.retention_days);
        for context_id in &all_ids {
            if retained.contains_key(context_id) {
                continue;
            }
            let summary = match self.store.load_summary(context_id).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("failed to load '{}' during eviction: {}", context_id, e);
                    continue;
                }
            };
            if let Some(summary) = &summary {
                if summary.importance_score >= 0.8 {
                    retained.insert(
                        context_id.clone(),
                        RetainEntry {
                            importance: summary.importance_score,
                            reason: "important",
                        },
                    );
                    continue;
                }
            }
            let last_activity = {
                let state_activity = match self.states.get(context_id.as_str()) {
                    Some(state_arc) => Some(state_arc.lock().await.last_activity),
                    None => None,
                };
                let summary_activity = summary.as_ref().map(|s| s.updated_at);
                state_activity.into_iter().chain(summary_activity).max()
            };
            if let Some(last_activity) = last_activity {
                if last_activity >= activity_cutoff {
                    retained.insert(
                        context_id.clone(),
                        RetainEntry {
                            importance: 0.5,
                            reason: "recent",
                        },
                    );
                }
            }
        }

        for (context_id, entry) in &retained {
            debug!(
                "retaining '{}' ({}: {:.2})",
                context_id, entry.reason, entry.importance
            );
        }
        let to_remove: Vec<String> = all_ids
            .into_iter()
            .filter(|id| !retained.contains_key(id))
            .collect();

        for context_id in &to_remove {
            debug!("evicting context '{}'", context_id);
            if let Some(vector) = &self.vector {
                if let Err(e) = vector.delete_context(context_id).await {
                    warn!("vector delete for '{}' failed: {}", context_id, e);
                }
            }
            if let Some(graph) = &self.graph {
                if let Err(e) = graph.remove_context(context_id).await {
                    warn!("graph delete for '{}' failed: {}", context_id, e);
                }
            }
            {
                let mut hierarchy = self.hierarchy.write().await;
                hierarchy.shift_remove(context_id);
                for children in hierarchy.values_mut() {
                    children.shift_remove(context_id);
                }
            }
            self.states.remove(context_id);
            if let Err(e) = self.store.delete_summary(context_id).await {
                warn!("store delete for '{}' failed: {}", context_id, e);
            }
        }

        if !to_remove.is_empty() {
            self.metrics.contexts_evicted.inc_by(to_remove.len() as f64);
            info!(
                "eviction retained {} contexts, removed {}",
                retained.len(),
                to_remove.len()
            );
        }
        Ok(to_remove)
    }

    /// The summarizer capabilities resolved at construction
    pub fn capabilities(&self) -> SummarizerCapabilities {
        self.capabilities
    }
}

fn boost_or_insert(
    retained: &mut HashMap<String, RetainEntry>,
    context_id: &str,
    importance: f32,
    reason: &'static str,
) {
    retained
        .entry(context_id.to_string())
        .and_modify(|e| e.importance = (e.importance + 0.2).min(1.0))
        .or_insert(RetainEntry { importance, reason });
}

/// Source text for key-insight extraction: the stored messages, so bullet
/// points and decision language survive even terse generated summaries
fn summary_text_for_insights(state: &ContextWorkingState) -> String {
    state
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
