//! Typed relationship graph over context ids
//!
//! Directed, weighted multigraph keyed by (source, target, type). PARENT and
//! CHILD edges are kept reciprocal through a non-reciprocating insert
//! primitive. Path finding resolves its strategy once at construction:
//! weighted shortest path (edge cost 1/weight, so stronger ties are
//! preferred) or plain BFS. Both strategies traverse the undirected view so
//! their direction conventions agree.

use crate::error::{MemoryError, Result};
use crate::store::SummaryStore;
use indexmap::{IndexMap, IndexSet};
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

/// Edge label in the relationship graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Similar,
    Continues,
    References,
    Parent,
    Child,
}

impl RelationshipType {
    /// The edge type that must exist in the opposite direction, if any
    pub fn reciprocal(&self) -> Option<RelationshipType> {
        match self {
            RelationshipType::Parent => Some(RelationshipType::Child),
            RelationshipType::Child => Some(RelationshipType::Parent),
            _ => None,
        }
    }
}

/// A directed, weighted, typed edge between two contexts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEdge {
    pub source: String,
    pub target: String,
    pub relationship: RelationshipType,
    /// Always within [0,1]
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Direction filter for relationship queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Path-finding strategy, resolved once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStrategy {
    /// Shortest path by summed 1/weight edge cost
    Weighted,
    /// Unweighted BFS shortest path
    BasicBfs,
}

type EdgeKey = (String, String, RelationshipType);

/// Directed, weighted, typed multigraph over context ids
pub struct GraphRepository {
    edges: RwLock<IndexMap<EdgeKey, ContextEdge>>,
    strategy: PathStrategy,
    store: Option<Arc<dyn SummaryStore>>,
    loaded: OnceCell<()>,
}

fn clamp_weight(weight: f32) -> f32 {
    if weight.is_finite() {
        weight.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Non-reciprocating insert primitive. Upserts exactly one edge and never
/// inserts a reciprocal, so reciprocal handling cannot recurse.
fn insert_edge(
    edges: &mut IndexMap<EdgeKey, ContextEdge>,
    source: &str,
    target: &str,
    relationship: RelationshipType,
    weight: f32,
    metadata: Option<serde_json::Value>,
) {
    let key = (source.to_string(), target.to_string(), relationship);
    match edges.get_mut(&key) {
        Some(edge) => {
            // re-adding replaces weight and metadata in place
            edge.weight = weight;
            edge.metadata = metadata;
        }
        None => {
            edges.insert(
                key,
                ContextEdge {
                    source: source.to_string(),
                    target: target.to_string(),
                    relationship,
                    weight,
                    metadata,
                },
            );
        }
    }
}

impl GraphRepository {
    /// In-memory repository without persistence
    pub fn new(strategy: PathStrategy) -> Self {
        Self {
            edges: RwLock::new(IndexMap::new()),
            strategy,
            store: None,
            loaded: OnceCell::new(),
        }
    }

    /// Repository persisting its edge list as one document in `store`
    pub fn with_store(strategy: PathStrategy, store: Arc<dyn SummaryStore>) -> Self {
        Self {
            edges: RwLock::new(IndexMap::new()),
            strategy,
            store: Some(store),
            loaded: OnceCell::new(),
        }
    }

    pub fn strategy(&self) -> PathStrategy {
        self.strategy
    }

    /// Idempotent one-shot load of the persisted edge list. Concurrent
    /// first callers await the same in-flight load; a failed load leaves the
    /// graph empty for the lifetime of the instance.
    async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                let Some(store) = &self.store else {
                    return;
                };
                match store.load_graph().await {
                    Ok(persisted) => {
                        let mut edges = self.edges.write().await;
                        for edge in persisted {
                            insert_edge(
                                &mut edges,
                                &edge.source,
                                &edge.target,
                                edge.relationship,
                                clamp_weight(edge.weight),
                                edge.metadata,
                            );
                        }
                        debug!("loaded {} relationship edges", edges.len());
                    }
                    Err(e) => {
                        warn!("failed to load relationship graph, starting empty: {}", e);
                    }
                }
            })
            .await;
    }

    async fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let edges: Vec<ContextEdge> = self.edges.read().await.values().cloned().collect();
        store
            .save_graph(&edges)
            .await
            .map_err(|e| MemoryError::Store(format!("failed to persist graph: {}", e)))
    }

    /// Upsert an edge. Self-loops are rejected silently, weights clamped to
    /// [0,1], and PARENT/CHILD edges get their reciprocal upserted with the
    /// same weight.
    pub async fn add_relationship(
        &self,
        source: &str,
        target: &str,
        relationship: RelationshipType,
        weight: f32,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        if source == target {
            return Ok(());
        }
        self.ensure_loaded().await;
        let weight = clamp_weight(weight);
        {
            let mut edges = self.edges.write().await;
            insert_edge(&mut edges, source, target, relationship, weight, metadata.clone());
            if let Some(reciprocal) = relationship.reciprocal() {
                insert_edge(&mut edges, target, source, reciprocal, weight, metadata);
            }
        }
        self.persist().await
    }

    /// All edges touching `context_id` in the requested direction
    pub async fn get_relationships(&self, context_id: &str, direction: Direction) -> Vec<ContextEdge> {
        self.ensure_loaded().await;
        let edges = self.edges.read().await;
        edges
            .values()
            .filter(|e| match direction {
                Direction::Outgoing => e.source == context_id,
                Direction::Incoming => e.target == context_id,
                Direction::Both => e.source == context_id || e.target == context_id,
            })
            .cloned()
            .collect()
    }

    /// Deduplicated neighbor ids, optionally filtered by edge type
    pub async fn get_related_contexts(
        &self,
        context_id: &str,
        relationship: Option<RelationshipType>,
        direction: Direction,
    ) -> Vec<String> {
        self.ensure_loaded().await;
        let edges = self.edges.read().await;
        let mut related: IndexSet<String> = IndexSet::new();
        for edge in edges.values() {
            if let Some(filter) = relationship {
                if edge.relationship != filter {
                    continue;
                }
            }
            let outgoing = edge.source == context_id;
            let incoming = edge.target == context_id;
            match direction {
                Direction::Outgoing if outgoing => {
                    related.insert(edge.target.clone());
                }
                Direction::Incoming if incoming => {
                    related.insert(edge.source.clone());
                }
                Direction::Both if outgoing || incoming => {
                    related.insert(if outgoing {
                        edge.target.clone()
                    } else {
                        edge.source.clone()
                    });
                }
                _ => {}
            }
        }
        related.into_iter().collect()
    }

    /// Remove every edge where `context_id` appears as source or target
    pub async fn remove_context(&self, context_id: &str) -> Result<()> {
        self.ensure_loaded().await;
        {
            let mut edges = self.edges.write().await;
            edges.retain(|_, e| e.source != context_id && e.target != context_id);
        }
        self.persist().await
    }

    /// Shortest path between two contexts over the undirected view.
    /// Returns `[source]` when the endpoints are equal, `[]` when the graph
    /// has no edges or the target is unreachable.
    pub async fn find_path(&self, source: &str, target: &str) -> Vec<String> {
        if source == target {
            return vec![source.to_string()];
        }
        self.ensure_loaded().await;
        let edges = self.edges.read().await;
        if edges.is_empty() {
            return Vec::new();
        }
        match self.strategy {
            PathStrategy::Weighted => weighted_path(&edges, source, target),
            PathStrategy::BasicBfs => bfs_path(&edges, source, target),
        }
    }

    /// Connected components of the undirected view
    pub async fn find_communities(&self) -> Vec<Vec<String>> {
        self.ensure_loaded().await;
        let edges = self.edges.read().await;
        let adjacency = build_adjacency(&edges);

        let mut communities = Vec::new();
        let mut visited: IndexSet<&str> = IndexSet::new();
        for node in adjacency.keys() {
            if visited.contains(node.as_str()) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back(node.as_str());
            visited.insert(node.as_str());
            while let Some(current) = queue.pop_front() {
                component.push(current.to_string());
                if let Some(neighbors) = adjacency.get(current) {
                    for neighbor in neighbors {
                        if visited.insert(neighbor.as_str()) {
                            queue.push_back(neighbor.as_str());
                        }
                    }
                }
            }
            communities.push(component);
        }
        communities
    }

    /// Total number of stored edges
    pub async fn edge_count(&self) -> usize {
        self.ensure_loaded().await;
        self.edges.read().await.len()
    }
}

fn build_adjacency(edges: &IndexMap<EdgeKey, ContextEdge>) -> IndexMap<String, IndexSet<String>> {
    let mut adjacency: IndexMap<String, IndexSet<String>> = IndexMap::new();
    for edge in edges.values() {
        adjacency
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.target.clone());
        adjacency
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.source.clone());
    }
    adjacency
}

fn weighted_path(edges: &IndexMap<EdgeKey, ContextEdge>, source: &str, target: &str) -> Vec<String> {
    let mut nodes: IndexSet<&str> = IndexSet::new();
    for edge in edges.values() {
        nodes.insert(edge.source.as_str());
        nodes.insert(edge.target.as_str());
    }
    let mut graph: UnGraph<&str, f64> = UnGraph::new_undirected();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &nodes {
        indices.insert(*node, graph.add_node(*node));
    }
    let (Some(&start), Some(&goal)) = (indices.get(source), indices.get(target)) else {
        return Vec::new();
    };
    for edge in edges.values() {
        let cost = if edge.weight > 0.0 {
            1.0 / f64::from(edge.weight)
        } else {
            f64::MAX
        };
        graph.add_edge(indices[edge.source.as_str()], indices[edge.target.as_str()], cost);
    }

    match petgraph::algo::astar(&graph, start, |n| n == goal, |e| *e.weight(), |_| 0.0) {
        Some((_, path)) => path.into_iter().map(|idx| graph[idx].to_string()).collect(),
        None => Vec::new(),
    }
}

fn bfs_path(edges: &IndexMap<EdgeKey, ContextEdge>, source: &str, target: &str) -> Vec<String> {
    let adjacency = build_adjacency(edges);
    if !adjacency.contains_key(source) || !adjacency.contains_key(target) {
        return Vec::new();
    }
    let mut predecessors: HashMap<&str, &str> = HashMap::new();
    let mut visited: IndexSet<&str> = IndexSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(source);
    visited.insert(source);
    while let Some(current) = queue.pop_front() {
        if current == target {
            let mut path = vec![target.to_string()];
            let mut cursor = target;
            while let Some(&prev) = predecessors.get(cursor) {
                path.push(prev.to_string());
                cursor = prev;
            }
            path.reverse();
            return path;
        }
        if let Some(neighbors) = adjacency.get(current) {
            for neighbor in neighbors {
                if visited.insert(neighbor.as_str()) {
                    predecessors.insert(neighbor.as_str(), current);
                    queue.push_back(neighbor.as_str());
                }
            }
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn graph(strategy: PathStrategy) -> GraphRepository {
        GraphRepository::new(strategy)
    }

    #[tokio::test]
    async fn weight_is_clamped() {
        let g = graph(PathStrategy::Weighted).await;
        g.add_relationship("a", "b", RelationshipType::Similar, 7.0, None)
            .await
            .unwrap();
        g.add_relationship("a", "c", RelationshipType::Similar, -3.0, None)
            .await
            .unwrap();
        let edges = g.get_relationships("a", Direction::Outgoing).await;
        for edge in &edges {
            assert!((0.0..=1.0).contains(&edge.weight));
        }
        assert_eq!(edges.len(), 2);
    }

    #[tokio::test]
    async fn parent_creates_reciprocal_child() {
        let g = graph(PathStrategy::Weighted).await;
        g.add_relationship("a", "b", RelationshipType::Parent, 0.9, None)
            .await
            .unwrap();
        let b_edges = g.get_relationships("b", Direction::Outgoing).await;
        assert_eq!(b_edges.len(), 1);
        assert_eq!(b_edges[0].relationship, RelationshipType::Child);
        assert_eq!(b_edges[0].target, "a");
        assert_eq!(b_edges[0].weight, 0.9);
        // reciprocal insertion does not cascade further
        assert_eq!(g.edge_count().await, 2);

        g.add_relationship("b", "a", RelationshipType::Child, 0.4, None)
            .await
            .unwrap();
        // same keys, updated in place
        assert_eq!(g.edge_count().await, 2);
        let a_edges = g.get_relationships("a", Direction::Outgoing).await;
        assert_eq!(a_edges[0].weight, 0.4);
    }

    #[tokio::test]
    async fn self_loop_is_a_noop() {
        let g = graph(PathStrategy::Weighted).await;
        g.add_relationship("a", "a", RelationshipType::Similar, 0.5, None)
            .await
            .unwrap();
        assert_eq!(g.edge_count().await, 0);
        assert!(g.get_relationships("a", Direction::Both).await.is_empty());
    }

    #[tokio::test]
    async fn readd_updates_in_place() {
        let g = graph(PathStrategy::Weighted).await;
        g.add_relationship("a", "b", RelationshipType::Similar, 0.2, None)
            .await
            .unwrap();
        g.add_relationship(
            "a",
            "b",
            RelationshipType::Similar,
            0.8,
            Some(serde_json::json!({"inferred": true})),
        )
        .await
        .unwrap();
        let edges = g.get_relationships("a", Direction::Outgoing).await;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 0.8);
        assert!(edges[0].metadata.is_some());

        // re-adding without metadata clears it
        g.add_relationship("a", "b", RelationshipType::Similar, 0.8, None)
            .await
            .unwrap();
        let edges = g.get_relationships("a", Direction::Outgoing).await;
        assert_eq!(edges.len(), 1);
        assert!(edges[0].metadata.is_none());
    }

    #[tokio::test]
    async fn path_trivial_cases() {
        let g = graph(PathStrategy::Weighted).await;
        assert_eq!(g.find_path("a", "a").await, vec!["a".to_string()]);
        assert!(g.find_path("a", "b").await.is_empty());
    }

    #[tokio::test]
    async fn chain_path_both_strategies() {
        for strategy in [PathStrategy::Weighted, PathStrategy::BasicBfs] {
            let g = graph(strategy).await;
            for (s, t) in [("a", "b"), ("b", "c"), ("c", "d")] {
                g.add_relationship(s, t, RelationshipType::Continues, 1.0, None)
                    .await
                    .unwrap();
            }
            let path = g.find_path("a", "d").await;
            assert_eq!(path, vec!["a", "b", "c", "d"], "strategy {:?}", strategy);
            assert!(g.find_path("a", "zzz").await.is_empty());
        }
    }

    #[tokio::test]
    async fn weighted_path_prefers_strong_edges() {
        let g = graph(PathStrategy::Weighted).await;
        // direct but weak edge vs. two strong hops
        g.add_relationship("a", "d", RelationshipType::Similar, 0.1, None)
            .await
            .unwrap();
        g.add_relationship("a", "b", RelationshipType::Similar, 1.0, None)
            .await
            .unwrap();
        g.add_relationship("b", "d", RelationshipType::Similar, 1.0, None)
            .await
            .unwrap();
        // 1/0.1 = 10 > 1/1 + 1/1 = 2
        assert_eq!(g.find_path("a", "d").await, vec!["a", "b", "d"]);
    }

    #[tokio::test]
    async fn remove_context_drops_all_edges() {
        let g = graph(PathStrategy::Weighted).await;
        g.add_relationship("x", "y", RelationshipType::Similar, 0.5, None)
            .await
            .unwrap();
        g.add_relationship("z", "x", RelationshipType::References, 0.5, None)
            .await
            .unwrap();
        g.add_relationship("y", "z", RelationshipType::Similar, 0.5, None)
            .await
            .unwrap();
        g.remove_context("x").await.unwrap();
        for id in ["x", "y", "z"] {
            for edge in g.get_relationships(id, Direction::Both).await {
                assert_ne!(edge.source, "x");
                assert_ne!(edge.target, "x");
            }
        }
        assert!(g.get_related_contexts("x", None, Direction::Both).await.is_empty());
    }

    #[tokio::test]
    async fn related_contexts_filters_and_dedupes() {
        let g = graph(PathStrategy::Weighted).await;
        g.add_relationship("a", "b", RelationshipType::Similar, 0.5, None)
            .await
            .unwrap();
        g.add_relationship("a", "b", RelationshipType::References, 0.5, None)
            .await
            .unwrap();
        g.add_relationship("c", "a", RelationshipType::Continues, 0.5, None)
            .await
            .unwrap();

        let all = g.get_related_contexts("a", None, Direction::Both).await;
        assert_eq!(all.len(), 2); // b deduped, plus c

        let similar = g
            .get_related_contexts("a", Some(RelationshipType::Similar), Direction::Outgoing)
            .await;
        assert_eq!(similar, vec!["b".to_string()]);

        let incoming = g.get_related_contexts("a", None, Direction::Incoming).await;
        assert_eq!(incoming, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn communities_are_connected_components() {
        let g = graph(PathStrategy::BasicBfs).await;
        g.add_relationship("a", "b", RelationshipType::Similar, 0.5, None)
            .await
            .unwrap();
        g.add_relationship("b", "c", RelationshipType::Similar, 0.5, None)
            .await
            .unwrap();
        g.add_relationship("x", "y", RelationshipType::Similar, 0.5, None)
            .await
            .unwrap();
        let mut communities = g.find_communities().await;
        for community in &mut communities {
            community.sort();
        }
        communities.sort();
        assert_eq!(
            communities,
            vec![
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                vec!["x".to_string(), "y".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn persists_and_reloads_edges() {
        let store = Arc::new(crate::store::MemorySummaryStore::new());
        let g = GraphRepository::with_store(PathStrategy::Weighted, store.clone());
        g.add_relationship("a", "b", RelationshipType::Similar, 0.5, None)
            .await
            .unwrap();

        let g2 = GraphRepository::with_store(PathStrategy::Weighted, store);
        assert_eq!(g2.edge_count().await, 1);
        let edges = g2.get_relationships("a", Direction::Outgoing).await;
        assert_eq!(edges[0].target, "b");
    }
}
