//! Durable, queryable conversation memory for AI agents.
//!
//! The engine ingests per-context messages, compresses them into summaries
//! once thresholds are crossed, cascades summaries up a hierarchy (leaf →
//! hierarchical → meta), maintains a similarity index with a deterministic
//! keyword fallback, tracks typed relationships between contexts in a graph,
//! and periodically evicts contexts that have become irrelevant.

pub mod config;
pub mod error;
pub mod graph;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod summarizer;
pub mod vector;

pub use config::MemoryConfig;
pub use error::{MemoryError, Result};
pub use graph::{ContextEdge, Direction, GraphRepository, PathStrategy, RelationshipType};
pub use memory::{
    ContextMemoryEngine, ContextSummary, ContextWorkingState, HierarchicalCascade,
    HierarchicalSummary, ImportanceLevel, Message, MessageRole, MetaSummary,
};
pub use metrics::MemoryMetrics;
pub use store::{FileSummaryStore, MemorySummaryStore, SummaryStore};
pub use summarizer::{
    ExtractiveSummarizer, LlmSummarizer, Summarizer, SummarizerCapabilities, SummarizerConfig,
};
pub use vector::{Embedder, KeywordIndex, SimilarContext, VectorRepository};
