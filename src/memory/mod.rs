//! Context memory: per-context state, summarization policy, and the
//! hierarchical cascade

pub mod cascade;
pub mod engine;
pub mod models;
pub mod token_estimator;

pub use cascade::{HierarchicalCascade, HierarchyMap};
pub use engine::{ContextMemoryEngine, RetrievedContext};
pub use models::{
    CodeBlock, ContextSummary, ContextWorkingState, HierarchicalSummary, ImportanceLevel, Message,
    MessageRole, MetaSummary,
};
pub use token_estimator::{TiktokenEstimator, TokenEstimator, WordBasedEstimator};
