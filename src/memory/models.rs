//! Data models for context memory

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Role of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Ordinal importance attached to messages and summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ImportanceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceLevel::Low => "low",
            ImportanceLevel::Medium => "medium",
            ImportanceLevel::High => "high",
            ImportanceLevel::Critical => "critical",
        }
    }

    /// Numeric weight used in retention scoring
    pub fn score(&self) -> f32 {
        match self {
            ImportanceLevel::Low => 0.25,
            ImportanceLevel::Medium => 0.5,
            ImportanceLevel::High => 0.75,
            ImportanceLevel::Critical => 1.0,
        }
    }
}

/// A single conversation message, immutable once appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub importance: Option<ImportanceLevel>,
    #[serde(default)]
    pub tags: HashSet<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            importance: None,
            tags: HashSet::new(),
        }
    }

    pub fn with_importance(mut self, importance: ImportanceLevel) -> Self {
        self.importance = Some(importance);
        self
    }
}

/// A code block extracted from conversation content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
    /// Importance in [0,1]
    pub importance: f32,
    /// Context the block originated from, set when aggregated upward
    pub source_context_id: Option<String>,
}

/// Current compressed summary of one context. Replacing it increments
/// `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub context_id: String,
    pub updated_at: DateTime<Utc>,
    pub summary: String,
    #[serde(default)]
    pub code_blocks: Vec<CodeBlock>,
    pub message_count: usize,
    /// Monotonically increasing, starts at 1
    pub version: u32,
    #[serde(default)]
    pub key_insights: Vec<String>,
    pub importance_score: f32,
    #[serde(default)]
    pub related_contexts: HashSet<String>,
}

/// A summary aggregated over a group of child context summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchicalSummary {
    #[serde(flatten)]
    pub summary: ContextSummary,
    pub parent_context_id: Option<String>,
    #[serde(default)]
    pub child_context_ids: IndexSet<String>,
    /// 0 = leaf-adjacent, increasing toward the root
    pub hierarchy_level: u32,
}

/// A summary aggregated over a group of hierarchical summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: String,
    pub context_ids: Vec<String>,
    /// Top 10 code blocks by importance across covered summaries
    #[serde(default)]
    pub shared_code_blocks: Vec<CodeBlock>,
    pub hierarchy_level: u32,
}

/// Per-context in-memory state. Created lazily on first access, hydrated
/// from persisted data, destroyed on eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWorkingState {
    pub context_id: String,
    pub messages: Vec<Message>,
    /// Running token estimate across appended messages
    pub token_count: usize,
    pub messages_since_last_summary: usize,
    pub has_summary: bool,
    pub last_summarized_at: Option<DateTime<Utc>>,
    pub importance_score: f32,
    #[serde(default)]
    pub related_contexts: HashSet<String>,
    pub parent_context_id: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl ContextWorkingState {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            messages: Vec::new(),
            token_count: 0,
            messages_since_last_summary: 0,
            has_summary: false,
            last_summarized_at: None,
            importance_score: 0.5,
            related_contexts: HashSet::new(),
            parent_context_id: None,
            last_activity: Utc::now(),
        }
    }
}

/// Extract fenced code blocks (```lang ... ```) from message content
pub fn extract_code_blocks(content: &str, importance: f32) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let Some(end) = after_fence.find("```") else {
            break;
        };
        let fenced = &after_fence[..end];
        let (language, code) = match fenced.split_once('\n') {
            Some((first, body)) => {
                let lang = first.trim();
                if lang.is_empty() {
                    (None, body)
                } else {
                    (Some(lang.to_string()), body)
                }
            }
            None => (None, fenced),
        };
        let code = code.trim();
        if !code.is_empty() {
            blocks.push(CodeBlock {
                language,
                code: code.to_string(),
                importance: importance.clamp(0.0, 1.0),
                source_context_id: None,
            });
        }
        rest = &after_fence[end + 3..];
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_ordering_follows_score() {
        assert!(ImportanceLevel::Critical > ImportanceLevel::High);
        assert!(ImportanceLevel::High > ImportanceLevel::Medium);
        assert!(ImportanceLevel::Medium > ImportanceLevel::Low);
        assert_eq!(ImportanceLevel::Critical.score(), 1.0);
        assert_eq!(ImportanceLevel::Low.score(), 0.25);
    }

    #[test]
    fn extracts_fenced_code_blocks() {
        let content = "Here is the fix:\n```rust\nfn main() {}\n```\nand a raw one ```let x = 1;```";
        let blocks = extract_code_blocks(content, 0.75);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language.as_deref(), Some("rust"));
        assert_eq!(blocks[0].code, "fn main() {}");
        assert_eq!(blocks[1].language, None);
        assert_eq!(blocks[1].importance, 0.75);
    }

    #[test]
    fn no_blocks_in_plain_text() {
        assert!(extract_code_blocks("no code here", 0.5).is_empty());
    }

    #[test]
    fn hierarchical_summary_serde_roundtrip() {
        let hs = HierarchicalSummary {
            summary: ContextSummary {
                context_id: "parent-1".to_string(),
                updated_at: Utc::now(),
                summary: "combined".to_string(),
                code_blocks: vec![],
                message_count: 12,
                version: 2,
                key_insights: vec!["uses tokio".to_string()],
                importance_score: 0.6,
                related_contexts: HashSet::new(),
            },
            parent_context_id: None,
            child_context_ids: ["a", "b"].iter().map(|s| s.to_string()).collect(),
            hierarchy_level: 0,
        };
        let json = serde_json::to_string(&hs).unwrap();
        let back: HierarchicalSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.summary.context_id, "parent-1");
        assert_eq!(back.child_context_ids.len(), 2);
    }
}
