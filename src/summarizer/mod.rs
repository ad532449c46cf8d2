//! Pluggable summarization with advertised capabilities
//!
//! The engine requires `summarize`; hierarchical summaries, meta-summaries,
//! and importance analysis are optional capabilities advertised once at
//! construction. Absent capabilities cause the corresponding cascade step to
//! be skipped rather than probed per call.

use crate::error::{MemoryError, Result};
use crate::memory::models::{
    ContextSummary, HierarchicalSummary, ImportanceLevel, Message, MessageRole,
};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Optional capabilities a summarizer may advertise
#[derive(Debug, Clone, Copy, Default)]
pub struct SummarizerCapabilities {
    pub hierarchical: bool,
    pub meta: bool,
    pub importance_analysis: bool,
}

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Capabilities beyond plain summarization; queried once at engine
    /// construction.
    fn capabilities(&self) -> SummarizerCapabilities {
        SummarizerCapabilities::default()
    }

    /// Summarize the messages of a single context
    async fn summarize(&self, messages: &[Message], context_id: &str) -> Result<String>;

    /// Summarize a group of child summaries into one hierarchical text
    async fn summarize_hierarchy(
        &self,
        _summaries: &[ContextSummary],
        _parent_id: &str,
    ) -> Result<String> {
        Err(MemoryError::SummarizationFailed(
            "hierarchical summarization not supported".to_string(),
        ))
    }

    /// Summarize a group of hierarchical summaries into one meta text
    async fn summarize_meta(&self, _summaries: &[HierarchicalSummary]) -> Result<String> {
        Err(MemoryError::SummarizationFailed(
            "meta summarization not supported".to_string(),
        ))
    }

    /// Classify the importance of a single message
    async fn analyze_importance(
        &self,
        _message: &Message,
        _context_id: &str,
    ) -> Result<ImportanceLevel> {
        Err(MemoryError::SummarizationFailed(
            "importance analysis not supported".to_string(),
        ))
    }
}

/// Heuristic importance classification: urgency keywords rank High,
/// questions Medium, trivially short content Low, everything else Medium.
pub fn heuristic_importance(content: &str) -> ImportanceLevel {
    const URGENT: [&str; 7] = [
        "critical", "urgent", "important", "blocker", "asap", "immediately", "must",
    ];
    const INTERROGATIVES: [&str; 8] = ["what", "why", "how", "when", "where", "who", "can", "should"];

    let lower = content.to_lowercase();
    if URGENT.iter().any(|kw| lower.contains(kw)) {
        return ImportanceLevel::High;
    }
    let first_word = lower.split_whitespace().next().unwrap_or("");
    if lower.contains('?') || INTERROGATIVES.contains(&first_word) {
        return ImportanceLevel::Medium;
    }
    if content.chars().count() < 20 {
        return ImportanceLevel::Low;
    }
    ImportanceLevel::Medium
}

/// Extract up to `cap` deduplicated key insights from summary text.
///
/// Bullet lines are taken verbatim; otherwise sentences containing decision
/// or constraint markers are used.
pub fn extract_key_insights(text: &str, cap: usize) -> Vec<String> {
    const MARKERS: [&str; 6] = ["decided", "must", "key", "important", "constraint", "because"];

    let mut insights: Vec<String> = Vec::new();
    let mut push_unique = |candidate: &str| {
        let candidate = candidate.trim().trim_start_matches(['-', '*', ' ']).trim();
        if candidate.is_empty() {
            return;
        }
        if !insights.iter().any(|existing| existing == candidate) {
            insights.push(candidate.to_string());
        }
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("- ") || trimmed.starts_with("* ") {
            push_unique(trimmed);
        }
    }
    for sentence in text.split(['.', '\n']) {
        let lower = sentence.to_lowercase();
        if MARKERS.iter().any(|m| lower.contains(m)) {
            push_unique(sentence);
        }
    }

    insights.truncate(cap);
    insights
}

/// Configuration for the LLM summarizer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// LLM-based summarizer using an OpenAI-compatible chat completions API
pub struct LlmSummarizer {
    client: Client,
    config: SummarizerConfig,
}

impl LlmSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MemoryError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Run one prompt through the chat API with bounded retries
    async fn complete(&self, system: &str, prompt: String) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature: Some(0.3),
        };

        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                debug!("retry attempt {} for summarization", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }

            let mut req = self.client.post(&self.config.endpoint).json(&request);
            if let Some(ref api_key) = self.config.api_key {
                req = req.header(
                    "Authorization",
                    format!("Bearer {}", api_key.expose_secret()),
                );
            }

            match req.send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        last_error = Some(MemoryError::SummarizationFailed(format!(
                            "HTTP {}: {}",
                            status, body
                        )));
                        continue;
                    }
                    match response.json::<ChatCompletionResponse>().await {
                        Ok(resp) => {
                            if let Some(choice) = resp.choices.first() {
                                return Ok(choice.message.content.clone());
                            }
                            last_error = Some(MemoryError::SummarizationFailed(
                                "no choices in response".to_string(),
                            ));
                        }
                        Err(e) => {
                            last_error = Some(MemoryError::SummarizationFailed(format!(
                                "failed to parse response: {}",
                                e
                            )));
                        }
                    }
                }
                Err(e) => {
                    last_error = Some(MemoryError::SummarizationFailed(e.to_string()));
                }
            }
        }

        warn!(
            "summarization failed after {} attempts",
            self.config.max_retries
        );
        Err(last_error
            .unwrap_or_else(|| MemoryError::SummarizationFailed("no attempts made".to_string())))
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    fn capabilities(&self) -> SummarizerCapabilities {
        SummarizerCapabilities {
            hierarchical: true,
            meta: true,
            importance_analysis: false,
        }
    }

    async fn summarize(&self, messages: &[Message], context_id: &str) -> Result<String> {
        if messages.is_empty() {
            return Err(MemoryError::SummarizationFailed(
                "no messages to summarize".to_string(),
            ));
        }
        debug!(
            "summarizing {} messages for context '{}'",
            messages.len(),
            context_id
        );
        let transcript = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                };
                format!("{}: {}", role, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Summarize the following conversation concisely. \
            Preserve key decisions, constraints, code references, and open items.\n\n{}",
            transcript
        );
        self.complete(
            "You are a concise summarizer. Extract key information and compress it efficiently.",
            prompt,
        )
        .await
    }

    async fn summarize_hierarchy(
        &self,
        summaries: &[ContextSummary],
        parent_id: &str,
    ) -> Result<String> {
        debug!(
            "building hierarchical summary over {} children for '{}'",
            summaries.len(),
            parent_id
        );
        let combined = summaries
            .iter()
            .map(|s| format!("[{}] {}", s.context_id, s.summary))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = format!(
            "The following are summaries of related conversation topics. \
            Combine them into a single higher-level summary that captures the \
            shared themes and the most important specifics.\n\n{}",
            combined
        );
        self.complete("You are a concise summarizer of topic groups.", prompt)
            .await
    }

    async fn summarize_meta(&self, summaries: &[HierarchicalSummary]) -> Result<String> {
        let combined = summaries
            .iter()
            .map(|h| format!("[{}] {}", h.summary.context_id, h.summary.summary))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = format!(
            "The following are hierarchical summaries spanning many topics. \
            Produce one meta-summary of the overall body of work.\n\n{}",
            combined
        );
        self.complete("You are a concise summarizer of entire projects.", prompt)
            .await
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Deterministic extractive summarizer. Takes the leading sentence of each
/// input, so summaries stay stable for a fixed input set.
pub struct ExtractiveSummarizer;

fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.find(['.', '\n']) {
        Some(idx) => trimmed[..idx].trim(),
        None => trimmed,
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    fn capabilities(&self) -> SummarizerCapabilities {
        SummarizerCapabilities {
            hierarchical: true,
            meta: true,
            importance_analysis: true,
        }
    }

    async fn summarize(&self, messages: &[Message], _context_id: &str) -> Result<String> {
        if messages.is_empty() {
            return Err(MemoryError::SummarizationFailed(
                "no messages to summarize".to_string(),
            ));
        }
        let lines = messages
            .iter()
            .map(|m| first_sentence(&m.content))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(". ");
        Ok(format!(
            "Conversation over {} messages: {}",
            messages.len(),
            lines
        ))
    }

    async fn summarize_hierarchy(
        &self,
        summaries: &[ContextSummary],
        _parent_id: &str,
    ) -> Result<String> {
        let lines = summaries
            .iter()
            .map(|s| first_sentence(&s.summary))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(". ");
        Ok(format!("Group of {} topics: {}", summaries.len(), lines))
    }

    async fn summarize_meta(&self, summaries: &[HierarchicalSummary]) -> Result<String> {
        let lines = summaries
            .iter()
            .map(|h| first_sentence(&h.summary.summary))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(". ");
        Ok(format!("Meta view of {} groups: {}", summaries.len(), lines))
    }

    async fn analyze_importance(
        &self,
        message: &Message,
        _context_id: &str,
    ) -> Result<ImportanceLevel> {
        Ok(heuristic_importance(&message.content))
    }
}
