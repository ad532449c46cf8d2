//! End-to-end tests of the context memory engine: summarization policies,
//! similarity linking, the hierarchical cascade, and eviction.

use chrono::{Duration, Utc};
use context_memory::config::EngineConfig;
use context_memory::memory::{TokenEstimator, WordBasedEstimator};
use context_memory::{
    ContextMemoryEngine, ContextSummary, Direction, ExtractiveSummarizer, FileSummaryStore,
    GraphRepository, MemoryMetrics, MemorySummaryStore, Message, MessageRole, PathStrategy,
    RelationshipType, SummaryStore, VectorRepository,
};
use std::collections::HashSet;
use std::sync::Arc;

async fn build_engine(
    config: EngineConfig,
    store: Arc<dyn SummaryStore>,
    vector: Option<Arc<VectorRepository>>,
) -> ContextMemoryEngine {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    ContextMemoryEngine::with_components(
        config,
        store,
        Arc::new(ExtractiveSummarizer),
        vector,
        Some(Arc::new(GraphRepository::new(PathStrategy::Weighted))),
        Arc::new(WordBasedEstimator::default()),
        Arc::new(MemoryMetrics::new().unwrap()),
    )
    .await
    .unwrap()
}

fn user(content: &str) -> Message {
    Message::new(MessageRole::User, content)
}

fn stored_summary(id: &str, importance: f32, age_days: i64) -> ContextSummary {
    ContextSummary {
        context_id: id.to_string(),
        updated_at: Utc::now() - Duration::days(age_days),
        summary: format!("work on {}", id),
        code_blocks: vec![],
        message_count: 3,
        version: 1,
        key_insights: vec![],
        importance_score: importance,
        related_contexts: HashSet::new(),
    }
}

#[tokio::test]
async fn message_threshold_triggers_first_summary() {
    let store = Arc::new(MemorySummaryStore::new());
    let config = EngineConfig {
        message_limit_threshold: 5,
        ..Default::default()
    };
    let engine = build_engine(config, store.clone(), None).await;

    for i in 0..4 {
        let state = engine
            .add_message("ctx-a", user(&format!("working on step number {} today", i)))
            .await
            .unwrap();
        assert!(!state.has_summary);
    }
    let state = engine
        .add_message("ctx-a", user("finished the last step of the work"))
        .await
        .unwrap();

    assert!(state.has_summary);
    assert_eq!(state.messages_since_last_summary, 0);
    assert!(state.last_summarized_at.is_some());

    let summary = store.load_summary("ctx-a").await.unwrap().unwrap();
    assert_eq!(summary.version, 1);
    assert_eq!(summary.message_count, 5);
}

#[tokio::test]
async fn high_importance_messages_summarize_early() {
    let store = Arc::new(MemorySummaryStore::new());
    let config = EngineConfig {
        message_limit_threshold: 50,
        ..Default::default()
    };
    let engine = build_engine(config, store.clone(), None).await;

    engine
        .add_message("ctx-hot", user("starting a longer discussion about deploys"))
        .await
        .unwrap();
    engine
        .add_message("ctx-hot", user("urgent: production deploy is failing"))
        .await
        .unwrap();
    let state = engine
        .add_message("ctx-hot", user("this is a critical regression for customers"))
        .await
        .unwrap();

    assert!(state.has_summary);
    assert_eq!(store.load_summary("ctx-hot").await.unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn token_threshold_triggers_summarization() {
    let store = Arc::new(MemorySummaryStore::new());
    let config = EngineConfig {
        message_limit_threshold: 100,
        model_token_limit: 40,
        token_limit_percentage: 50.0,
        ..Default::default()
    };
    let engine = build_engine(config, store.clone(), None).await;

    // 16 words -> ~21 estimated tokens, past the 20-token threshold
    let long = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi";
    let state = engine.add_message("ctx-long", user(long)).await.unwrap();
    assert!(state.has_summary);
}

#[tokio::test]
async fn explicit_summarize_increments_version() {
    let store = Arc::new(MemorySummaryStore::new());
    let engine = build_engine(EngineConfig::default(), store.clone(), None).await;

    engine
        .add_message("ctx-v", user("first message about the schema design"))
        .await
        .unwrap();
    assert!(engine.summarize_context("ctx-v").await.unwrap());
    assert!(engine.summarize_context("ctx-v").await.unwrap());

    let summary = store.load_summary("ctx-v").await.unwrap().unwrap();
    assert_eq!(summary.version, 2);
}

#[tokio::test]
async fn similar_contexts_get_linked() {
    let store = Arc::new(MemorySummaryStore::new());
    let config = EngineConfig {
        message_limit_threshold: 2,
        similarity_threshold: 0.5,
        ..Default::default()
    };
    let vector = Arc::new(VectorRepository::fallback());
    let engine = build_engine(config, store.clone(), Some(vector)).await;

    engine.add_message("ctx-a", user("apples oranges")).await.unwrap();
    engine.add_message("ctx-a", user("apples oranges pears")).await.unwrap();

    engine.add_message("ctx-b", user("apples oranges")).await.unwrap();
    engine.add_message("ctx-b", user("apples oranges grapes")).await.unwrap();
    let state = engine.add_message("ctx-b", user("apples oranges")).await.unwrap();

    assert!(state.related_contexts.contains("ctx-a"));
    let related = engine
        .get_related_contexts("ctx-b", Some(RelationshipType::Similar), Direction::Outgoing)
        .await;
    assert_eq!(related, vec!["ctx-a".to_string()]);
}

#[tokio::test]
async fn similarity_exactly_at_threshold_is_not_linked() {
    let store = Arc::new(MemorySummaryStore::new());
    let config = EngineConfig {
        message_limit_threshold: 2,
        similarity_threshold: 0.5,
        ..Default::default()
    };
    let vector = Arc::new(VectorRepository::fallback());
    let engine = build_engine(config, store.clone(), Some(vector)).await;

    engine.add_message("ctx-a", user("apples oranges")).await.unwrap();
    engine.add_message("ctx-a", user("apples oranges")).await.unwrap();

    engine.add_message("ctx-b", user("apples oranges")).await.unwrap();
    engine.add_message("ctx-b", user("apples oranges")).await.unwrap();
    // one of two query terms overlaps ctx-a's summary: score 0.5, not above 0.5
    let state = engine.add_message("ctx-b", user("apples kiwi")).await.unwrap();

    assert!(state.related_contexts.is_empty());
    assert!(engine
        .get_related_contexts("ctx-b", Some(RelationshipType::Similar), Direction::Outgoing)
        .await
        .is_empty());
}

#[tokio::test]
async fn parent_relationship_cascades_on_summarization() {
    let store = Arc::new(MemorySummaryStore::new());
    let config = EngineConfig {
        message_limit_threshold: 2,
        ..Default::default()
    };
    let engine = build_engine(config, store.clone(), None).await;

    engine
        .add_relationship("topic-infra", "ctx-deploy", RelationshipType::Parent, 1.0, None)
        .await
        .unwrap();

    engine
        .add_message("ctx-deploy", user("rolled out the new deploy pipeline"))
        .await
        .unwrap();
    engine
        .add_message("ctx-deploy", user("pipeline needs a rollback stage"))
        .await
        .unwrap();

    let hierarchical = store
        .load_hierarchical_summary("topic-infra")
        .await
        .unwrap()
        .unwrap();
    assert!(hierarchical.child_context_ids.contains("ctx-deploy"));
    assert_eq!(hierarchical.summary.version, 1);

    // the reciprocal CHILD edge exists too
    let parents = engine
        .get_related_contexts("ctx-deploy", Some(RelationshipType::Child), Direction::Outgoing)
        .await;
    assert_eq!(parents, vec!["topic-infra".to_string()]);
}

#[tokio::test]
async fn eviction_spares_anchor_important_and_recent() {
    let store = Arc::new(MemorySummaryStore::new());
    store.save_summary(&stored_summary("anchor", 0.5, 0)).await.unwrap();
    store.save_summary(&stored_summary("stale-1", 0.3, 30)).await.unwrap();
    store.save_summary(&stored_summary("stale-2", 0.2, 30)).await.unwrap();
    store.save_summary(&stored_summary("precious", 0.9, 30)).await.unwrap();
    store.save_summary(&stored_summary("fresh", 0.3, 1)).await.unwrap();

    let config = EngineConfig {
        cleanup_floor: 2,
        retention_days: 7,
        ..Default::default()
    };
    let engine = build_engine(config, store.clone(), None).await;

    let mut removed = engine.cleanup_irrelevant_contexts("anchor").await.unwrap();
    removed.sort();
    assert_eq!(removed, vec!["stale-1".to_string(), "stale-2".to_string()]);

    assert!(store.load_summary("anchor").await.unwrap().is_some());
    assert!(store.load_summary("precious").await.unwrap().is_some());
    assert!(store.load_summary("fresh").await.unwrap().is_some());
    assert!(store.load_summary("stale-1").await.unwrap().is_none());
}

#[tokio::test]
async fn eviction_skipped_at_or_below_floor() {
    let store = Arc::new(MemorySummaryStore::new());
    store.save_summary(&stored_summary("anchor", 0.5, 0)).await.unwrap();
    store.save_summary(&stored_summary("stale", 0.1, 90)).await.unwrap();

    let config = EngineConfig {
        cleanup_floor: 2,
        ..Default::default()
    };
    let engine = build_engine(config, store.clone(), None).await;

    assert!(engine.cleanup_irrelevant_contexts("anchor").await.unwrap().is_empty());
    assert!(store.load_summary("stale").await.unwrap().is_some());
}

#[tokio::test]
async fn eviction_at_default_floor_removes_stale_bulk() {
    let store = Arc::new(MemorySummaryStore::new());
    store.save_summary(&stored_summary("anchor", 0.5, 0)).await.unwrap();
    for i in 0..12 {
        store
            .save_summary(&stored_summary(&format!("stale-{}", i), 0.2, 60))
            .await
            .unwrap();
    }
    let engine = build_engine(EngineConfig::default(), store.clone(), None).await;

    let removed = engine.cleanup_irrelevant_contexts("anchor").await.unwrap();
    assert_eq!(removed.len(), 12);
    assert!(store.load_summary("anchor").await.unwrap().is_some());
    assert_eq!(store.get_all_context_ids().await.unwrap(), vec!["anchor".to_string()]);
}

#[tokio::test]
async fn eviction_requires_anchor_summary() {
    let store = Arc::new(MemorySummaryStore::new());
    for i in 0..12 {
        store
            .save_summary(&stored_summary(&format!("ctx-{}", i), 0.1, 60))
            .await
            .unwrap();
    }
    let engine = build_engine(EngineConfig::default(), store.clone(), None).await;

    // unsummarized anchor means no eviction at all
    assert!(engine
        .cleanup_irrelevant_contexts("never-summarized")
        .await
        .unwrap()
        .is_empty());
    assert!(store.load_summary("ctx-0").await.unwrap().is_some());
}

#[tokio::test]
async fn eviction_spares_graph_neighbors() {
    let store = Arc::new(MemorySummaryStore::new());
    store.save_summary(&stored_summary("anchor", 0.5, 0)).await.unwrap();
    store.save_summary(&stored_summary("linked", 0.2, 60)).await.unwrap();
    store.save_summary(&stored_summary("stale", 0.2, 60)).await.unwrap();

    let config = EngineConfig {
        cleanup_floor: 1,
        ..Default::default()
    };
    let engine = build_engine(config, store.clone(), None).await;
    engine
        .add_relationship("anchor", "linked", RelationshipType::References, 0.9, None)
        .await
        .unwrap();

    let removed = engine.cleanup_irrelevant_contexts("anchor").await.unwrap();
    assert_eq!(removed, vec!["stale".to_string()]);
    assert!(store.load_summary("linked").await.unwrap().is_some());
}

#[tokio::test]
async fn eviction_spares_linked_contexts_with_path_like_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSummaryStore::new(dir.path()).await.unwrap());
    store.save_summary(&stored_summary("anchor", 0.5, 0)).await.unwrap();
    store.save_summary(&stored_summary("feat/login", 0.2, 60)).await.unwrap();
    store.save_summary(&stored_summary("stale", 0.2, 60)).await.unwrap();

    let config = EngineConfig {
        cleanup_floor: 1,
        ..Default::default()
    };
    let engine = build_engine(config, store.clone(), None).await;
    engine
        .add_relationship("anchor", "feat/login", RelationshipType::References, 0.9, None)
        .await
        .unwrap();

    let removed = engine.cleanup_irrelevant_contexts("anchor").await.unwrap();
    assert_eq!(removed, vec!["stale".to_string()]);
    assert!(store.load_summary("feat/login").await.unwrap().is_some());
    assert!(store.load_summary("stale").await.unwrap().is_none());
}

#[tokio::test]
async fn summaries_survive_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        message_limit_threshold: 2,
        ..Default::default()
    };

    {
        let store = Arc::new(FileSummaryStore::new(dir.path()).await.unwrap());
        let engine = build_engine(config.clone(), store, None).await;
        engine
            .add_message("ctx-persist", user("we chose postgres for the queue"))
            .await
            .unwrap();
        engine
            .add_message("ctx-persist", user("the queue table needs an index"))
            .await
            .unwrap();
    }

    let store = Arc::new(FileSummaryStore::new(dir.path()).await.unwrap());
    let engine = build_engine(config, store, None).await;
    let retrieved = engine
        .retrieve_context("ctx-persist")
        .await
        .unwrap()
        .unwrap();
    let summary = retrieved.summary.unwrap();
    assert_eq!(summary.version, 1);
    assert_eq!(summary.message_count, 2);
    // recent messages were in-memory only
    assert!(retrieved.recent_messages.is_empty());

    // hydrated working state carries summary bookkeeping forward
    let state = engine
        .add_message("ctx-persist", user("adding one more note"))
        .await
        .unwrap();
    assert!(state.has_summary);
    assert_eq!(state.messages.len(), 1);
}

#[tokio::test]
async fn estimator_matches_word_heuristic() {
    let estimator = WordBasedEstimator::default();
    assert_eq!(estimator.estimate(""), 0);
    assert_eq!(estimator.estimate("one two three"), 4);
}
