//! Metrics collection for observability
//!
//! `MemoryMetrics` owns its own registry and is passed into constructors as
//! an explicit `Arc` handle; there is no process-wide singleton.

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, register_int_gauge_with_registry, Counter, CounterVec,
    Histogram, IntGauge, Opts, Registry,
};

/// Metrics for the context memory engine
pub struct MemoryMetrics {
    registry: Registry,

    pub messages_ingested: CounterVec,
    pub summarizations: CounterVec,
    pub summarization_duration: Histogram,
    pub contexts_evicted: Counter,
    pub vector_fallback_active: IntGauge,
    pub graph_edges: IntGauge,
}

impl MemoryMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let messages_ingested = register_counter_vec_with_registry!(
            Opts::new("memory_messages_ingested_total", "Messages added to contexts"),
            &["importance"],
            registry
        )?;

        let summarizations = register_counter_vec_with_registry!(
            Opts::new("memory_summarizations_total", "Summarization attempts by outcome"),
            &["outcome"],
            registry
        )?;

        let summarization_duration = register_histogram_with_registry!(
            "memory_summarization_duration_seconds",
            "Summarization latency in seconds",
            registry
        )?;

        let contexts_evicted = register_counter_with_registry!(
            Opts::new("memory_contexts_evicted_total", "Contexts removed by eviction passes"),
            registry
        )?;

        let vector_fallback_active = register_int_gauge_with_registry!(
            Opts::new(
                "memory_vector_fallback_active",
                "1 when the vector repository degraded to keyword fallback"
            ),
            registry
        )?;

        let graph_edges = register_int_gauge_with_registry!(
            Opts::new("memory_graph_edges", "Current relationship edge count"),
            registry
        )?;

        Ok(Self {
            registry,
            messages_ingested,
            summarizations,
            summarization_duration,
            contexts_evicted,
            vector_fallback_active,
            graph_edges,
        })
    }

    /// The registry to expose through whatever endpoint the embedding
    /// application provides
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
