//! # Loopwright Observability
//!
//! Run tracing for the Loopwright agent runtime: the per-run [`Tracer`] that
//! records a span tree for each think → act → observe cycle, Prometheus
//! metrics for run outcomes, and the `tracing` subscriber setup.

#[cfg(feature = "metrics")]
pub mod metrics;

pub mod trace;
pub mod tracer;

#[cfg(feature = "metrics")]
pub use metrics::{MetricsError, RunOutcome, RuntimeMetrics};

pub use trace::init_tracing;
pub use tracer::Tracer;

/// Standard latency buckets, 5ms to 10s
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.01,  // 10ms
    0.02,  // 20ms
    0.05,  // 50ms
    0.1,   // 100ms
    0.2,   // 200ms
    0.5,   // 500ms
    1.0,   // 1s
    2.5,   // 2.5s
    5.0,   // 5s
    10.0,  // 10s
];

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// JSON lines instead of human-readable output
    pub json_logs: bool,
    pub metrics_enabled: bool,
    /// Metrics name prefix
    pub namespace: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: true,
            namespace: "loopwright".to_string(),
        }
    }
}

/// Handles produced by [`init_observability`]
#[derive(Debug, Default)]
pub struct Observability {
    #[cfg(feature = "metrics")]
    pub metrics: Option<std::sync::Arc<RuntimeMetrics>>,
}

/// Install logging and build the metrics registry.
pub fn init_observability(config: ObservabilityConfig) -> Result<Observability, ObservabilityError> {
    trace::init_tracing(&config)?;

    #[cfg(feature = "metrics")]
    {
        let metrics = if config.metrics_enabled {
            Some(std::sync::Arc::new(
                RuntimeMetrics::new(&config.namespace)
                    .map_err(|e| ObservabilityError::MetricsInit(e.to_string()))?,
            ))
        } else {
            None
        };
        Ok(Observability { metrics })
    }

    #[cfg(not(feature = "metrics"))]
    Ok(Observability::default())
}

/// Observability errors
#[derive(thiserror::Error, Debug)]
pub enum ObservabilityError {
    #[error("Metrics initialization failed: {0}")]
    MetricsInit(String),

    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
