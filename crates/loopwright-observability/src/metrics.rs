//! Runtime metrics.
//!
//! Each [`RuntimeMetrics`] owns its own Prometheus registry so several
//! runtimes (or tests) can coexist in one process without name clashes.

use crate::LATENCY_BUCKETS;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct RuntimeMetrics {
    registry: Registry,
    pub runs_total: IntCounterVec,              // cardinality: 3 (success|failure|escalated)
    pub phase_errors_total: IntCounterVec,      // cardinality: 3 (think|act|observe)
    pub run_duration_seconds: Histogram,        // cardinality: 1
    pub spans_recorded_total: IntCounter,       // cardinality: 1
    pub messages_sent_total: IntCounterVec,     // cardinality: 4 (priority)
    pub approvals_requested_total: IntCounterVec, // cardinality: ≤5 (hook_type)
}

impl RuntimeMetrics {
    pub fn new(namespace: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let runs_total = IntCounterVec::new(
            Opts::new(
                format!("{namespace}_runs_total"),
                "Total number of completed runs by outcome",
            ),
            &["outcome"],
        )?;
        let phase_errors_total = IntCounterVec::new(
            Opts::new(
                format!("{namespace}_phase_errors_total"),
                "Worker-logic failures by phase",
            ),
            &["phase"],
        )?;
        let run_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                format!("{namespace}_run_duration_seconds"),
                "Wall-clock duration of a run in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let spans_recorded_total = IntCounter::new(
            format!("{namespace}_spans_recorded_total"),
            "Spans flushed at the end of runs",
        )?;
        let messages_sent_total = IntCounterVec::new(
            Opts::new(
                format!("{namespace}_messages_sent_total"),
                "Mailbox messages sent by priority",
            ),
            &["priority"],
        )?;
        let approvals_requested_total = IntCounterVec::new(
            Opts::new(
                format!("{namespace}_approvals_requested_total"),
                "Human approvals requested by hook type",
            ),
            &["hook_type"],
        )?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(phase_errors_total.clone()))?;
        registry.register(Box::new(run_duration_seconds.clone()))?;
        registry.register(Box::new(spans_recorded_total.clone()))?;
        registry.register(Box::new(messages_sent_total.clone()))?;
        registry.register(Box::new(approvals_requested_total.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            phase_errors_total,
            run_duration_seconds,
            spans_recorded_total,
            messages_sent_total,
            approvals_requested_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_run(&self, outcome: RunOutcome, duration: Duration, spans: usize) {
        self.runs_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        self.run_duration_seconds.observe(duration.as_secs_f64());
        self.spans_recorded_total.inc_by(spans as u64);
    }

    pub fn record_phase_error(&self, phase: &str) {
        self.phase_errors_total.with_label_values(&[phase]).inc();
    }

    pub fn record_message_sent(&self, priority: &str) {
        self.messages_sent_total.with_label_values(&[priority]).inc();
    }

    pub fn record_approval_requested(&self, hook_type: &str) {
        self.approvals_requested_total
            .with_label_values(&[hook_type])
            .inc();
    }

    /// Prometheus text exposition of every metric in this registry
    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
    Escalated,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Failure => "failure",
            RunOutcome::Escalated => "escalated",
        }
    }
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics encoding failed: {0}")]
    Encoding(String),
}
