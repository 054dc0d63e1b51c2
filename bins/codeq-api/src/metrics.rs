// Prometheus exposition for the dispatch queue
// Gauges mirror QueueStatus at scrape time; submissions are counted as they happen.

use codeq_common::types::QueueStatus;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    submissions: IntCounterVec,
    pending: IntGauge,
    active: IntGauge,
    completed: IntGauge,
    failed: IntGauge,
    breaker_open: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let submissions = IntCounterVec::new(
            Opts::new("codeq_submissions_total", "Execution submissions by admission result"),
            &["result"],
        )?;
        let pending = IntGauge::new("codeq_queue_pending", "Requests waiting for dispatch")?;
        let active = IntGauge::new("codeq_queue_active", "Requests holding an execution slot")?;
        let completed = IntGauge::new(
            "codeq_queue_completed",
            "Requests that reached the backend and finished",
        )?;
        let failed = IntGauge::new(
            "codeq_queue_failed",
            "Requests resolved to a failure without a backend result",
        )?;
        let breaker_open =
            IntGauge::new("codeq_circuit_breaker_open", "1 while the circuit breaker is open")?;

        registry.register(Box::new(submissions.clone()))?;
        for gauge in [&pending, &active, &completed, &failed, &breaker_open] {
            registry.register(Box::new(gauge.clone()))?;
        }

        Ok(Self {
            registry,
            submissions,
            pending,
            active,
            completed,
            failed,
            breaker_open,
        })
    }

    pub fn record_submission(&self, accepted: bool) {
        let label = if accepted { "accepted" } else { "rejected" };
        self.submissions.with_label_values(&[label]).inc();
    }

    pub fn observe_status(&self, status: &QueueStatus) {
        self.pending.set(status.pending_count as i64);
        self.active.set(status.active_count as i64);
        self.completed.set(status.completed_count as i64);
        self.failed.set(status.failed_count as i64);
        self.breaker_open.set(status.circuit_breaker_open as i64);
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
