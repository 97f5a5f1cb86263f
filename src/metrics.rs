use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use tokio::time::Instant;

use crate::ErrorKind;

#[derive(Clone)]
pub struct Metrics {
    pub operations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub wait_attempts: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "reconcile_duration_seconds",
                "The duration of present, absent and describe operations in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60., 300., 600.]),
            &["kind", "operation"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!("reconcile_failures_total", "reconciliation errors"),
            &["kind", "error"],
        )
        .unwrap();
        let operations = IntCounterVec::new(
            opts!("reconcile_operations_total", "reconciliations"),
            &["kind", "operation"],
        )
        .unwrap();
        let wait_attempts = IntCounterVec::new(
            opts!("wait_attempts_total", "polls made while waiting on an acceptor"),
            &["kind"],
        )
        .unwrap();

        Metrics {
            operations,
            failures,
            reconcile_duration,
            wait_attempts,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.operations.clone()))?;
        registry.register(Box::new(self.wait_attempts.clone()))?;

        Ok(self)
    }

    pub fn reconcile_failure(&self, kind: &str, error: ErrorKind) {
        self.failures
            .with_label_values(&[kind, error.metric_label().as_ref()])
            .inc()
    }

    pub fn wait_attempts(&self, kind: &str, attempts: u32) {
        self.wait_attempts
            .with_label_values(&[kind])
            .inc_by(u64::from(attempts))
    }

    pub fn count_and_measure(&self, kind: &str, operation: &str) -> ReconcileMeasurer {
        self.operations.with_label_values(&[kind, operation]).inc();

        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.with_label_values(&[kind, operation]),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: prometheus::Histogram,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.observe(duration);
    }
}
