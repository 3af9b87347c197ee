//! Metrics hook consumed by the engine, decoupled from any particular
//! exposition format. A host process wires a concrete sink in; the engine
//! never knows whether that sink writes to a log line, a Prometheus
//! registry, or nowhere at all.

use std::sync::Arc;

/// Minimal numeric telemetry surface. Labels are passed as `&str` pairs
/// rather than a richer type so the trait stays dependency-free.
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
    fn inc_counter(&self, name: &str, labels: &[(&str, &str)], n: u64);
}

/// Discards everything. Used where no sink is configured.
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
    fn inc_counter(&self, _name: &str, _labels: &[(&str, &str)], _n: u64) {}
}

pub type SharedMetricsSink = Arc<dyn MetricsSink>;

pub fn noop_sink() -> SharedMetricsSink {
    Arc::new(NoopMetricsSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_does_not_panic() {
        let sink = noop_sink();
        sink.set_gauge("x", 1.0, &[("channel", "1")]);
        sink.inc_counter("y", &[], 1);
    }
}
