//! Default [`MetricsSink`] for processes that have not wired a real exporter.

use playout_core::MetricsSink;

/// Logs every gauge/counter update at `trace` level instead of publishing it
/// anywhere. Adequate for bring-up; a deployment with a real metrics backend
/// replaces this with its own sink without the engine noticing the swap.
pub struct LoggingMetricsSink;

impl MetricsSink for LoggingMetricsSink {
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        log::trace!("gauge {name}={value} {}", format_labels(labels));
    }

    fn inc_counter(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        log::trace!("counter {name}+={n} {}", format_labels(labels));
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}
