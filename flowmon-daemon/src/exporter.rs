//! Publishes polled counters as Prometheus metrics.
//!
//! Kernel counters are read-and-clear, so every poll yields the traffic
//! since the previous poll. That delta is exposed twice: as a gauge
//! (latest interval) and added to a counter (running total since start).

use flowmon_core::metrics as m;
use flowmon_core::types::{CounterSet, CounterSpec, Direction};
use metrics::Label;

/// Metric labels for one counter: direction, label, and whichever match
/// fields it declares.
pub fn labels(spec: &CounterSpec) -> Vec<Label> {
    spec.attributes()
        .into_iter()
        .map(|(key, value)| Label::new(key, value))
        .collect()
}

/// Records one poll result.
pub fn record(set: &CounterSet) {
    for (_, spec) in set.iter() {
        let labels = labels(spec);

        #[allow(clippy::cast_precision_loss)]
        {
            metrics::gauge!(m::FLOW_PACKETS, labels.clone()).set(spec.packets as f64);
            metrics::gauge!(m::FLOW_BYTES, labels.clone()).set(spec.bytes as f64);
        }
        metrics::counter!(m::FLOW_PACKETS_TOTAL, labels.clone()).increment(spec.packets);
        metrics::counter!(m::FLOW_BYTES_TOTAL, labels).increment(spec.bytes);
    }
}

/// Records how many rules are installed per direction.
pub fn record_installed(set: &CounterSet) {
    for direction in Direction::BOTH {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::RULES_INSTALLED, m::LABEL_DIRECTION => direction.as_str())
            .set(set.get(direction).len() as f64);
    }
}
