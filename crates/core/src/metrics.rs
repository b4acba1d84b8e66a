//! Metric names and descriptions.
//!
//! Every Prometheus metric flowmon emits is named here. Callers use these
//! constants with `metrics::counter!()`, `metrics::gauge!()` and
//! `metrics::histogram!()`.
//!
//! # Naming
//!
//! - prefix: `flowmon_`
//! - suffix: `_total` (counter), `_seconds` (histogram), none (gauge)
//!
//! ```ignore
//! use metrics::gauge;
//!
//! gauge!(flowmon_core::metrics::FLOW_PACKETS, "label" => "syn_in").set(12.0);
//! ```

// ─── Label keys ────────────────────────────────────────────────────

/// Counter label (the rule comment)
pub const LABEL_LABEL: &str = "label";

/// Hook direction (input, output)
pub const LABEL_DIRECTION: &str = "direction";

/// L4 protocol (tcp, udp, icmp, icmpv6)
pub const LABEL_PROTOCOL: &str = "protocol";

// ─── Per-counter flow metrics ──────────────────────────────────────

/// Packets matched since the previous poll (gauge)
pub const FLOW_PACKETS: &str = "flowmon_flow_packets";

/// Bytes matched since the previous poll (gauge)
pub const FLOW_BYTES: &str = "flowmon_flow_bytes";

/// Packets matched since the daemon started (counter)
pub const FLOW_PACKETS_TOTAL: &str = "flowmon_flow_packets_total";

/// Bytes matched since the daemon started (counter)
pub const FLOW_BYTES_TOTAL: &str = "flowmon_flow_bytes_total";

// ─── Poller ────────────────────────────────────────────────────────

/// Completed counter polls (counter)
pub const POLLS_TOTAL: &str = "flowmon_polls_total";

/// Failed counter polls (counter)
pub const POLL_FAILURES_TOTAL: &str = "flowmon_poll_failures_total";

/// Time spent reading counters back from the kernel (histogram, seconds)
pub const POLL_DURATION_SECONDS: &str = "flowmon_poll_duration_seconds";

/// Counter rules installed per direction (gauge, label: direction)
pub const RULES_INSTALLED: &str = "flowmon_rules_installed";

// ─── Daemon ────────────────────────────────────────────────────────

/// Build information, always 1 (gauge, labels: version)
pub const BUILD_INFO: &str = "flowmon_build_info";

/// Poll duration buckets (seconds). A netlink dump of a few hundred rules
/// stays well under 100ms.
pub const POLL_DURATION_BUCKETS: [f64; 8] = [0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

/// Registers HELP text for every metric.
///
/// Call once, after the global recorder is installed.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_gauge!(
        FLOW_PACKETS,
        "Packets matched by a counter rule since the previous poll"
    );
    describe_gauge!(
        FLOW_BYTES,
        "Bytes matched by a counter rule since the previous poll"
    );
    describe_counter!(
        FLOW_PACKETS_TOTAL,
        "Packets matched by a counter rule since the exporter started"
    );
    describe_counter!(
        FLOW_BYTES_TOTAL,
        "Bytes matched by a counter rule since the exporter started"
    );

    describe_counter!(POLLS_TOTAL, "Number of completed counter polls");
    describe_counter!(POLL_FAILURES_TOTAL, "Number of failed counter polls");
    describe_histogram!(
        POLL_DURATION_SECONDS,
        "Time to read and reset all counter rules in seconds"
    );
    describe_gauge!(RULES_INSTALLED, "Number of counter rules installed per chain");

    describe_gauge!(BUILD_INFO, "Build information (always 1, with version label)");
}
