//! flowmon daemon library.
//!
//! Exposes the daemon's building blocks for integration tests. In
//! production `flowmon-daemon` runs as a binary (main.rs).

pub mod cli;
pub mod exporter;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
pub mod poller;
