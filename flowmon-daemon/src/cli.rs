//! Command-line arguments for flowmon-daemon.

use std::path::PathBuf;

use clap::Parser;
use flowmon_core::config::DEFAULT_CONFIG_PATH;

/// nftables flow counter exporter.
///
/// Installs one counter rule per configured flow, polls the counters and
/// serves them to Prometheus. The rules are removed on shutdown.
#[derive(Parser, Debug)]
#[command(name = "flowmon-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to flowmon.toml.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate the configuration, compile every rule, and exit.
    #[arg(long)]
    pub validate: bool,

    /// Leave the counter table installed on exit.
    #[arg(long)]
    pub keep_rules: bool,
}
