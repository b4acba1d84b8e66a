//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use flowmon_core::config::DEFAULT_CONFIG_PATH;
use flowmon_core::types::Direction;

/// flowmon -- nftables flow counters.
///
/// Use `flowmon <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "flowmon", version, about, long_about = None)]
pub struct Cli {
    /// Path to the flowmon.toml configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration.
    Config(ConfigArgs),

    /// Inspect the nftables rules generated from the configuration.
    Rules(RulesArgs),

    /// Read the installed counters once. Reading resets them in the kernel.
    Counters(CountersArgs),

    /// Remove the flowmon table and every rule in it.
    Cleanup,
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Only show one section (general, nftables, exporter, counters).
        #[arg(long)]
        section: Option<String>,
    },
}

// ---- rules ----

#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub action: RulesAction,
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// Print the expressions compiled for each counter. Does not touch the kernel.
    Compile {
        /// Only show one hook direction.
        #[arg(long)]
        direction: Option<DirectionArg>,
    },
}

// ---- counters ----

#[derive(Args, Debug)]
pub struct CountersArgs {
    /// Only show one hook direction. Both chains are still read and reset.
    #[arg(long)]
    pub direction: Option<DirectionArg>,
}

/// Hook direction as a command-line value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    Input,
    Output,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Input => Direction::Input,
            DirectionArg::Output => Direction::Output,
        }
    }
}
