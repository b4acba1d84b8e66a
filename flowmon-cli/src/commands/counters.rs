//! `flowmon counters` command handler
//!
//! One ListCounters round. The kernel zeroes every counter it reports, so
//! running this next to the daemon steals counts from the daemon's metrics.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use flowmon_core::config::FlowmonConfig;
use flowmon_core::types::{CounterSet, Direction};
use flowmon_nft::{Reconciler, Transport};

use crate::cli::CountersArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `counters` command.
pub async fn execute(
    args: CountersArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = FlowmonConfig::load(config_path).await?;
    let reconciler = super::kernel_reconciler(&config)?;
    warn!(table = %reconciler.config().table(), "reading counters resets them in the kernel");

    let set = read(reconciler).await?;
    let report = CountersReport::new(&set, args.direction.map(Direction::from));
    writer.render(&report)
}

/// Runs ListCounters on the blocking pool.
pub async fn read<T: Transport>(reconciler: Reconciler<T>) -> Result<CounterSet, CliError> {
    let set = tokio::task::spawn_blocking(move || reconciler.list_counters())
        .await
        .map_err(|e| CliError::Command(format!("counter read task failed: {e}")))??;
    info!(counters = set.len(), "counters read");
    Ok(set)
}

#[derive(Serialize)]
pub struct CountersReport {
    /// Always true: the values are deltas since the previous read.
    pub reset: bool,
    pub counters: Vec<CounterEntry>,
}

#[derive(Serialize)]
pub struct CounterEntry {
    pub direction: Direction,
    pub label: String,
    pub packets: u64,
    pub bytes: u64,
    /// Match predicates, as `key=value` pairs
    pub matches: Vec<String>,
}

impl CountersReport {
    pub fn new(set: &CounterSet, only: Option<Direction>) -> Self {
        let counters = set
            .iter()
            .filter(|(direction, _)| only.is_none_or(|d| d == *direction))
            .map(|(direction, spec)| CounterEntry {
                direction,
                label: spec.label.clone(),
                packets: spec.packets,
                bytes: spec.bytes,
                matches: spec
                    .attributes()
                    .into_iter()
                    .filter(|(key, _)| !matches!(*key, "direction" | "label"))
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect(),
            })
            .collect();
        Self {
            reset: true,
            counters,
        }
    }
}

impl Render for CountersReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if self.counters.is_empty() {
            writeln!(w, "No counters installed.")?;
            return Ok(());
        }

        writeln!(
            w,
            "{:<8} {:<24} {:>12} {:>14}  {}",
            "DIR".bold(),
            "LABEL".bold(),
            "PACKETS".bold(),
            "BYTES".bold(),
            "MATCH".bold()
        )?;
        for c in &self.counters {
            writeln!(
                w,
                "{:<8} {:<24} {:>12} {:>14}  {}",
                c.direction.as_str(),
                c.label,
                c.packets,
                c.bytes,
                c.matches.join(" ")
            )?;
        }
        writeln!(w)?;
        writeln!(w, "{}", "Counters were reset by this read.".dimmed())?;
        Ok(())
    }
}
