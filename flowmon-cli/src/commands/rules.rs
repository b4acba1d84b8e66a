//! `flowmon rules` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use flowmon_core::config::FlowmonConfig;
use flowmon_core::types::Direction;
use flowmon_nft::{ReconcilerConfig, compile_set};

use crate::cli::{RulesAction, RulesArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `rules` command.
pub async fn execute(
    args: RulesArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        RulesAction::Compile { direction } => {
            let config = FlowmonConfig::load(config_path).await?;
            info!(counters = config.counters.len(), "compiling counter rules");
            let report = compile_report(&config, direction.map(Direction::from));
            writer.render(&report)
        }
    }
}

/// Compiles every counter in `config` without contacting the kernel.
pub fn compile_report(config: &FlowmonConfig, only: Option<Direction>) -> RuleCompileReport {
    let reconciler = ReconcilerConfig::from(&config.nftables);
    let input = reconciler.chain(Direction::Input);
    let output = reconciler.chain(Direction::Output);

    let rules = compile_set(&input, &output, &config.counters)
        .into_iter()
        .filter(|(direction, _)| only.is_none_or(|d| d == *direction))
        .map(|(direction, rule)| CompiledRule {
            direction,
            chain: rule.chain.clone(),
            label: rule.comment.clone().unwrap_or_default(),
            expressions: rule.exprs.iter().map(ToString::to_string).collect(),
        })
        .collect::<Vec<_>>();

    RuleCompileReport {
        table: reconciler.table().to_string(),
        total: rules.len(),
        rules,
    }
}

#[derive(Serialize)]
pub struct RuleCompileReport {
    pub table: String,
    pub total: usize,
    pub rules: Vec<CompiledRule>,
}

#[derive(Serialize)]
pub struct CompiledRule {
    pub direction: Direction,
    pub chain: String,
    pub label: String,
    pub expressions: Vec<String>,
}

impl Render for RuleCompileReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Table {} ({} rules)", self.table.bold(), self.total)?;
        for rule in &self.rules {
            writeln!(w)?;
            writeln!(w, "{} {}", rule.chain.cyan(), rule.label.bold())?;
            for expr in &rule.expressions {
                writeln!(w, "  {expr}")?;
            }
        }
        Ok(())
    }
}
