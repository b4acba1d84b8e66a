//! `flowmon cleanup` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use flowmon_core::config::FlowmonConfig;
use flowmon_nft::{Reconciler, Transport};

use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `cleanup` command.
pub async fn execute(config_path: &Path, writer: &OutputWriter) -> Result<(), CliError> {
    let config = FlowmonConfig::load(config_path).await?;
    let reconciler = super::kernel_reconciler(&config)?;
    let report = remove(reconciler).await?;
    writer.render(&report)
}

/// Runs Cleanup on the blocking pool. Succeeds when the table is already gone.
pub async fn remove<T: Transport>(reconciler: Reconciler<T>) -> Result<CleanupReport, CliError> {
    let table = reconciler.config().table().to_string();
    tokio::task::spawn_blocking(move || reconciler.cleanup())
        .await
        .map_err(|e| CliError::Command(format!("cleanup task failed: {e}")))??;
    Ok(CleanupReport { table })
}

#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub table: String,
}

impl Render for CleanupReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;
        writeln!(w, "Table {} removed.", self.table.bold())
    }
}

#[cfg(test)]
mod tests {
    use flowmon_core::types::{CounterSet, CounterSpec};
    use flowmon_nft::{Fault, MemoryTransport, ReconcilerConfig};

    use super::*;

    #[tokio::test]
    async fn remove_deletes_table_and_is_idempotent() {
        // Given: an installed table
        let kernel = MemoryTransport::new();
        let reconciler = Reconciler::new(ReconcilerConfig::default(), kernel.clone());
        let set = CounterSet {
            input: vec![CounterSpec::new("all_in")],
            output: vec![],
        };
        reconciler.setup(&set).expect("setup");

        // When: removing it twice
        let report = remove(reconciler).await.expect("cleanup");
        let again = Reconciler::new(ReconcilerConfig::default(), kernel.clone());
        remove(again).await.expect("second cleanup");

        // Then: the table is gone and the second call was a no-op
        assert_eq!(report.table, "ip flowmon");
        assert!(kernel.tables().is_empty());
        assert_eq!(kernel.commits(), 2);
    }

    #[tokio::test]
    async fn remove_failure_is_command_error() {
        let kernel = MemoryTransport::new();
        kernel.fail_next(Fault::ListTable, 1);
        let reconciler = Reconciler::new(ReconcilerConfig::default(), kernel);
        let err = remove(reconciler).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("cleanup failed"));
    }
}
