//! Daemon lifecycle.
//!
//! # Startup
//!
//! 1. validate the configuration
//! 2. install the counter rules (Setup); failure aborts startup
//! 3. spawn the poller
//!
//! # Shutdown
//!
//! 1. broadcast shutdown and wait for the poller to finish
//! 2. remove the counter table (Cleanup) unless rules are kept
//!
//! The poller must be gone before Cleanup runs: a poll racing the table
//! removal would fail with table-not-found.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;

use flowmon_core::config::FlowmonConfig;
use flowmon_core::metrics as m;
use flowmon_nft::{Reconciler, ReconcilerConfig, Transport};

use crate::{exporter, poller};

/// Owns the reconciler and the background poller.
pub struct Orchestrator<T: Transport> {
    config: FlowmonConfig,
    reconciler: Arc<Reconciler<T>>,
    shutdown_tx: broadcast::Sender<()>,
    keep_rules: bool,
}

impl<T: Transport> Orchestrator<T> {
    /// Validates `config` and installs its counters through `transport`.
    ///
    /// # Errors
    ///
    /// - configuration validation fails
    /// - Setup fails (missing privileges, kernel rejected the batch)
    pub async fn build(config: FlowmonConfig, transport: T) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let reconciler = Arc::new(Reconciler::new(
            ReconcilerConfig::from(&config.nftables),
            transport,
        ));

        let counters = config.counters.clone();
        let setup = Arc::clone(&reconciler);
        tokio::task::spawn_blocking(move || setup.setup(&counters))
            .await
            .map_err(|e| anyhow::anyhow!("setup task failed: {}", e))?
            .map_err(|e| {
                let hint = if e.is_permission_denied() {
                    " (run as root or grant CAP_NET_ADMIN)"
                } else {
                    ""
                };
                anyhow::anyhow!("failed to install counter rules: {}{}", e, hint)
            })?;

        exporter::record_installed(&config.counters);
        record_build_info();
        tracing::info!(
            table = %reconciler.config().table(),
            counters = config.counters.len(),
            "orchestrator initialized"
        );

        let (shutdown_tx, _) = broadcast::channel(4);
        Ok(Self {
            config,
            reconciler,
            shutdown_tx,
            keep_rules: false,
        })
    }

    /// Skip Cleanup on shutdown.
    pub fn keep_rules(mut self, keep: bool) -> Self {
        self.keep_rules = keep;
        self
    }

    pub fn config(&self) -> &FlowmonConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<T>> {
        &self.reconciler
    }

    /// Runs until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
        })
        .await
    }

    /// Polls until `shutdown` completes, then tears down.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let interval = Duration::from_secs(self.config.exporter.interval_secs);
        let poller = poller::spawn_poller(
            Arc::clone(&self.reconciler),
            interval,
            self.shutdown_tx.subscribe(),
        );
        tracing::info!(interval_secs = interval.as_secs(), "polling counters");

        shutdown.await;

        let _ = self.shutdown_tx.send(());
        if let Err(e) = poller.await {
            tracing::error!(error = %e, "poller task ended abnormally");
        }

        self.shutdown().await
    }

    async fn shutdown(self) -> Result<()> {
        if self.keep_rules {
            tracing::info!(
                table = %self.reconciler.config().table(),
                "leaving counter rules installed"
            );
            return Ok(());
        }

        let reconciler = Arc::clone(&self.reconciler);
        tokio::task::spawn_blocking(move || reconciler.cleanup())
            .await
            .map_err(|e| anyhow::anyhow!("cleanup task failed: {}", e))?
            .map_err(|e| anyhow::anyhow!("failed to remove counter rules: {}", e))
    }
}

/// Wait for SIGTERM or SIGINT and return its name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

fn record_build_info() {
    metrics::gauge!(m::BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}
