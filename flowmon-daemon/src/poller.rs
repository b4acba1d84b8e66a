//! Periodic counter polling.
//!
//! The reconciler blocks on netlink round-trips, so each poll runs on the
//! blocking pool. A failed poll is counted and logged; the loop carries on
//! with the next tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use flowmon_core::metrics as m;
use flowmon_core::types::CounterSet;
use flowmon_nft::{Reconciler, Transport};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::exporter;

/// Reads the counters once and publishes them.
pub async fn poll_once<T: Transport>(reconciler: &Arc<Reconciler<T>>) -> Result<CounterSet> {
    let reconciler = Arc::clone(reconciler);
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || reconciler.list_counters())
        .await
        .map_err(|e| anyhow::anyhow!("poll task failed: {}", e))?;
    metrics::histogram!(m::POLL_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    match result {
        Ok(set) => {
            metrics::counter!(m::POLLS_TOTAL).increment(1);
            exporter::record(&set);
            tracing::debug!(counters = set.len(), "counters polled");
            Ok(set)
        }
        Err(e) => {
            metrics::counter!(m::POLL_FAILURES_TOTAL).increment(1);
            Err(anyhow::Error::new(e).context("failed to list counters"))
        }
    }
}

/// Spawns the poll loop. It stops when `shutdown_rx` fires and never
/// leaves a poll half-done.
pub fn spawn_poller<T: Transport>(
    reconciler: Arc<Reconciler<T>>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; counters were just installed.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = poll_once(&reconciler).await {
                        tracing::warn!(error = %format!("{e:#}"), "poll failed, skipping cycle");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("poller shutting down");
                    break;
                }
            }
        }
    })
}
