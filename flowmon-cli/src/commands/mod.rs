//! Command handlers -- one module per subcommand

pub mod cleanup;
pub mod config;
pub mod counters;
pub mod rules;

use flowmon_core::config::FlowmonConfig;
use flowmon_nft::{Reconciler, ReconcilerConfig};

use crate::error::CliError;

/// Opens a reconciler over the running kernel for `config`'s table.
#[cfg(target_os = "linux")]
pub fn kernel_reconciler(
    config: &FlowmonConfig,
) -> Result<Reconciler<flowmon_nft::NetlinkTransport>, CliError> {
    let transport = flowmon_nft::NetlinkTransport::new()?;
    Ok(Reconciler::new(
        ReconcilerConfig::from(&config.nftables),
        transport,
    ))
}

/// nftables only exists on Linux.
#[cfg(not(target_os = "linux"))]
pub fn kernel_reconciler(
    _config: &FlowmonConfig,
) -> Result<Reconciler<flowmon_nft::MemoryTransport>, CliError> {
    Err(CliError::TransportUnavailable(
        "nftables is only available on Linux".to_owned(),
    ))
}
