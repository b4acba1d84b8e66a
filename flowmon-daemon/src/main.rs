use anyhow::Result;
use clap::Parser;

use flowmon_core::config::FlowmonConfig;
use flowmon_daemon::cli::DaemonCli;
use flowmon_daemon::{logging, metrics_server};
use flowmon_nft::{ReconcilerConfig, compile_set};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = FlowmonConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    config.general = logging::with_cli_overrides(
        &config.general,
        cli.log_level.as_deref(),
        cli.log_format.as_deref(),
    );
    logging::init_tracing(&config.general)?;

    if cli.validate {
        return validate(&config);
    }

    tracing::info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "flowmon-daemon starting"
    );

    metrics_server::install_metrics_recorder(&config.exporter)?;
    serve(config, cli.keep_rules).await?;

    tracing::info!("flowmon-daemon shut down");
    Ok(())
}

#[cfg(target_os = "linux")]
async fn serve(config: FlowmonConfig, keep_rules: bool) -> Result<()> {
    use flowmon_daemon::orchestrator::Orchestrator;

    let transport = flowmon_nft::NetlinkTransport::new()
        .map_err(|e| anyhow::anyhow!("failed to open netfilter socket: {}", e))?;
    Orchestrator::build(config, transport)
        .await?
        .keep_rules(keep_rules)
        .run()
        .await
}

#[cfg(not(target_os = "linux"))]
async fn serve(_config: FlowmonConfig, _keep_rules: bool) -> Result<()> {
    Err(anyhow::anyhow!("nftables is only available on Linux"))
}

/// `--validate`: the config loaded, now make sure every counter compiles.
fn validate(config: &FlowmonConfig) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    let rc = ReconcilerConfig::from(&config.nftables);
    let rules = compile_set(
        &rc.chain(flowmon_core::types::Direction::Input),
        &rc.chain(flowmon_core::types::Direction::Output),
        &config.counters,
    );
    for (direction, rule) in &rules {
        tracing::debug!(%direction, rule = %rule, "compiled");
    }
    tracing::info!(rules = rules.len(), "configuration is valid");
    Ok(())
}
