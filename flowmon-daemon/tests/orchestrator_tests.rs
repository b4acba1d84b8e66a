//! Orchestrator lifecycle against the in-memory kernel model.
//!
//! Covers: build (Setup) -> polling -> shutdown (Cleanup).

use std::time::Duration;

use flowmon_core::config::FlowmonConfig;
use flowmon_daemon::orchestrator::Orchestrator;
use flowmon_nft::{Fault, MemoryTransport, Table};
use tokio::sync::oneshot;

fn test_config() -> FlowmonConfig {
    let toml_str = r#"
[general]
log_level = "debug"

[nftables]
table_name = "flowmon_test"

[exporter]
interval_secs = 1

[[counters.input]]
label = "ssh_in"
protocol = "tcp"
dst_port = 22

[[counters.output]]
label = "dns_out"
protocol = "udp"
dst_port = 53
"#;
    FlowmonConfig::parse(toml_str).expect("failed to parse test config")
}

fn table(config: &FlowmonConfig) -> Table {
    Table::new(config.nftables.family, config.nftables.table_name.clone())
}

#[tokio::test]
async fn build_installs_configured_counters() {
    // Given: an empty kernel
    let kernel = MemoryTransport::new();
    let config = test_config();

    // When
    let orchestrator = Orchestrator::build(config.clone(), kernel.clone())
        .await
        .expect("build should succeed");

    // Then: one rule per counter, in its chain
    let table = table(&config);
    assert_eq!(kernel.rules(&table, "input").len(), 1);
    assert_eq!(kernel.rules(&table, "output").len(), 1);
    assert_eq!(orchestrator.config().nftables.table_name, "flowmon_test");
}

#[tokio::test]
async fn shutdown_removes_the_table() {
    let kernel = MemoryTransport::new();
    let orchestrator = Orchestrator::build(test_config(), kernel.clone())
        .await
        .unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let run = tokio::spawn(orchestrator.run_until(async {
        let _ = rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(()).unwrap();

    run.await.unwrap().expect("run should finish cleanly");
    assert!(kernel.tables().is_empty());
}

#[tokio::test]
async fn keep_rules_leaves_the_table() {
    let kernel = MemoryTransport::new();
    let config = test_config();
    let orchestrator = Orchestrator::build(config.clone(), kernel.clone())
        .await
        .unwrap()
        .keep_rules(true);

    orchestrator.run_until(async {}).await.unwrap();

    assert_eq!(kernel.tables(), vec![table(&config)]);
}

#[tokio::test(start_paused = true)]
async fn poller_drains_counters_while_running() {
    // Given: traffic recorded before the first poll
    let kernel = MemoryTransport::new();
    let config = test_config();
    let orchestrator = Orchestrator::build(config.clone(), kernel.clone())
        .await
        .unwrap()
        .keep_rules(true);
    kernel.bump(&table(&config), "input", "ssh_in", 4, 240);

    // When: the daemon runs past one poll interval
    orchestrator
        .run_until(tokio::time::sleep(Duration::from_millis(1500)))
        .await
        .unwrap();

    // Then: the kernel counter was read and cleared
    let rule = &kernel.rules(&table(&config), "input")[0];
    assert_eq!(rule.exprs.last(), Some(&flowmon_nft::Expression::counter()));
}

#[tokio::test]
async fn invalid_config_never_touches_the_kernel() {
    let kernel = MemoryTransport::new();
    let mut config = test_config();
    config.exporter.interval_secs = 0;

    let err = Orchestrator::build(config, kernel.clone())
        .await
        .err()
        .expect("build should fail");

    assert!(err.to_string().contains("interval_secs"), "{err}");
    assert_eq!(kernel.commits(), 0);
}

#[tokio::test]
async fn setup_failure_aborts_startup() {
    let kernel = MemoryTransport::new();
    kernel.fail_next(Fault::Commit, 1);

    let err = Orchestrator::build(test_config(), kernel.clone())
        .await
        .err()
        .expect("build should fail");

    assert!(err.to_string().contains("failed to install counter rules"));
    assert!(kernel.tables().is_empty());
}

#[tokio::test]
async fn permission_denied_suggests_cap_net_admin() {
    let kernel = MemoryTransport::new();
    kernel.set_permission_denied(true);

    let err = Orchestrator::build(test_config(), kernel)
        .await
        .err()
        .expect("build should fail");

    assert!(err.to_string().contains("CAP_NET_ADMIN"), "{err}");
}

#[tokio::test]
async fn restart_replaces_previous_rules() {
    // Given: a previous run that kept its rules
    let kernel = MemoryTransport::new();
    let config = test_config();
    Orchestrator::build(config.clone(), kernel.clone())
        .await
        .unwrap()
        .keep_rules(true)
        .run_until(async {})
        .await
        .unwrap();

    // When: the daemon starts again with one counter fewer
    let mut next = config.clone();
    next.counters.output.clear();
    Orchestrator::build(next, kernel.clone()).await.unwrap();

    // Then
    assert_eq!(kernel.rules(&table(&config), "input").len(), 1);
    assert!(kernel.rules(&table(&config), "output").is_empty());
}
