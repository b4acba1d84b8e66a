//! Metrics recorder installation. The recorder is process-global, so
//! these run serially and only one installs successfully.

use flowmon_core::config::ExporterConfig;
use flowmon_daemon::metrics_server;
use serial_test::serial;

#[test]
#[serial]
fn install_succeeds_then_refuses_a_second_recorder() {
    // Given: a free local port
    let config = ExporterConfig {
        port: 19617,
        ..ExporterConfig::default()
    };

    // When / Then
    metrics_server::install_metrics_recorder(&config).expect("first install should succeed");
    let again = ExporterConfig {
        port: 19618,
        ..ExporterConfig::default()
    };
    assert!(metrics_server::install_metrics_recorder(&again).is_err());
}

#[test]
#[serial]
fn invalid_address_is_rejected() {
    let config = ExporterConfig {
        listen_addr: "999.999.999.999".to_owned(),
        ..ExporterConfig::default()
    };
    let err = metrics_server::install_metrics_recorder(&config).unwrap_err();
    assert!(err.to_string().contains("listen address"));
}

#[test]
#[serial]
fn custom_endpoint_is_rejected() {
    let config = ExporterConfig {
        endpoint: "/custom".to_owned(),
        ..ExporterConfig::default()
    };
    let err = metrics_server::install_metrics_recorder(&config).unwrap_err();
    assert!(err.to_string().contains("/custom"));
}
