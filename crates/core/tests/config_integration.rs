//! flowmon.toml integration tests
//!
//! - flowmon.toml.example parsing
//! - partial configs
//! - environment variable precedence
//! - malformed input

use flowmon_core::config::FlowmonConfig;
use flowmon_core::error::{ConfigError, FlowmonError};
use flowmon_core::types::{Direction, Protocol, TableFamily, TcpFlag};

const EXAMPLE: &str = include_str!("../../../flowmon.toml.example");

// =============================================================================
// flowmon.toml.example
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = FlowmonConfig::parse(EXAMPLE).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
}

#[test]
fn example_config_passes_validation() {
    let config = FlowmonConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_code_defaults() {
    let config = FlowmonConfig::parse(EXAMPLE).expect("should parse");
    let defaults = FlowmonConfig::default();

    assert_eq!(config.general, defaults.general);
    assert_eq!(config.nftables, defaults.nftables);
    assert_eq!(config.exporter, defaults.exporter);
}

#[test]
fn example_config_counters_in_declared_order() {
    let config = FlowmonConfig::parse(EXAMPLE).expect("should parse");

    let input: Vec<&str> = config
        .counters
        .get(Direction::Input)
        .iter()
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(input, vec!["rest_syn", "ssh_in", "ping_in"]);

    let rest = &config.counters.input[0];
    assert_eq!(rest.protocol, Some(Protocol::Tcp));
    assert_eq!(rest.dst_port, Some(8080));
    assert!(rest.tcp_flags.contains(TcpFlag::Syn));

    let all_out = &config.counters.output[1];
    assert_eq!(all_out.label, "all_out");
    assert_eq!(all_out.protocol, None);
    assert_eq!(all_out.src_addr, None);
}

// =============================================================================
// Partial configs
// =============================================================================

#[test]
fn partial_config_general_only() {
    let toml = r#"
[general]
log_level = "debug"
log_format = "pretty"
"#;
    let config = FlowmonConfig::parse(toml).expect("should parse");
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.nftables.table_name, "flowmon");
    assert!(config.counters.is_empty());
}

#[test]
fn partial_config_nftables_only() {
    let toml = r#"
[nftables]
family = "ip6"
table_name = "acct"
"#;
    let config = FlowmonConfig::parse(toml).expect("should parse");
    assert_eq!(config.nftables.family, TableFamily::Ipv6);
    assert_eq!(config.nftables.table_name, "acct");
    assert_eq!(config.nftables.input_chain, "input");
    assert_eq!(config.nftables.chain_priority, -300);
}

#[test]
fn partial_config_output_counters_only() {
    let toml = r#"
[[counters.output]]
label = "https_out"
protocol = "tcp"
dst_port = 443
"#;
    let config = FlowmonConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");
    assert!(config.counters.input.is_empty());
    assert_eq!(config.counters.output.len(), 1);
}

#[test]
fn ipv6_counters_validate_in_ip6_table() {
    let toml = r#"
[nftables]
family = "ip6"

[[counters.input]]
label = "v6_dns"
src_addr = "2001:4860:4860::8888"
protocol = "udp"
src_port = 53
"#;
    let config = FlowmonConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");
}

#[test]
fn ipv4_counter_rejected_in_ip6_table() {
    let toml = r#"
[nftables]
family = "ip6"

[[counters.input]]
label = "v4"
src_addr = "10.0.0.1"
"#;
    let config = FlowmonConfig::parse(toml).expect("should parse");
    let err = config.validate().expect_err("v4 address in ip6 table");
    assert!(matches!(
        err,
        FlowmonError::Config(ConfigError::InvalidValue { .. })
    ));
}

// =============================================================================
// Environment variable precedence
// =============================================================================

fn with_env<T>(key: &str, value: &str, f: impl FnOnce() -> T) -> T {
    let original = std::env::var(key).ok();
    // SAFETY: callers are #[serial], so no other thread touches the environment.
    unsafe { std::env::set_var(key, value) };
    let result = f();
    // SAFETY: as above.
    unsafe {
        match original {
            Some(val) => std::env::set_var(key, val),
            None => std::env::remove_var(key),
        }
    }
    result
}

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[general]
log_level = "info"
"#;
    let level = with_env("FLOWMON_GENERAL_LOG_LEVEL", "error", || {
        let mut config = FlowmonConfig::parse(toml).expect("should parse");
        config.apply_env_overrides();
        config.general.log_level
    });
    assert_eq!(level, "error");
}

#[test]
#[serial_test::serial]
fn env_override_table_name() {
    let name = with_env("FLOWMON_NFTABLES_TABLE_NAME", "acct", || {
        let mut config = FlowmonConfig::default();
        config.apply_env_overrides();
        config.nftables.table_name
    });
    assert_eq!(name, "acct");
}

#[test]
#[serial_test::serial]
fn env_override_numeric_fields() {
    let interval = with_env("FLOWMON_EXPORTER_INTERVAL_SECS", "30", || {
        let mut config = FlowmonConfig::default();
        config.apply_env_overrides();
        config.exporter.interval_secs
    });
    assert_eq!(interval, 30);

    let priority = with_env("FLOWMON_NFTABLES_CHAIN_PRIORITY", "-150", || {
        let mut config = FlowmonConfig::default();
        config.apply_env_overrides();
        config.nftables.chain_priority
    });
    assert_eq!(priority, -150);
}

#[test]
#[serial_test::serial]
fn env_override_invalid_family_keeps_toml_value() {
    let family = with_env("FLOWMON_NFTABLES_FAMILY", "arp", || {
        let mut config = FlowmonConfig::parse("[nftables]\nfamily = \"inet\"\n").expect("parse");
        config.apply_env_overrides();
        config.nftables.family
    });
    assert_eq!(family, TableFamily::Inet);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_then_validates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flowmon.toml");
    tokio::fs::write(&path, EXAMPLE).await.expect("write");

    let original = std::env::var("FLOWMON_EXPORTER_INTERVAL_SECS").ok();
    // SAFETY: serialized test.
    unsafe { std::env::set_var("FLOWMON_EXPORTER_INTERVAL_SECS", "0") };
    let result = FlowmonConfig::load(&path).await;
    // SAFETY: serialized test.
    unsafe {
        match original {
            Some(val) => std::env::set_var("FLOWMON_EXPORTER_INTERVAL_SECS", val),
            None => std::env::remove_var("FLOWMON_EXPORTER_INTERVAL_SECS"),
        }
    }

    let err = result.expect_err("interval 0 from env must fail validation");
    assert!(err.to_string().contains("interval_secs"));
}

// =============================================================================
// Malformed input
// =============================================================================

#[test]
fn empty_string_parses_with_defaults() {
    let config = FlowmonConfig::parse("").expect("empty should parse");
    assert_eq!(config, FlowmonConfig::default());
}

#[test]
fn comments_only_parses_with_defaults() {
    let config = FlowmonConfig::parse("# nothing here\n# still nothing\n").expect("should parse");
    assert!(config.counters.is_empty());
}

#[test]
fn malformed_toml_returns_parse_error() {
    let err = FlowmonConfig::parse("[[counters.input]\nlabel = ").expect_err("malformed");
    assert!(matches!(
        err,
        FlowmonError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn wrong_type_for_port_returns_parse_error() {
    let toml = "[[counters.input]]\nlabel = \"x\"\nprotocol = \"tcp\"\ndst_port = \"http\"\n";
    assert!(FlowmonConfig::parse(toml).is_err());
}

#[test]
fn out_of_range_port_returns_parse_error() {
    let toml = "[[counters.input]]\nlabel = \"x\"\nprotocol = \"tcp\"\ndst_port = 70000\n";
    assert!(FlowmonConfig::parse(toml).is_err());
}

#[test]
fn unknown_protocol_returns_parse_error() {
    let toml = "[[counters.input]]\nlabel = \"x\"\nprotocol = \"sctp\"\n";
    assert!(FlowmonConfig::parse(toml).is_err());
}

#[test]
fn unknown_tcp_flag_returns_parse_error() {
    let toml = "[[counters.input]]\nlabel = \"x\"\nprotocol = \"tcp\"\ntcp_flags = [\"syn\", \"fast\"]\n";
    assert!(FlowmonConfig::parse(toml).is_err());
}

// =============================================================================
// Files on disk
// =============================================================================

#[tokio::test]
async fn from_file_nonexistent_returns_file_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = FlowmonConfig::from_file(dir.path().join("missing.toml")).await;
    assert!(matches!(
        result.unwrap_err(),
        FlowmonError::Config(ConfigError::FileNotFound { .. })
    ));
}

#[tokio::test]
async fn from_file_rejects_invalid_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flowmon.toml");
    tokio::fs::write(&path, "[nftables]\ntable_name = \"\"\n")
        .await
        .expect("write");

    let err = FlowmonConfig::from_file(&path).await.expect_err("empty table name");
    assert!(err.to_string().contains("table_name"));
}

#[test]
fn example_config_serialize_roundtrip() {
    let config = FlowmonConfig::parse(EXAMPLE).expect("should parse");
    let serialized = toml::to_string_pretty(&config).expect("should serialize");
    let reparsed = FlowmonConfig::parse(&serialized).expect("should reparse");
    assert_eq!(config, reparsed);
}
