//! Configuration: `flowmon.toml` parsing, environment overrides, validation.
//!
//! # Precedence
//! 1. CLI flags (applied by the binaries)
//! 2. Environment variables (`FLOWMON_NFTABLES_TABLE_NAME=acct`)
//! 3. Config file
//! 4. `Default` impls
//!
//! ```no_run
//! # async fn example() -> Result<(), flowmon_core::error::FlowmonError> {
//! use flowmon_core::config::FlowmonConfig;
//!
//! let config = FlowmonConfig::load("/etc/flowmon/flowmon.toml").await?;
//!
//! let config = FlowmonConfig::parse("[nftables]\ntable_name = \"acct\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FlowmonError};
use crate::types::{CounterSet, CounterSpec, Direction, TableFamily};

/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/flowmon/flowmon.toml";

/// Top-level configuration, one field per `flowmon.toml` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowmonConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub nftables: NftablesConfig,
    #[serde(default)]
    pub exporter: ExporterConfig,
    /// Counter rules per hook direction
    #[serde(default)]
    pub counters: CounterSet,
}

impl FlowmonConfig {
    /// Loads a config file, applies environment overrides and validates.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FlowmonError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a config file without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowmonError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FlowmonError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FlowmonError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string. Does not validate.
    pub fn parse(toml_str: &str) -> Result<Self, FlowmonError> {
        toml::from_str(toml_str).map_err(|e| {
            FlowmonError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies `FLOWMON_{SECTION}_{FIELD}` environment variables.
    ///
    /// Only scalar fields can be overridden; counters come from the file.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "FLOWMON_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FLOWMON_GENERAL_LOG_FORMAT");

        override_parsed(&mut self.nftables.family, "FLOWMON_NFTABLES_FAMILY");
        override_string(&mut self.nftables.table_name, "FLOWMON_NFTABLES_TABLE_NAME");
        override_string(&mut self.nftables.input_chain, "FLOWMON_NFTABLES_INPUT_CHAIN");
        override_string(
            &mut self.nftables.output_chain,
            "FLOWMON_NFTABLES_OUTPUT_CHAIN",
        );
        override_parsed(
            &mut self.nftables.chain_priority,
            "FLOWMON_NFTABLES_CHAIN_PRIORITY",
        );

        override_parsed(
            &mut self.exporter.interval_secs,
            "FLOWMON_EXPORTER_INTERVAL_SECS",
        );
        override_string(&mut self.exporter.listen_addr, "FLOWMON_EXPORTER_LISTEN_ADDR");
        override_parsed(&mut self.exporter.port, "FLOWMON_EXPORTER_PORT");
        override_string(&mut self.exporter.endpoint, "FLOWMON_EXPORTER_ENDPOINT");
    }

    /// Checks every value against its domain.
    ///
    /// Requested TCP flags outside FIN/SYN/RST/ACK are accepted with a
    /// warning: the installed rule masks them away and can never match.
    pub fn validate(&self) -> Result<(), FlowmonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        let nft = &self.nftables;
        for (field, value) in [
            ("nftables.table_name", &nft.table_name),
            ("nftables.input_chain", &nft.input_chain),
            ("nftables.output_chain", &nft.output_chain),
        ] {
            if value.is_empty() {
                return Err(invalid(field, "must not be empty".to_owned()));
            }
        }
        if nft.input_chain == nft.output_chain {
            return Err(invalid(
                "nftables.output_chain",
                "must differ from nftables.input_chain".to_owned(),
            ));
        }

        if self.exporter.interval_secs == 0 {
            return Err(invalid(
                "exporter.interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.exporter.listen_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(invalid(
                "exporter.listen_addr",
                format!("'{}' is not an IP address", self.exporter.listen_addr),
            ));
        }
        if self.exporter.endpoint != "/metrics" {
            return Err(invalid(
                "exporter.endpoint",
                format!("'{}' is not supported, only '/metrics'", self.exporter.endpoint),
            ));
        }

        for direction in Direction::BOTH {
            let mut seen = HashSet::new();
            for (idx, spec) in self.counters.get(direction).iter().enumerate() {
                let field = format!("counters.{direction}[{idx}]");
                validate_counter(spec, nft.family, &field)?;
                if !seen.insert(spec.label.as_str()) {
                    return Err(invalid(
                        &format!("{field}.label"),
                        format!("duplicate label '{}' in {direction} counters", spec.label),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Labels are stored as rule comments, which nftables caps at 128 bytes
/// including the terminator.
const MAX_LABEL_LEN: usize = 127;

fn validate_counter(
    spec: &CounterSpec,
    family: TableFamily,
    field: &str,
) -> Result<(), FlowmonError> {
    if spec.label.is_empty() {
        return Err(invalid(&format!("{field}.label"), "must not be empty".to_owned()));
    }
    if spec.label.len() > MAX_LABEL_LEN || spec.label.contains('\0') {
        return Err(invalid(
            &format!("{field}.label"),
            format!("must be at most {MAX_LABEL_LEN} bytes without NUL characters"),
        ));
    }

    for (name, addr) in [("src_addr", spec.src_addr), ("dst_addr", spec.dst_addr)] {
        if let Some(addr) = addr
            && !family.accepts(&addr)
        {
            return Err(invalid(
                &format!("{field}.{name}"),
                format!("{addr} cannot appear in a '{family}' table"),
            ));
        }
    }

    for (name, port) in [("src_port", spec.src_port), ("dst_port", spec.dst_port)] {
        let Some(port) = port else { continue };
        if !spec.has_ports() {
            return Err(invalid(
                &format!("{field}.{name}"),
                "ports require protocol tcp or udp".to_owned(),
            ));
        }
        if port == 0 {
            return Err(invalid(
                &format!("{field}.{name}"),
                "must be between 1 and 65535".to_owned(),
            ));
        }
    }

    if !spec.tcp_flags.is_empty() {
        if !spec.is_tcp() {
            return Err(invalid(
                &format!("{field}.tcp_flags"),
                "tcp_flags require protocol tcp".to_owned(),
            ));
        }
        let lost = spec.tcp_flags.unmatchable();
        if !lost.is_empty() {
            warn!(
                label = spec.label.as_str(),
                flags = %lost,
                "only fin, syn, rst and ack are compared; this counter will never match"
            );
        }
    }

    Ok(())
}

fn invalid(field: &str, reason: String) -> FlowmonError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// `[general]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn, error
    pub log_level: String,
    /// json, pretty
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// `[nftables]` section: where counter rules are installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NftablesConfig {
    pub family: TableFamily,
    pub table_name: String,
    pub input_chain: String,
    pub output_chain: String,
    /// Hook priority for both chains. Lower runs earlier.
    pub chain_priority: i32,
}

impl Default for NftablesConfig {
    fn default() -> Self {
        Self {
            family: TableFamily::Ipv4,
            table_name: "flowmon".to_owned(),
            input_chain: "input".to_owned(),
            output_chain: "output".to_owned(),
            chain_priority: -300,
        }
    }
}

/// `[exporter]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Seconds between counter polls
    pub interval_secs: u64,
    pub listen_addr: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9617,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- env override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: FromStr>(target: &mut T, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = std::any::type_name::<T>(),
                "failed to parse env var, ignoring"
            ),
        }
    }
}
