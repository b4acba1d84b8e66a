#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// Errors
pub use error::{ConfigError, FlowmonError, NftablesError};

// Configuration
pub use config::FlowmonConfig;

// Domain types
pub use types::{CounterSet, CounterSpec, Direction, Protocol, TableFamily, TcpFlag, TcpFlags};
