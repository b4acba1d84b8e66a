//! Error types shared across flowmon crates.

/// Top-level flowmon error.
#[derive(Debug, thiserror::Error)]
pub enum FlowmonError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// nftables reconciliation error
    #[error("nftables error: {0}")]
    Nftables(#[from] NftablesError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Config file is not valid TOML or does not match the schema
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A value is outside its valid domain
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// nftables failures as seen from outside the `flowmon-nft` crate.
///
/// `flowmon-nft` keeps richer error values internally and flattens them
/// into these variants when converting to [`FlowmonError`].
#[derive(Debug, thiserror::Error)]
pub enum NftablesError {
    /// Building and committing the counter table failed
    #[error("setup failed: {0}")]
    Setup(String),

    /// Reading counters back failed
    #[error("list counters failed: {0}")]
    List(String),

    /// Removing the counter table failed
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// The kernel could not be reached (socket, permissions)
    #[error("transport unavailable: {0}")]
    Transport(String),
}
