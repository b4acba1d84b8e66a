//! CLI-specific error types and exit code mapping

use flowmon_core::error::{FlowmonError, NftablesError};
use flowmon_nft::{ReconcileError, TransportError};

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The kernel could not be reached or refused us.
    #[error("nftables unavailable: {0}")]
    TransportUnavailable(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from flowmon-core.
    #[error("{0}")]
    Core(#[from] FlowmonError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                   |
    /// |------|-------------------------------------------|
    /// | 0    | Success                                   |
    /// | 1    | General / command error                   |
    /// | 2    | Configuration error                       |
    /// | 3    | nftables unreachable or permission denied |
    /// | 10   | IO error                                  |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::TransportUnavailable(_) => 3,
            Self::Io(_) => 10,
            Self::Core(FlowmonError::Config(_)) => 2,
            Self::Core(FlowmonError::Nftables(NftablesError::Transport(_))) => 3,
            Self::Core(FlowmonError::Io(_)) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}

impl From<ReconcileError> for CliError {
    fn from(e: ReconcileError) -> Self {
        match e.transport() {
            Some(TransportError::PermissionDenied | TransportError::Io(_)) => {
                Self::TransportUnavailable(e.to_string())
            }
            _ => Self::Command(e.to_string()),
        }
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        Self::TransportUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use flowmon_core::error::ConfigError;

    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");
    }

    #[test]
    fn test_exit_code_core_config_error() {
        let err = CliError::from(FlowmonError::Config(ConfigError::FileNotFound {
            path: "/nonexistent".to_owned(),
        }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_transport_unavailable() {
        let err = CliError::from(TransportError::PermissionDenied);
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("CAP_NET_ADMIN"));
    }

    #[test]
    fn test_exit_code_permission_denied_during_reconcile() {
        let err = CliError::from(ReconcileError::CleanupFailed(TransportError::PermissionDenied));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_reconcile_failure_is_command_error() {
        let err = CliError::from(ReconcileError::TableNotFound("flowmon".to_owned()));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "table 'flowmon' not found");
    }

    #[test]
    fn test_exit_code_core_transport_error() {
        let err = CliError::from(FlowmonError::Nftables(NftablesError::Transport(
            "socket".to_owned(),
        )));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let err = CliError::Io(io_err);
        assert_eq!(err.exit_code(), 10, "io error should return exit code 10");
    }

    #[test]
    fn test_exit_code_command_error() {
        let err = CliError::Command("test error".to_owned());
        assert_eq!(err.exit_code(), 1);
    }
}
