//! nftables error types.
//!
//! [`TransportError`] covers the kernel exchange, [`DecodeError`] an
//! installed rule that cannot be read back as a counter, and
//! [`ReconcileError`] the three reconciler operations. All of them flatten
//! into [`FlowmonError`] at the crate boundary.

use flowmon_core::error::{FlowmonError, NftablesError};

use crate::expr::PayloadBase;

/// Failure talking to the kernel (or to a stand-in for it).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The requested table, chain or rule does not exist (ENOENT)
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller lacks CAP_NET_ADMIN
    #[error("permission denied (CAP_NET_ADMIN required)")]
    PermissionDenied,

    /// The kernel answered a request with an error code
    #[error("netlink {op} failed: {reason}")]
    Netlink { op: String, reason: String },

    /// Socket-level failure
    #[error("netlink socket error: {0}")]
    Io(#[from] std::io::Error),

    /// A request could not be encoded (e.g. a name with a NUL byte)
    #[error("encode error: {0}")]
    Encode(String),

    /// The kernel sent something that does not parse
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    /// Maps a kernel errno onto the matching variant.
    pub fn from_errno(op: &str, errno: i32, what: &str) -> Self {
        match errno {
            libc::ENOENT => TransportError::NotFound(what.to_owned()),
            libc::EPERM | libc::EACCES => TransportError::PermissionDenied,
            _ => TransportError::Netlink {
                op: op.to_owned(),
                reason: std::io::Error::from_raw_os_error(errno).to_string(),
            },
        }
    }
}

/// An installed rule that is not a well-formed counter rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported expression '{0}'")]
    UnsupportedExpression(String),

    #[error("unsupported meta key {0}")]
    UnsupportedMetaKey(u32),

    #[error("unsupported comparison operator {0}")]
    UnsupportedCmpOp(u32),

    #[error("unsupported payload load: {base} header offset {offset} length {len}")]
    UnsupportedPayload {
        base: PayloadBase,
        offset: u32,
        len: u32,
    },

    #[error("register {0} used before any load")]
    UnknownRegister(u32),

    #[error("{field} comparison expects {expected} bytes, got {actual}")]
    BadDataLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown protocol number {0}")]
    UnknownProtocol(u8),

    #[error("rule has no counter")]
    MissingCounter,

    #[error("rule has more than one counter")]
    DuplicateCounter,

    #[error("rule has no label")]
    MissingLabel,
}

/// Failure of a reconciler operation.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Setup could not look up or replace objects
    #[error("setup failed while {stage}: {source}")]
    SetupFailed {
        stage: String,
        #[source]
        source: TransportError,
    },

    /// The staged setup batch was rejected; nothing from it was applied
    #[error("setup commit failed: {0}")]
    CommitFailed(#[source] TransportError),

    /// Reading counters back failed in the transport
    #[error("list counters failed on chain '{chain}': {source}")]
    ListFailed {
        chain: String,
        #[source]
        source: TransportError,
    },

    /// An installed rule could not be decoded
    #[error("chain '{chain}' rule {index} is not a counter rule: {source}")]
    MalformedRule {
        chain: String,
        index: usize,
        #[source]
        source: DecodeError,
    },

    /// Cleanup could not look up or remove the table
    #[error("cleanup failed: {0}")]
    CleanupFailed(#[source] TransportError),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("chain '{0}' not found")]
    ChainNotFound(String),

    /// A previous operation panicked while holding the connection
    #[error("nftables connection lock poisoned")]
    Poisoned,
}

impl ReconcileError {
    /// The transport failure underneath, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            ReconcileError::SetupFailed { source, .. }
            | ReconcileError::ListFailed { source, .. } => Some(source),
            ReconcileError::CommitFailed(source) | ReconcileError::CleanupFailed(source) => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Whether the kernel refused us for lack of privileges.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.transport(), Some(TransportError::PermissionDenied))
    }
}

impl From<ReconcileError> for FlowmonError {
    fn from(err: ReconcileError) -> Self {
        if err.is_permission_denied() {
            return FlowmonError::Nftables(NftablesError::Transport(err.to_string()));
        }
        let msg = err.to_string();
        match err {
            ReconcileError::SetupFailed { .. } | ReconcileError::CommitFailed(_) => {
                FlowmonError::Nftables(NftablesError::Setup(msg))
            }
            ReconcileError::ListFailed { .. }
            | ReconcileError::MalformedRule { .. }
            | ReconcileError::TableNotFound(_)
            | ReconcileError::ChainNotFound(_) => FlowmonError::Nftables(NftablesError::List(msg)),
            ReconcileError::CleanupFailed(_) => FlowmonError::Nftables(NftablesError::Cleanup(msg)),
            ReconcileError::Poisoned => FlowmonError::Nftables(NftablesError::Transport(msg)),
        }
    }
}

impl From<TransportError> for FlowmonError {
    fn from(err: TransportError) -> Self {
        FlowmonError::Nftables(NftablesError::Transport(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert!(TransportError::from_errno("get table", libc::ENOENT, "flowmon").is_not_found());
        assert!(matches!(
            TransportError::from_errno("commit", libc::EPERM, ""),
            TransportError::PermissionDenied
        ));
        let err = TransportError::from_errno("commit", libc::ENOBUFS, "");
        assert!(err.to_string().starts_with("netlink commit failed"));
    }

    #[test]
    fn malformed_rule_flattens_to_list_error() {
        let err = ReconcileError::MalformedRule {
            chain: "input".to_owned(),
            index: 2,
            source: DecodeError::MissingLabel,
        };
        let flat: FlowmonError = err.into();
        assert!(matches!(flat, FlowmonError::Nftables(NftablesError::List(_))));
        assert!(flat.to_string().contains("rule 2"));
    }

    #[test]
    fn permission_denied_flattens_to_transport() {
        let err = ReconcileError::SetupFailed {
            stage: "looking up table".to_owned(),
            source: TransportError::PermissionDenied,
        };
        assert!(err.is_permission_denied());
        let flat: FlowmonError = err.into();
        assert!(matches!(
            flat,
            FlowmonError::Nftables(NftablesError::Transport(_))
        ));
    }

    #[test]
    fn commit_failure_is_a_setup_failure() {
        let err = ReconcileError::CommitFailed(TransportError::Netlink {
            op: "batch".to_owned(),
            reason: "No buffer space available".to_owned(),
        });
        let flat: FlowmonError = err.into();
        assert!(matches!(flat, FlowmonError::Nftables(NftablesError::Setup(_))));
    }
}
