//! Error types for the sync engine.

use thiserror::Error;
use walletsync_core::{StoreError, UserId};

/// Result type for remote gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure of a single remote call.
///
/// The gateway never retries; callers decide what a failure means.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The remote could not be reached at all.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The remote answered with a non-success status.
    #[error("server rejected request with status {status}: {body}")]
    ServerRejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The call did not complete within the request timeout.
    ///
    /// The remote may or may not have applied it.
    #[error("request timed out")]
    Timeout,

    /// The remote answered with a body that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::NetworkUnreachable(message.into())
    }

    /// Returns true if trying again later may succeed.
    ///
    /// Protocol errors are grouped with client-side rejections.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::NetworkUnreachable(_) | GatewayError::Timeout => true,
            GatewayError::ServerRejected { status, .. } => *status >= 500 || *status == 429,
            GatewayError::Protocol(_) => false,
        }
    }

    /// Returns true if the remote may have committed the call anyway.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, GatewayError::Timeout)
    }
}

/// Errors surfaced by [`crate::WalletEngine`] and its components.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Local storage failed.
    #[error("local storage failure: {0}")]
    Store(#[from] StoreError),

    /// A remote call failed where the caller needed it to succeed.
    #[error("remote gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A category with this name already exists for the user.
    #[error("category '{name}' already exists")]
    DuplicateCategory {
        /// The rejected name.
        name: String,
    },

    /// The record is malformed or does not belong to the user.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The user is signed out; no work is accepted for them.
    #[error("user {0} is signed out")]
    SignedOut(UserId),

    /// The reconciliation run was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl EngineError {
    /// Creates an invalid-record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(GatewayError::unreachable("no route").is_retryable());
        assert!(GatewayError::Timeout.is_retryable());
        assert!(GatewayError::ServerRejected {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!GatewayError::ServerRejected {
            status: 400,
            body: "bad price".into()
        }
        .is_retryable());
        assert!(!GatewayError::protocol("not json").is_retryable());
    }

    #[test]
    fn only_timeouts_have_unknown_outcome() {
        assert!(GatewayError::Timeout.outcome_unknown());
        assert!(!GatewayError::unreachable("down").outcome_unknown());
    }

    #[test]
    fn error_display() {
        let err = EngineError::DuplicateCategory {
            name: "Food".into(),
        };
        assert_eq!(err.to_string(), "category 'Food' already exists");

        let err = EngineError::SignedOut(UserId::new("u1"));
        assert_eq!(err.to_string(), "user u1 is signed out");

        let err: EngineError = GatewayError::ServerRejected {
            status: 404,
            body: "missing".into(),
        }
        .into();
        assert!(err.to_string().contains("404"));
    }
}
