//! Bridge error types

use qsafe_core::{Classify, CryptoError, ReasonCode};
use thiserror::Error;

/// Result type for bridge calls
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure raised by a backend implementation before it produced a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Structured error for every bridge invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// No answer within the configured timeout
    #[error("PQC backend timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport or process failure reaching the backend
    #[error("PQC service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Backend answered with `success=false`
    #[error("PQC operation failed: {0}")]
    OperationFailed(String),

    /// Backend answered with something other than the expected shape
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),
}

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        Self::ServiceUnavailable(err.message)
    }
}

impl Classify for BridgeError {
    fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Timeout { .. } => ReasonCode::PqcTimeout,
            Self::ServiceUnavailable(_) => ReasonCode::PqcServiceUnavailable,
            Self::OperationFailed(_) | Self::MalformedResponse(_) => ReasonCode::PqcOperationFailed,
        }
    }
}

impl From<BridgeError> for CryptoError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout { timeout_ms } => CryptoError::PqcTimeout { timeout_ms },
            BridgeError::ServiceUnavailable(msg) => CryptoError::PqcServiceUnavailable(msg),
            BridgeError::OperationFailed(msg) => CryptoError::PqcOperationFailed(msg),
            BridgeError::MalformedResponse(msg) => {
                CryptoError::PqcOperationFailed(format!("malformed response: {}", msg))
            }
        }
    }
}
