//! Error types for the hybrid crypto engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur in hybrid crypto operations
///
/// The first four kinds are recovered inside the orchestrator by falling back
/// to the classical provider; callers only ever see them as a reason code on
/// an envelope. The remaining kinds are fatal and propagate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    // === Recoverable PQC failures ===
    /// Backend did not answer within the bridge timeout
    #[error("PQC backend timed out after {timeout_ms}ms")]
    PqcTimeout { timeout_ms: u64 },

    /// Backend transport or process failure
    #[error("PQC service unavailable: {0}")]
    PqcServiceUnavailable(String),

    /// Backend answered but reported failure or returned a malformed result
    #[error("PQC operation failed: {0}")]
    PqcOperationFailed(String),

    /// Call rejected by the circuit breaker
    #[error("Circuit breaker open for operation: {0}")]
    CircuitOpen(String),

    // === Fatal failures ===
    /// Envelope or signature carries an algorithm tag this engine does not know
    #[error("{0}")]
    UnknownAlgorithm(String),

    /// The classical fallback itself failed
    #[error("Classical provider failure: {0}")]
    ClassicalProviderFailure(String),

    /// Key material could not be parsed or does not match the envelope
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Authenticated decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Envelope or data could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is invalid or could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (task join failures and the like)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CryptoError {
    /// Build the error reported for an unrecognised encryption algorithm tag
    pub fn unknown_encryption_algorithm(tag: &str) -> Self {
        Self::UnknownAlgorithm(format!("Unknown encryption algorithm: {}", tag))
    }

    /// Build the error reported for an unrecognised signature family prefix
    pub fn unknown_signature_algorithm(tag: &str) -> Self {
        Self::UnknownAlgorithm(format!("Unknown signature algorithm: {}", tag))
    }

    /// Get the numeric error code for API responses
    pub fn code(&self) -> u32 {
        match self {
            Self::PqcTimeout { .. } => 2001,
            Self::PqcServiceUnavailable(_) => 2002,
            Self::PqcOperationFailed(_) => 2003,
            Self::CircuitOpen(_) => 2004,
            Self::UnknownAlgorithm(_) => 2101,
            Self::ClassicalProviderFailure(_) => 2102,
            Self::InvalidKey(_) | Self::DecryptionFailed(_) => 2103,
            _ => 9999,
        }
    }

    /// Check if the orchestrator can recover from this error by falling back
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PqcTimeout { .. }
                | Self::PqcServiceUnavailable(_)
                | Self::PqcOperationFailed(_)
                | Self::CircuitOpen(_)
        )
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CryptoError::PqcTimeout { timeout_ms: 50 }.code(), 2001);
        assert_eq!(CryptoError::unknown_encryption_algorithm("AES").code(), 2101);
        assert_eq!(CryptoError::Internal("x".into()).code(), 9999);
    }

    #[test]
    fn test_unknown_algorithm_message() {
        let err = CryptoError::unknown_encryption_algorithm("ROT13");
        assert_eq!(err.to_string(), "Unknown encryption algorithm: ROT13");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(CryptoError::CircuitOpen("pqc.encrypt".into()).is_recoverable());
        assert!(CryptoError::PqcServiceUnavailable("down".into()).is_recoverable());
        assert!(!CryptoError::ClassicalProviderFailure("rng".into()).is_recoverable());
        assert!(!CryptoError::unknown_signature_algorithm("ecdsa").is_recoverable());
    }
}
