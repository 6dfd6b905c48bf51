//! Reason codes for PQC failures
//!
//! Every failure signal coming out of the PQC path is reduced to one of a
//! small closed set of codes. The fine-grained code is kept for logs and
//! diagnostics; externally the orchestrator reports a single code.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CryptoError;

/// Closed set of reasons a PQC operation did not produce a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    PqcServiceUnavailable,
    PqcTimeout,
    PqcOperationFailed,
    CircuitBreakerOpen,
    Unknown,
}

impl ReasonCode {
    /// Code reported on envelopes and telemetry, whatever the finer cause
    pub const EXTERNAL_FALLBACK: ReasonCode = ReasonCode::PqcServiceUnavailable;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PqcServiceUnavailable => "PQC_SERVICE_UNAVAILABLE",
            Self::PqcTimeout => "PQC_TIMEOUT",
            Self::PqcOperationFailed => "PQC_OPERATION_FAILED",
            Self::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Collapse to the externally reported code
    pub fn external(self) -> ReasonCode {
        Self::EXTERNAL_FALLBACK
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can be reduced to a [`ReasonCode`]
pub trait Classify {
    fn reason_code(&self) -> ReasonCode;
}

impl Classify for CryptoError {
    fn reason_code(&self) -> ReasonCode {
        match self {
            CryptoError::PqcTimeout { .. } => ReasonCode::PqcTimeout,
            CryptoError::PqcServiceUnavailable(_) => ReasonCode::PqcServiceUnavailable,
            CryptoError::PqcOperationFailed(_) => ReasonCode::PqcOperationFailed,
            CryptoError::CircuitOpen(_) => ReasonCode::CircuitBreakerOpen,
            _ => ReasonCode::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_code_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReasonCode::CircuitBreakerOpen).unwrap(),
            "\"CIRCUIT_BREAKER_OPEN\""
        );
        let code: ReasonCode = serde_json::from_str("\"PQC_TIMEOUT\"").unwrap();
        assert_eq!(code, ReasonCode::PqcTimeout);
        assert_eq!(code.to_string(), "PQC_TIMEOUT");
    }

    #[test]
    fn test_external_collapse() {
        for code in [
            ReasonCode::PqcTimeout,
            ReasonCode::PqcOperationFailed,
            ReasonCode::CircuitBreakerOpen,
            ReasonCode::Unknown,
        ] {
            assert_eq!(code.external(), ReasonCode::PqcServiceUnavailable);
        }
    }

    #[test]
    fn test_classify_crypto_errors() {
        assert_eq!(
            CryptoError::PqcTimeout { timeout_ms: 10 }.reason_code(),
            ReasonCode::PqcTimeout
        );
        assert_eq!(
            CryptoError::CircuitOpen("pqc.sign".into()).reason_code(),
            ReasonCode::CircuitBreakerOpen
        );
        assert_eq!(
            CryptoError::Internal("join".into()).reason_code(),
            ReasonCode::Unknown
        );
    }
}
