//! Primitive-level error types

use qsafe_core::CryptoError;
use thiserror::Error;

/// Result type for primitive operations
pub type Result<T> = std::result::Result<T, PrimitiveError>;

/// Errors raised by the cryptographic primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid secret key
    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),

    /// Invalid signature encoding
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption or authentication failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Encapsulation failed
    #[error("Key encapsulation failed: {0}")]
    EncapsulationFailed(String),

    /// Decapsulation failed
    #[error("Key decapsulation failed: {0}")]
    DecapsulationFailed(String),

    /// Signing failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Random number generation failed
    #[error("RNG failed: {0}")]
    RNGFailed(String),

    /// Self test did not reproduce its input
    #[error("Self test failed: {0}")]
    SelfTestFailed(String),

    /// Blocking task could not be joined
    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

impl From<PrimitiveError> for CryptoError {
    fn from(err: PrimitiveError) -> Self {
        match err {
            PrimitiveError::InvalidPublicKey(_) | PrimitiveError::InvalidSecretKey(_) => {
                CryptoError::InvalidKey(err.to_string())
            }
            PrimitiveError::DecryptionFailed(_) | PrimitiveError::DecapsulationFailed(_) => {
                CryptoError::DecryptionFailed(err.to_string())
            }
            other => CryptoError::ClassicalProviderFailure(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for PrimitiveError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}
