//! # qsafe core
//!
//! Shared vocabulary of the hybrid post-quantum / classical crypto engine:
//! - Envelopes returned to callers (encryption and signature)
//! - Crypto identity derivation
//! - Reason codes for PQC failures
//! - Canonical hashing of signed data
//! - Engine configuration
//!
//! | Function | Quantum-safe | Classical fallback |
//! |----------|--------------|--------------------|
//! | Encryption | ML-KEM-768 + AES-256-GCM | RSA-2048 OAEP + AES-256-GCM |
//! | Signatures | ML-DSA-65 (Dilithium3) | RSA-2048 PKCS#1 v1.5 |
//! | Data hashes | SHA-256 | SHA-256 |

pub mod config;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod identity;
pub mod taxonomy;
pub mod types;

pub use config::EngineConfig;
pub use envelope::{
    EncryptedEnvelope, EncryptedPayload, EncryptionMetadata, EncryptionPerformance,
    SignatureEnvelope,
};
pub use error::{CryptoError, Result};
pub use identity::{derive_id, IdentityContext};
pub use taxonomy::{Classify, ReasonCode};
pub use types::*;
