//! # qsafe cryptography
//!
//! Primitives behind both halves of the hybrid engine:
//! - Classical RSA-2048 provider (the always-available fallback)
//! - ML-KEM-768 / ML-DSA-65 wrappers over `pqcrypto`
//! - AES-256-GCM body encryption shared by both key-transport paths
//! - TTL key cache for custodial key material
//!
//! ## Security Model
//!
//! | Function | Post-quantum | Classical |
//! |----------|--------------|-----------|
//! | Key transport | Kyber768 (NIST PQ-3) | RSA-2048 OAEP / SHA-256 |
//! | Signatures | Dilithium3 (NIST PQ-3) | RSA-2048 PKCS#1 v1.5 / SHA-256 |
//! | Payload | AES-256-GCM | AES-256-GCM |

pub mod aead;
pub mod cache;
pub mod classical;
pub mod error;
pub mod pqc;

pub use cache::{CacheStats, TtlCache};
pub use classical::{ClassicalProvider, RsaCiphertext, RsaKeyPair};
pub use error::{PrimitiveError, Result};

/// Re-exported so dependants can name key types without a direct `rsa` dependency
pub use rsa::{RsaPrivateKey, RsaPublicKey};

/// Cryptographic prelude
pub mod prelude {
    pub use crate::aead::{open, seal, SealedBox};
    pub use crate::classical::{ClassicalProvider, RsaCiphertext, RsaKeyPair};
    pub use crate::pqc::{KemKeyPair, SharedSecret, SigningKeyPair};
    pub use crate::error::{PrimitiveError, Result};
}
