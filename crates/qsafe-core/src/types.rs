//! Algorithm tags, per-call request context and health types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};

/// Wire names for the supported algorithms
pub mod names {
    pub const ML_KEM_768: &str = "ML-KEM-768";
    pub const ML_DSA_65: &str = "ML-DSA-65";
    pub const RSA_2048: &str = "RSA-2048";
}

// ============================================================================
// Algorithms
// ============================================================================

/// Algorithm used to protect an encrypted envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    #[serde(rename = "ML-KEM-768")]
    MlKem768,
    #[serde(rename = "RSA-2048")]
    Rsa2048,
}

impl EncryptionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MlKem768 => names::ML_KEM_768,
            Self::Rsa2048 => names::RSA_2048,
        }
    }

    pub fn is_quantum_safe(&self) -> bool {
        matches!(self, Self::MlKem768)
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            names::ML_KEM_768 => Ok(Self::MlKem768),
            names::RSA_2048 => Ok(Self::Rsa2048),
            other => Err(CryptoError::unknown_encryption_algorithm(other)),
        }
    }
}

/// Algorithm requested for or used by a signature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ML-DSA-65")]
    MlDsa65,
    #[serde(rename = "RSA-2048")]
    Rsa2048,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MlDsa65 => names::ML_DSA_65,
            Self::Rsa2048 => names::RSA_2048,
        }
    }

    pub fn family(&self) -> SignatureFamily {
        match self {
            Self::MlDsa65 => SignatureFamily::Dilithium3,
            Self::Rsa2048 => SignatureFamily::Classical,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            names::ML_DSA_65 => Ok(Self::MlDsa65),
            names::RSA_2048 => Ok(Self::Rsa2048),
            other => Err(CryptoError::unknown_signature_algorithm(other)),
        }
    }
}

/// Family prefix carried by tagged signature strings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureFamily {
    Dilithium3,
    Classical,
}

impl SignatureFamily {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Dilithium3 => "dilithium3:",
            Self::Classical => "classical:",
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Dilithium3 => SignatureAlgorithm::MlDsa65,
            Self::Classical => SignatureAlgorithm::Rsa2048,
        }
    }

    /// Prefix an encoded signature payload with this family's tag
    pub fn tag(&self, payload: &str) -> String {
        format!("{}{}", self.prefix(), payload)
    }

    /// Split a tagged signature into its family and payload
    pub fn parse(tagged: &str) -> Result<(Self, &str)> {
        for family in [Self::Dilithium3, Self::Classical] {
            if let Some(payload) = tagged.strip_prefix(family.prefix()) {
                return Ok((family, payload));
            }
        }
        let tag = tagged.split(':').next().unwrap_or_default();
        Err(CryptoError::unknown_signature_algorithm(tag))
    }
}

// ============================================================================
// Request context
// ============================================================================

/// Caller-supplied decision whether a user should get the PQC path
pub trait PqcPolicy: Send + Sync {
    fn should_use_pqc(&self, user_id: &str) -> bool;
}

impl<F> PqcPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn should_use_pqc(&self, user_id: &str) -> bool {
        self(user_id)
    }
}

/// Per-call context: who is asking and whether PQC may be attempted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub pqc_enabled: bool,
}

impl RequestContext {
    /// Anonymous caller, PQC allowed
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            pqc_enabled: true,
        }
    }

    /// Named caller, PQC allowed
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            pqc_enabled: true,
        }
    }

    /// Evaluate a policy for this caller
    pub fn with_policy<P: PqcPolicy + ?Sized>(mut self, policy: &P) -> Self {
        self.pqc_enabled = policy.should_use_pqc(self.user_id());
        self
    }

    /// Force the classical path for this call
    pub fn classical_only(mut self) -> Self {
        self.pqc_enabled = false;
        self
    }

    /// User id, empty for anonymous callers
    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or_default()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

// ============================================================================
// Key pairs
// ============================================================================

/// Key pair returned by key generation; private key is wiped on drop
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedKeyPair {
    pub algorithm: EncryptionAlgorithm,
    pub key_id: String,
    #[serde(with = "crate::encoding::base64")]
    pub public_key: Vec<u8>,
    #[serde(with = "crate::encoding::base64")]
    pub private_key: Vec<u8>,
    pub fallback_used: bool,
}

impl fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeyPair")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .field("public_key_len", &self.public_key.len())
            .field("fallback_used", &self.fallback_used)
            .finish_non_exhaustive()
    }
}

impl Drop for GeneratedKeyPair {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

// ============================================================================
// Health
// ============================================================================

/// Result of one health probe of both crypto paths
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub pqc: bool,
    pub classical: bool,
    pub fallback_active: bool,
}

/// Overall engine state derived from a [`HealthStatus`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unavailable,
}

impl HealthStatus {
    pub fn from_checks(pqc: bool, classical: bool) -> Self {
        Self {
            pqc,
            classical,
            fallback_active: !pqc && classical,
        }
    }

    pub fn state(&self) -> HealthState {
        match (self.pqc, self.classical) {
            (true, true) => HealthState::Healthy,
            (false, false) => HealthState::Unavailable,
            _ => HealthState::Degraded,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }
}
