//! Encryption and signature envelopes
//!
//! Envelopes are the self-describing results handed back to callers. The
//! algorithm of an [`EncryptedEnvelope`] is carried by the variant of its
//! [`EncryptedPayload`], so decrypt sites match exhaustively; an unknown tag
//! can only appear while parsing external JSON and is rejected there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CryptoError, Result};
use crate::taxonomy::ReasonCode;
use crate::types::{EncryptionAlgorithm, SignatureAlgorithm};

// ============================================================================
// Encrypted envelope
// ============================================================================

/// Ciphertext material, one variant per algorithm family
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum EncryptedPayload {
    /// ML-KEM-768 encapsulation plus AES-256-GCM body
    #[serde(rename = "ML-KEM-768")]
    MlKem768 {
        #[serde(rename = "kemCiphertext", with = "crate::encoding::base64")]
        kem_ciphertext: Vec<u8>,
        #[serde(with = "crate::encoding::base64")]
        ciphertext: Vec<u8>,
    },

    /// RSA-2048 OAEP wrapped content key plus AES-256-GCM body
    #[serde(rename = "RSA-2048")]
    Rsa2048 {
        #[serde(rename = "wrappedKey", with = "crate::encoding::base64")]
        wrapped_key: Vec<u8>,
        #[serde(with = "crate::encoding::base64")]
        ciphertext: Vec<u8>,
    },
}

impl EncryptedPayload {
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        match self {
            Self::MlKem768 { .. } => EncryptionAlgorithm::MlKem768,
            Self::Rsa2048 { .. } => EncryptionAlgorithm::Rsa2048,
        }
    }

    /// Symmetric body, without the key-transport part
    pub fn ciphertext(&self) -> &[u8] {
        match self {
            Self::MlKem768 { ciphertext, .. } | Self::Rsa2048 { ciphertext, .. } => ciphertext,
        }
    }
}

/// Timing and size figures recorded at encryption time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionPerformance {
    pub encryption_time_ms: f64,
    pub key_size_bytes: usize,
}

/// Metadata attached to every encrypted envelope
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMetadata {
    pub key_id: String,
    #[serde(with = "crate::encoding::base64")]
    pub nonce: Vec<u8>,
    pub timestamp_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<ReasonCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    pub performance: EncryptionPerformance,
}

/// Result of an encrypt operation; immutable once built
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    #[serde(flatten)]
    payload: EncryptedPayload,
    fallback_used: bool,
    metadata: EncryptionMetadata,
}

impl EncryptedEnvelope {
    pub fn new(payload: EncryptedPayload, fallback_used: bool, metadata: EncryptionMetadata) -> Self {
        Self {
            payload,
            fallback_used,
            metadata,
        }
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.payload.algorithm()
    }

    pub fn payload(&self) -> &EncryptedPayload {
        &self.payload
    }

    pub fn ciphertext(&self) -> &[u8] {
        self.payload.ciphertext()
    }

    pub fn fallback_used(&self) -> bool {
        self.fallback_used
    }

    pub fn metadata(&self) -> &EncryptionMetadata {
        &self.metadata
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse an envelope, rejecting unknown algorithm tags with
    /// [`CryptoError::UnknownAlgorithm`] rather than a generic parse error.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let tag = value
            .get("algorithm")
            .and_then(Value::as_str)
            .ok_or_else(|| CryptoError::Serialization("envelope has no algorithm tag".to_string()))?;
        tag.parse::<EncryptionAlgorithm>()?;
        Ok(serde_json::from_value(value)?)
    }
}

// ============================================================================
// Signature envelope
// ============================================================================

/// Result of a signing operation
///
/// `signature` is a family-tagged string (`dilithium3:` or `classical:`
/// followed by base64). The signed message binds `signed_data_hash`,
/// `signer_id` and `timestamp_utc`, so none of them can be altered without
/// invalidating the signature. `requested_algorithm` is what the caller asked
/// for; the signer identity is scoped to it, whichever path actually signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureEnvelope {
    pub signature: String,
    pub algorithm: SignatureAlgorithm,
    pub requested_algorithm: SignatureAlgorithm,
    pub public_key_hash: String,
    pub timestamp_utc: DateTime<Utc>,
    pub signed_data_hash: String,
    pub signer_id: String,
    #[serde(default)]
    pub fallback_used: bool,
}

impl SignatureEnvelope {
    /// Bytes actually covered by the cryptographic signature
    pub fn signing_input(signed_data_hash: &str, signer_id: &str, timestamp: &DateTime<Utc>) -> Vec<u8> {
        format!(
            "qsafe-signature-v1\n{}\n{}\n{}",
            signed_data_hash,
            signer_id,
            timestamp.timestamp_millis()
        )
        .into_bytes()
    }

    /// Signing input recomputed from this envelope's own fields
    pub fn message(&self) -> Vec<u8> {
        Self::signing_input(&self.signed_data_hash, &self.signer_id, &self.timestamp_utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: EncryptedPayload, fallback_used: bool) -> EncryptedEnvelope {
        EncryptedEnvelope::new(
            payload,
            fallback_used,
            EncryptionMetadata {
                key_id: "key-1".into(),
                nonce: vec![7u8; 12],
                timestamp_utc: Utc::now(),
                fallback_reason: fallback_used.then_some(ReasonCode::PqcServiceUnavailable),
                original_error: None,
                performance: EncryptionPerformance {
                    encryption_time_ms: 1.5,
                    key_size_bytes: 256,
                },
            },
        )
    }

    #[test]
    fn test_json_shape() {
        let env = sample(
            EncryptedPayload::Rsa2048 {
                wrapped_key: vec![1, 2, 3],
                ciphertext: vec![4, 5, 6],
            },
            true,
        );
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["algorithm"], "RSA-2048");
        assert_eq!(value["fallbackUsed"], true);
        assert_eq!(value["metadata"]["fallbackReason"], "PQC_SERVICE_UNAVAILABLE");
        assert_eq!(value["metadata"]["keyId"], "key-1");

        let parsed = EncryptedEnvelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.algorithm(), EncryptionAlgorithm::Rsa2048);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let env = sample(
            EncryptedPayload::MlKem768 {
                kem_ciphertext: vec![9; 4],
                ciphertext: vec![1; 4],
            },
            false,
        );
        let mut value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        value["algorithm"] = Value::String("XChaCha-Quantum".into());

        let err = EncryptedEnvelope::from_json(&value.to_string()).unwrap_err();
        assert_eq!(
            err,
            CryptoError::UnknownAlgorithm("Unknown encryption algorithm: XChaCha-Quantum".into())
        );
    }

    #[test]
    fn test_signing_input_binds_fields() {
        let ts = Utc::now();
        let a = SignatureEnvelope::signing_input("h1", "user:x", &ts);
        let b = SignatureEnvelope::signing_input("h2", "user:x", &ts);
        let c = SignatureEnvelope::signing_input("h1", "user:y", &ts);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
