//! PQC bridge
//!
//! The only component that talks to a [`PqcBackend`]. Every call is bounded
//! by a hard timeout and is attempted exactly once; retries and fallback are
//! the caller's business.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

use qsafe_core::config::BridgeConfig;
use qsafe_core::names;
use qsafe_crypto::pqc::{SharedSecret, KYBER768_CIPHERTEXT_SIZE};

use crate::backend::PqcBackend;
use crate::error::{BridgeError, Result};
use crate::wire::{BackendRequest, BackendResponse};

/// Key pair generated by the backend
pub struct BackendKeyPair {
    pub public_key: Vec<u8>,
    pub private_key: Zeroizing<Vec<u8>>,
}

/// Encapsulation produced by the backend
#[derive(Debug)]
pub struct Encapsulation {
    pub ciphertext: Vec<u8>,
    pub shared_secret: SharedSecret,
}

/// Signature produced by the backend with the signer's public key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSignature {
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

/// Verification verdict; the public key is reported when the backend knows it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendVerification {
    pub valid: bool,
    pub public_key: Option<Vec<u8>>,
    /// Backend explanation of a negative verdict
    pub detail: Option<String>,
}

/// Answer to a status request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub pqc_available: bool,
    #[serde(default)]
    pub algorithms_supported: Vec<String>,
    #[serde(default)]
    pub cache_stats: Value,
}

/// Timeout-bounded access to a PQC backend
#[derive(Clone)]
pub struct PqcBridge {
    backend: Arc<dyn PqcBackend>,
    timeout: Duration,
}

impl PqcBridge {
    pub fn new(backend: Arc<dyn PqcBackend>, config: &BridgeConfig) -> Self {
        Self::with_timeout(backend, config.timeout())
    }

    pub fn with_timeout(backend: Arc<dyn PqcBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Invoke one backend operation under the bridge timeout
    pub async fn invoke(&self, request: BackendRequest) -> Result<BackendResponse> {
        let operation = request.operation;
        let started = Instant::now();

        let raw = match tokio::time::timeout(self.timeout, self.backend.call(request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(transport)) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    operation = %operation,
                    error = %transport,
                    "PQC backend call failed"
                );
                return Err(transport.into());
            }
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                tracing::warn!(
                    backend = self.backend.name(),
                    operation = %operation,
                    timeout_ms,
                    "PQC backend call timed out"
                );
                return Err(BridgeError::Timeout { timeout_ms });
            }
        };

        let response = BackendResponse::from_value(raw)?.into_success()?;
        tracing::debug!(
            operation = %operation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "PQC backend call succeeded"
        );
        Ok(response)
    }

    /// ML-KEM-768 key pair for `identity`
    pub async fn generate_key_pair(&self, identity: &str) -> Result<BackendKeyPair> {
        let response = self.invoke(BackendRequest::key_gen(identity)).await?;
        response.expect_algorithm(names::ML_KEM_768)?;
        Ok(BackendKeyPair {
            public_key: response.bytes("public_key")?,
            private_key: Zeroizing::new(response.bytes("private_key")?),
        })
    }

    /// Encapsulate a fresh shared secret to an ML-KEM-768 public key
    pub async fn encapsulate(&self, identity: &str, public_key: &[u8]) -> Result<Encapsulation> {
        let response = self
            .invoke(BackendRequest::encapsulate(identity, public_key))
            .await?;
        response.expect_algorithm(names::ML_KEM_768)?;

        let ciphertext = response.bytes("ciphertext")?;
        if ciphertext.len() != KYBER768_CIPHERTEXT_SIZE {
            return Err(BridgeError::MalformedResponse(format!(
                "ciphertext must be {} bytes, got {}",
                KYBER768_CIPHERTEXT_SIZE,
                ciphertext.len()
            )));
        }
        let secret = Zeroizing::new(response.bytes("shared_secret")?);
        let shared_secret = SharedSecret::from_slice(&secret)
            .map_err(|e| BridgeError::MalformedResponse(e.to_string()))?;

        Ok(Encapsulation {
            ciphertext,
            shared_secret,
        })
    }

    /// ML-DSA-65 signature with the identity's custodial key
    pub async fn sign(&self, identity: &str, message: &[u8]) -> Result<BackendSignature> {
        let response = self.invoke(BackendRequest::sign(identity, message)).await?;
        response.expect_algorithm(names::ML_DSA_65)?;
        Ok(BackendSignature {
            signature: response.bytes("token")?,
            public_key: response.bytes("public_key")?,
        })
    }

    /// Check an ML-DSA-65 signature against the identity's custodial key
    pub async fn verify(
        &self,
        identity: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<BackendVerification> {
        let response = self
            .invoke(BackendRequest::verify(identity, message, signature))
            .await?;
        response.expect_algorithm(names::ML_DSA_65)?;
        let valid = response
            .valid
            .ok_or_else(|| BridgeError::MalformedResponse("missing field valid".to_string()))?;
        let public_key = if response.public_key.is_some() {
            Some(response.bytes("public_key")?)
        } else {
            None
        };
        Ok(BackendVerification {
            valid,
            public_key,
            detail: response.error_message,
        })
    }

    /// Backend availability, algorithms and cache figures
    pub async fn status(&self) -> Result<BackendStatus> {
        let response = self.invoke(BackendRequest::status()).await?;
        serde_json::from_value(Value::Object(response.extra))
            .map_err(|e| BridgeError::MalformedResponse(format!("status: {}", e)))
    }
}

impl std::fmt::Debug for PqcBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PqcBridge")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
