//! In-process PQC backend
//!
//! Runs ML-KEM-768 and ML-DSA-65 through `pqcrypto` on the blocking pool and
//! answers in the same JSON shape an out-of-process backend would. Signing
//! keys are custodial: one Dilithium key per crypto identity, held in a TTL
//! cache so the same identity can later verify what it signed.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qsafe_core::config::BackendConfig;
use qsafe_core::{encoding, names};
use qsafe_crypto::pqc::{self, KemKeyPair, SigningKeyPair};
use qsafe_crypto::TtlCache;

use crate::backend::PqcBackend;
use crate::error::TransportError;
use crate::wire::{BackendRequest, BridgeOperation, RequestParams};

/// Local ML-KEM / ML-DSA backend with custodial key caches
pub struct LocalPqcBackend {
    kem_keys: TtlCache<String, KemKeyPair>,
    signing_keys: TtlCache<String, SigningKeyPair>,
    latency_ms: AtomicU64,
    online: AtomicBool,
}

impl LocalPqcBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            kem_keys: TtlCache::new(config.kem_key_ttl(), config.max_cached_keys),
            signing_keys: TtlCache::new(config.signing_key_ttl(), config.max_cached_keys),
            latency_ms: AtomicU64::new(config.simulated_latency_ms),
            online: AtomicBool::new(true),
        }
    }

    pub fn shared(config: &BackendConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Take the backend offline: every call fails at the transport level
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        tracing::info!(online, "Local PQC backend availability changed");
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Delay added before every answer
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Per-cache entry counts and hit ratios
    pub fn cache_stats(&self) -> Value {
        json!({
            "kem": self.kem_keys.stats(),
            "signing": self.signing_keys.stats(),
        })
    }

    /// Drop all custodial key material
    pub fn clear_caches(&self) {
        self.kem_keys.clear();
        self.signing_keys.clear();
        tracing::info!("Local PQC backend caches cleared");
    }

    async fn handle(&self, request: BackendRequest) -> Result<Value, TransportError> {
        let params = request.params;
        match request.operation {
            BridgeOperation::KeyGen => self.handle_key_gen(params).await,
            BridgeOperation::Encapsulate => self.handle_encapsulate(params).await,
            BridgeOperation::Sign => self.handle_sign(params).await,
            BridgeOperation::Verify => self.handle_verify(params).await,
            BridgeOperation::Status => Ok(json!({
                "success": true,
                "pqc_available": true,
                "algorithms_supported": [names::ML_KEM_768, names::ML_DSA_65],
                "cache_stats": self.cache_stats(),
            })),
        }
    }

    async fn handle_key_gen(&self, params: RequestParams) -> Result<Value, TransportError> {
        let Some(identity) = params.user_id else {
            return Ok(failure("user_id parameter required"));
        };
        let pair = tokio::task::spawn_blocking(pqc::kem_keypair)
            .await
            .map_err(|e| TransportError::new(format!("key generation worker: {}", e)))?;
        self.kem_keys.insert(identity, pair.clone());

        Ok(json!({
            "success": true,
            "public_key": encoding::encode(pair.public_key()),
            "private_key": encoding::encode(pair.secret_key()),
            "algorithm": names::ML_KEM_768,
        }))
    }

    async fn handle_encapsulate(&self, params: RequestParams) -> Result<Value, TransportError> {
        // Without an explicit key, encapsulate to the identity's latest key pair
        let public_key = match (&params.public_key, &params.user_id) {
            (Some(encoded), _) => match encoding::decode(encoded) {
                Ok(bytes) => bytes,
                Err(e) => return Ok(failure(&format!("public_key: {}", e))),
            },
            (None, Some(identity)) => match self.kem_keys.get(identity) {
                Some(pair) => pair.public_key().to_vec(),
                None => return Ok(failure("no ML-KEM-768 key for identity")),
            },
            (None, None) => return Ok(failure("public_key or user_id parameter required")),
        };

        let result = tokio::task::spawn_blocking(move || pqc::kem_encapsulate(&public_key))
            .await
            .map_err(|e| TransportError::new(format!("encapsulation worker: {}", e)))?;

        Ok(match result {
            Ok((ciphertext, secret)) => json!({
                "success": true,
                "ciphertext": encoding::encode(&ciphertext),
                "shared_secret": encoding::encode(secret.as_bytes()),
                "algorithm": names::ML_KEM_768,
            }),
            Err(e) => failure(&e.to_string()),
        })
    }

    async fn handle_sign(&self, params: RequestParams) -> Result<Value, TransportError> {
        let (Some(identity), Some(payload)) = (params.user_id, params.payload) else {
            return Ok(failure("user_id and payload parameters required"));
        };
        let message = match encoding::decode(&payload) {
            Ok(bytes) => bytes,
            Err(e) => return Ok(failure(&format!("payload: {}", e))),
        };

        let pair = self.signing_key_for(identity).await?;
        let public_key = pair.public_key().to_vec();
        let result = tokio::task::spawn_blocking(move || pair.sign(&message))
            .await
            .map_err(|e| TransportError::new(format!("signing worker: {}", e)))?;

        Ok(match result {
            Ok(signature) => json!({
                "success": true,
                "token": encoding::encode(&signature),
                "public_key": encoding::encode(&public_key),
                "algorithm": names::ML_DSA_65,
            }),
            Err(e) => failure(&e.to_string()),
        })
    }

    async fn handle_verify(&self, params: RequestParams) -> Result<Value, TransportError> {
        let (Some(identity), Some(payload), Some(signature)) =
            (params.user_id, params.payload, params.signature)
        else {
            return Ok(failure("user_id, payload and signature parameters required"));
        };
        let (message, signature) = match (encoding::decode(&payload), encoding::decode(&signature)) {
            (Ok(m), Ok(s)) => (m, s),
            _ => return Ok(failure("payload and signature must be base64")),
        };
        // An unknown signer is a verdict, not a backend failure
        let Some(pair) = self.signing_keys.get(&identity) else {
            return Ok(json!({
                "success": true,
                "valid": false,
                "algorithm": names::ML_DSA_65,
                "error_message": "no ML-DSA-65 key for identity",
            }));
        };

        let public_key = pair.public_key().to_vec();
        let verify_key = public_key.clone();
        let valid = tokio::task::spawn_blocking(move || pqc::dsa_verify(&verify_key, &message, &signature))
            .await
            .map_err(|e| TransportError::new(format!("verification worker: {}", e)))?;

        Ok(json!({
            "success": true,
            "valid": valid,
            "public_key": encoding::encode(&public_key),
            "algorithm": names::ML_DSA_65,
        }))
    }

    /// Existing signing key, or a new one; concurrent creators keep the first
    async fn signing_key_for(&self, identity: String) -> Result<SigningKeyPair, TransportError> {
        if let Some(pair) = self.signing_keys.get(&identity) {
            return Ok(pair);
        }
        let fresh = tokio::task::spawn_blocking(pqc::dsa_keypair)
            .await
            .map_err(|e| TransportError::new(format!("key generation worker: {}", e)))?;
        tracing::debug!(identity = %identity, "Generated custodial ML-DSA-65 key");
        Ok(self.signing_keys.insert_if_absent(identity, fresh))
    }
}

#[async_trait]
impl PqcBackend for LocalPqcBackend {
    fn name(&self) -> &str {
        "local-pqcrypto"
    }

    async fn call(&self, request: BackendRequest) -> Result<Value, TransportError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.is_online() {
            return Err(TransportError::new("local PQC backend is offline"));
        }
        self.handle(request).await
    }
}

fn failure(message: &str) -> Value {
    json!({ "success": false, "error_message": message })
}
