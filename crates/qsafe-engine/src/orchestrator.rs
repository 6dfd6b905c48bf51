// ============================================================================
// Hybrid Crypto Orchestrator
// ============================================================================
//
// Public entry point of the engine. Every operation tries the quantum-safe
// path first, through the circuit breaker and the PQC bridge, and completes
// on the classical RSA-2048 provider when that path fails for any reason.
//
// Flow per operation:
//   caller -> RequestContext policy -> breaker(name) -> bridge -> backend
//                                  \-> on failure: classify -> classical -> telemetry
//
// Failures of the PQC path never reach the caller; they appear only as
// `fallback_used = true` plus a reason code on the returned envelope.
// Classical failures are fatal and propagate.
//
// ============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;
use zeroize::Zeroizing;

use qsafe_bridge::{BackendStatus, BridgeError, PqcBridge};
use qsafe_core::identity::derive_optional_id;
use qsafe_core::{
    names, Classify, CryptoError, EncryptedEnvelope, EncryptedPayload, EncryptionAlgorithm,
    EncryptionMetadata, EncryptionPerformance, EngineConfig, GeneratedKeyPair, HealthState,
    HealthStatus, IdentityContext, ReasonCode, RequestContext, Result, SignatureAlgorithm,
    SignatureFamily,
};
use qsafe_crypto::aead;
use qsafe_crypto::classical::{public_key_to_der, RSA_BLOCK_SIZE};
use qsafe_crypto::pqc::{self, KemKeyPair};
use qsafe_crypto::{ClassicalProvider, PrimitiveError, RsaCiphertext, RsaPrivateKey, RsaPublicKey};

use crate::circuit_breaker::{BreakerHealth, CircuitBreaker, CircuitError, CircuitStats};
use crate::keyring::ClassicalKeyring;
use crate::telemetry::{deliver, FallbackEvent, TelemetrySink, TracingTelemetrySink};

/// Circuit names, one per PQC operation
pub mod circuits {
    pub const ENCRYPT: &str = "pqc.encrypt";
    pub const KEYGEN: &str = "pqc.keygen";
    pub const SIGN: &str = "pqc.sign";
    pub const VERIFY: &str = "pqc.verify";
}

/// Operation labels used for identities and telemetry
pub mod operations {
    pub const ENCRYPTION: &str = "encryption";
    pub const KEY_GENERATION: &str = "key_generation";
    pub const SIGNATURE: &str = qsafe_core::identity::SIGNATURE_OPERATION;
    pub const HEALTH_CHECK: &str = "health_check";
}

const CANARY_MESSAGE: &[u8] = b"qsafe pqc canary";

// ============================================================================
// Key references
// ============================================================================

/// Public keys of one recipient
///
/// The ML-KEM key is optional: a recipient without one is always served on the
/// classical path.
#[derive(Clone, Debug)]
pub struct RecipientKeys {
    pub key_id: String,
    pub ml_kem_public_key: Option<Vec<u8>>,
    pub rsa_public_key: RsaPublicKey,
}

/// Private keys matching a [`RecipientKeys`]
#[derive(Clone)]
pub struct DecryptionKeys {
    pub key_id: String,
    pub ml_kem_secret_key: Option<Zeroizing<Vec<u8>>>,
    pub rsa_private_key: RsaPrivateKey,
}

impl std::fmt::Debug for DecryptionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionKeys")
            .field("key_id", &self.key_id)
            .field("ml_kem", &self.ml_kem_secret_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Recipient and decryption halves sharing one key id
#[derive(Clone, Debug)]
pub struct KeyBundle {
    pub recipient: RecipientKeys,
    pub decryption: DecryptionKeys,
}

impl KeyBundle {
    /// Whether the bundle can receive on the quantum-safe path
    pub fn is_quantum_safe(&self) -> bool {
        self.recipient.ml_kem_public_key.is_some() && self.decryption.ml_kem_secret_key.is_some()
    }
}

// ============================================================================
// Signature results
// ============================================================================

/// Raw signature produced by [`Orchestrator::sign_with_fallback`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureOutput {
    pub family: SignatureFamily,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
    pub fallback_used: bool,
}

/// Outcome of checking a raw signature
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Signature verifies; the signer's public key when known
    Valid { public_key: Option<Vec<u8>> },
    /// Signature does not verify
    Invalid { detail: Option<String> },
    /// No verdict could be obtained
    Unavailable(String),
}

/// Health plus breaker and backend detail
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub state: HealthState,
    pub breaker: BreakerHealth,
    pub circuits: Vec<CircuitStats>,
    pub backend: Option<BackendStatus>,
    pub checked_at: DateTime<Utc>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// PQC-first crypto operations with classical fallback
pub struct Orchestrator {
    bridge: PqcBridge,
    breaker: Arc<CircuitBreaker>,
    classical: Arc<ClassicalProvider>,
    keyring: Arc<ClassicalKeyring>,
    telemetry: Arc<dyn TelemetrySink>,
    telemetry_enabled: bool,
    telemetry_timeout: Duration,
    canary: KemKeyPair,
}

impl Orchestrator {
    pub fn new(bridge: PqcBridge, config: &EngineConfig) -> Self {
        let classical = Arc::new(ClassicalProvider::new());
        Self {
            bridge,
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            keyring: Arc::new(ClassicalKeyring::new(classical.clone())),
            classical,
            telemetry: Arc::new(TracingTelemetrySink),
            telemetry_enabled: config.telemetry.enabled,
            telemetry_timeout: config.telemetry.delivery_timeout(),
            canary: pqc::kem_keypair(),
        }
    }

    /// Replace the telemetry sink
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn bridge(&self) -> &PqcBridge {
        &self.bridge
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn classical(&self) -> &ClassicalProvider {
        &self.classical
    }

    pub fn keyring(&self) -> &ClassicalKeyring {
        &self.keyring
    }

    // ------------------------------------------------------------------------
    // Encryption
    // ------------------------------------------------------------------------

    /// Encrypt `plaintext` for `recipient`, ML-KEM-768 first
    pub async fn encrypt_with_fallback(
        &self,
        plaintext: &[u8],
        recipient: &RecipientKeys,
        ctx: &RequestContext,
    ) -> Result<EncryptedEnvelope> {
        let started = Instant::now();

        let public_key = match (&recipient.ml_kem_public_key, ctx.pqc_enabled) {
            (Some(public_key), true) => public_key,
            _ => {
                tracing::debug!(key_id = %recipient.key_id, "PQC not selected, encrypting classically");
                return self.encrypt_classical(plaintext, recipient, started, None);
            }
        };

        let identity = derive_optional_id(
            ctx.user_id.as_deref(),
            &IdentityContext::new(names::ML_KEM_768, operations::ENCRYPTION),
        );
        let attempt = self
            .breaker
            .execute(circuits::ENCRYPT, || self.bridge.encapsulate(&identity, public_key))
            .await;

        match attempt {
            Ok(encapsulation) => {
                let sealed = aead::seal(
                    encapsulation.shared_secret.as_bytes(),
                    names::ML_KEM_768.as_bytes(),
                    plaintext,
                )
                .map_err(|e| self.classical_failure(operations::ENCRYPTION, e))?;

                let envelope = EncryptedEnvelope::new(
                    EncryptedPayload::MlKem768 {
                        kem_ciphertext: encapsulation.ciphertext,
                        ciphertext: sealed.ciphertext,
                    },
                    false,
                    metadata(recipient, sealed.nonce.to_vec(), started, public_key.len(), None),
                );
                tracing::debug!(
                    operation = operations::ENCRYPTION,
                    algorithm = names::ML_KEM_768,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Encrypted on quantum-safe path"
                );
                Ok(envelope)
            }
            Err(err) => {
                let reason = self.log_fallback(operations::ENCRYPTION, &err);
                let envelope = self.encrypt_classical(
                    plaintext,
                    recipient,
                    started,
                    Some((reason, err.to_string())),
                )?;
                self.report_fallback(
                    reason,
                    names::RSA_2048,
                    names::ML_KEM_768,
                    identity,
                    operations::ENCRYPTION,
                )
                .await;
                Ok(envelope)
            }
        }
    }

    fn encrypt_classical(
        &self,
        plaintext: &[u8],
        recipient: &RecipientKeys,
        started: Instant,
        fallback: Option<(ReasonCode, String)>,
    ) -> Result<EncryptedEnvelope> {
        let RsaCiphertext {
            wrapped_key,
            nonce,
            encrypted_data,
        } = self
            .classical
            .encrypt_rsa(plaintext, &recipient.rsa_public_key)
            .map_err(|e| self.classical_failure(operations::ENCRYPTION, e))?;

        let fallback_used = fallback.is_some();
        Ok(EncryptedEnvelope::new(
            EncryptedPayload::Rsa2048 {
                wrapped_key,
                ciphertext: encrypted_data,
            },
            fallback_used,
            metadata(recipient, nonce.to_vec(), started, RSA_BLOCK_SIZE, fallback),
        ))
    }

    /// Decrypt an envelope, dispatching on its algorithm
    pub fn decrypt_with_fallback(
        &self,
        envelope: &EncryptedEnvelope,
        keys: &DecryptionKeys,
    ) -> Result<Vec<u8>> {
        let meta = envelope.metadata();
        if meta.key_id != keys.key_id {
            return Err(CryptoError::InvalidKey(format!(
                "envelope key id {} does not match {}",
                meta.key_id, keys.key_id
            )));
        }

        let plaintext = match envelope.payload() {
            EncryptedPayload::MlKem768 {
                kem_ciphertext,
                ciphertext,
            } => {
                let secret_key = keys.ml_kem_secret_key.as_ref().ok_or_else(|| {
                    CryptoError::InvalidKey("no ML-KEM-768 secret key for envelope".to_string())
                })?;
                let shared = pqc::kem_decapsulate(secret_key, kem_ciphertext)?;
                aead::open(
                    shared.as_bytes(),
                    &meta.nonce,
                    names::ML_KEM_768.as_bytes(),
                    ciphertext,
                )?
            }
            EncryptedPayload::Rsa2048 {
                wrapped_key,
                ciphertext,
            } => {
                let nonce: [u8; aead::AEAD_NONCE_SIZE] = meta.nonce.as_slice().try_into().map_err(|_| {
                    CryptoError::DecryptionFailed(format!(
                        "nonce must be {} bytes, got {}",
                        aead::AEAD_NONCE_SIZE,
                        meta.nonce.len()
                    ))
                })?;
                let rsa = RsaCiphertext {
                    wrapped_key: wrapped_key.clone(),
                    nonce,
                    encrypted_data: ciphertext.clone(),
                };
                self.classical.decrypt_rsa(&rsa, &keys.rsa_private_key)?
            }
        };

        tracing::debug!(
            algorithm = %envelope.algorithm(),
            key_id = %meta.key_id,
            "Decrypted envelope"
        );
        Ok(plaintext)
    }

    /// Parse a JSON envelope and decrypt it
    pub fn decrypt_json(&self, json: &str, keys: &DecryptionKeys) -> Result<Vec<u8>> {
        let envelope = EncryptedEnvelope::from_json(json)?;
        self.decrypt_with_fallback(&envelope, keys)
    }

    // ------------------------------------------------------------------------
    // Key generation
    // ------------------------------------------------------------------------

    /// New key pair, ML-KEM-768 first
    pub async fn generate_key_pair_with_fallback(
        &self,
        ctx: &RequestContext,
    ) -> Result<GeneratedKeyPair> {
        let key_id = Uuid::new_v4().to_string();

        if ctx.pqc_enabled {
            let identity = derive_optional_id(
                ctx.user_id.as_deref(),
                &IdentityContext::new(names::ML_KEM_768, operations::KEY_GENERATION),
            );
            let attempt = self
                .breaker
                .execute(circuits::KEYGEN, || self.bridge.generate_key_pair(&identity))
                .await;

            match attempt {
                Ok(pair) => {
                    return Ok(GeneratedKeyPair {
                        algorithm: EncryptionAlgorithm::MlKem768,
                        key_id,
                        public_key: pair.public_key,
                        private_key: pair.private_key.to_vec(),
                        fallback_used: false,
                    });
                }
                Err(err) => {
                    let reason = self.log_fallback(operations::KEY_GENERATION, &err);
                    let pair = self.generate_classical_pair(key_id, true).await?;
                    self.report_fallback(
                        reason,
                        names::RSA_2048,
                        names::ML_KEM_768,
                        identity,
                        operations::KEY_GENERATION,
                    )
                    .await;
                    return Ok(pair);
                }
            }
        }

        self.generate_classical_pair(key_id, false).await
    }

    async fn generate_classical_pair(
        &self,
        key_id: String,
        fallback_used: bool,
    ) -> Result<GeneratedKeyPair> {
        let failure = |e| self.classical_failure(operations::KEY_GENERATION, e);
        let pair = self.classical.generate_rsa_key_pair().await.map_err(failure)?;
        let public_key = pair.public_key_der().map_err(failure)?;
        let private_key = pair.private_key_der().map_err(failure)?;

        Ok(GeneratedKeyPair {
            algorithm: EncryptionAlgorithm::Rsa2048,
            key_id,
            public_key,
            private_key: private_key.to_vec(),
            fallback_used,
        })
    }

    /// Recipient bundle with an RSA-2048 key and, when available, an ML-KEM-768 key
    pub async fn generate_key_bundle(&self, ctx: &RequestContext) -> Result<KeyBundle> {
        let key_id = Uuid::new_v4().to_string();
        let rsa = self
            .classical
            .generate_rsa_key_pair()
            .await
            .map_err(|e| self.classical_failure(operations::KEY_GENERATION, e))?;

        let ml_kem = if ctx.pqc_enabled {
            let identity = derive_optional_id(
                ctx.user_id.as_deref(),
                &IdentityContext::new(names::ML_KEM_768, operations::KEY_GENERATION),
            );
            match self
                .breaker
                .execute(circuits::KEYGEN, || self.bridge.generate_key_pair(&identity))
                .await
            {
                Ok(pair) => Some(pair),
                Err(err) => {
                    tracing::warn!(
                        key_id = %key_id,
                        reason = %err.reason_code(),
                        error = %err,
                        "Key bundle issued without ML-KEM-768 key"
                    );
                    None
                }
            }
        } else {
            None
        };

        let (ml_kem_public_key, ml_kem_secret_key) = match ml_kem {
            Some(pair) => (Some(pair.public_key), Some(pair.private_key)),
            None => (None, None),
        };

        Ok(KeyBundle {
            recipient: RecipientKeys {
                key_id: key_id.clone(),
                ml_kem_public_key,
                rsa_public_key: rsa.public_key().clone(),
            },
            decryption: DecryptionKeys {
                key_id,
                ml_kem_secret_key,
                rsa_private_key: rsa.private_key().clone(),
            },
        })
    }

    // ------------------------------------------------------------------------
    // Signatures
    // ------------------------------------------------------------------------

    /// Sign `message` as `signer_id`, ML-DSA-65 first when requested
    pub async fn sign_with_fallback(
        &self,
        message: &[u8],
        signer_id: &str,
        requested: SignatureAlgorithm,
        ctx: &RequestContext,
    ) -> Result<SignatureOutput> {
        if requested == SignatureAlgorithm::MlDsa65 && ctx.pqc_enabled {
            let attempt = self
                .breaker
                .execute(circuits::SIGN, || self.bridge.sign(signer_id, message))
                .await;

            match attempt {
                Ok(signed) => {
                    return Ok(SignatureOutput {
                        family: SignatureFamily::Dilithium3,
                        signature: signed.signature,
                        public_key: signed.public_key,
                        fallback_used: false,
                    });
                }
                Err(err) => {
                    let reason = self.log_fallback(operations::SIGNATURE, &err);
                    let output = self.sign_classical(message, signer_id, true).await?;
                    self.report_fallback(
                        reason,
                        names::RSA_2048,
                        names::ML_DSA_65,
                        signer_id.to_string(),
                        operations::SIGNATURE,
                    )
                    .await;
                    return Ok(output);
                }
            }
        }

        self.sign_classical(message, signer_id, false).await
    }

    async fn sign_classical(
        &self,
        message: &[u8],
        signer_id: &str,
        fallback_used: bool,
    ) -> Result<SignatureOutput> {
        let pair = self.keyring.get_or_create(signer_id).await.map_err(|e| {
            tracing::error!(operation = operations::SIGNATURE, error = %e, "Classical key unavailable");
            CryptoError::ClassicalProviderFailure(e.to_string())
        })?;
        let failure = |e| self.classical_failure(operations::SIGNATURE, e);
        let signature = self
            .classical
            .sign_rsa(message, pair.private_key())
            .map_err(failure)?;
        let public_key = pair.public_key_der().map_err(failure)?;

        Ok(SignatureOutput {
            family: SignatureFamily::Classical,
            signature,
            public_key,
            fallback_used,
        })
    }

    /// Check a raw signature of the given family for `signer_id`
    pub async fn verify_raw(
        &self,
        family: SignatureFamily,
        message: &[u8],
        signature: &[u8],
        signer_id: &str,
    ) -> Result<SignatureCheck> {
        match family {
            SignatureFamily::Dilithium3 => {
                let attempt = self
                    .breaker
                    .execute(circuits::VERIFY, || {
                        self.bridge.verify(signer_id, message, signature)
                    })
                    .await;
                Ok(match attempt {
                    Ok(verdict) if verdict.valid => SignatureCheck::Valid {
                        public_key: verdict.public_key,
                    },
                    Ok(verdict) => SignatureCheck::Invalid {
                        detail: verdict.detail,
                    },
                    Err(err) => {
                        tracing::warn!(
                            operation = operations::SIGNATURE,
                            reason = %err.reason_code(),
                            error = %err,
                            "ML-DSA-65 verification unavailable"
                        );
                        SignatureCheck::Unavailable(err.to_string())
                    }
                })
            }
            SignatureFamily::Classical => {
                let Some(pair) = self.keyring.get(signer_id) else {
                    return Ok(SignatureCheck::Invalid {
                        detail: Some("No classical key for signer".to_string()),
                    });
                };
                if self.classical.verify_rsa(message, signature, pair.public_key()) {
                    let public_key = public_key_to_der(pair.public_key())?;
                    Ok(SignatureCheck::Valid {
                        public_key: Some(public_key),
                    })
                } else {
                    Ok(SignatureCheck::Invalid { detail: None })
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------------

    /// Probe both paths: one PQC canary encryption and the classical self test
    pub async fn get_health_status(&self) -> HealthStatus {
        let (pqc, classical) = tokio::join!(self.pqc_canary(), self.classical.health_check());

        let pqc = match pqc {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(operation = operations::HEALTH_CHECK, error = %e, "PQC canary failed");
                false
            }
        };
        let classical = match classical {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(operation = operations::HEALTH_CHECK, error = %e, "Classical self test failed");
                false
            }
        };

        let status = HealthStatus::from_checks(pqc, classical);
        tracing::debug!(
            pqc,
            classical,
            fallback_active = status.fallback_active,
            "Health check complete"
        );
        status
    }

    /// Health plus breaker snapshot and backend status
    pub async fn health_report(&self) -> HealthReport {
        let (status, backend) = tokio::join!(self.get_health_status(), self.bridge.status());
        HealthReport {
            state: status.state(),
            status,
            breaker: self.breaker.health_status(),
            circuits: self.breaker.snapshot(),
            backend: backend.ok(),
            checked_at: Utc::now(),
        }
    }

    async fn pqc_canary(&self) -> Result<()> {
        let identity = derive_optional_id(
            None,
            &IdentityContext::new(names::ML_KEM_768, operations::HEALTH_CHECK),
        );
        let encapsulation = self
            .bridge
            .encapsulate(&identity, self.canary.public_key())
            .await?;

        let sealed = aead::seal(
            encapsulation.shared_secret.as_bytes(),
            names::ML_KEM_768.as_bytes(),
            CANARY_MESSAGE,
        )?;
        let shared = pqc::kem_decapsulate(self.canary.secret_key(), &encapsulation.ciphertext)?;
        let opened = aead::open(
            shared.as_bytes(),
            &sealed.nonce,
            names::ML_KEM_768.as_bytes(),
            &sealed.ciphertext,
        )?;
        if opened != CANARY_MESSAGE {
            return Err(CryptoError::PqcOperationFailed(
                "canary round trip mismatch".to_string(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn log_fallback(&self, operation: &str, err: &CircuitError<BridgeError>) -> ReasonCode {
        let reason = err.reason_code();
        tracing::warn!(
            operation,
            reason = %reason,
            error = %err,
            "PQC path failed, using classical fallback"
        );
        reason
    }

    async fn report_fallback(
        &self,
        reason: ReasonCode,
        algorithm: &str,
        original_algorithm: &str,
        user_id: String,
        operation: &str,
    ) {
        if !self.telemetry_enabled {
            return;
        }
        let event = FallbackEvent::new(reason, algorithm, original_algorithm, user_id, operation);
        deliver(self.telemetry.as_ref(), &event, self.telemetry_timeout).await;
    }

    fn classical_failure(&self, operation: &str, err: PrimitiveError) -> CryptoError {
        tracing::error!(operation, error = %err, "Classical provider failed");
        CryptoError::ClassicalProviderFailure(err.to_string())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bridge", &self.bridge)
            .field("breaker", &self.breaker)
            .field("telemetry_enabled", &self.telemetry_enabled)
            .finish_non_exhaustive()
    }
}

fn metadata(
    recipient: &RecipientKeys,
    nonce: Vec<u8>,
    started: Instant,
    key_size_bytes: usize,
    fallback: Option<(ReasonCode, String)>,
) -> EncryptionMetadata {
    let (fallback_reason, original_error) = match fallback {
        Some((reason, error)) => (Some(reason.external()), Some(error)),
        None => (None, None),
    };
    EncryptionMetadata {
        key_id: recipient.key_id.clone(),
        nonce,
        timestamp_utc: Utc::now(),
        fallback_reason,
        original_error,
        performance: EncryptionPerformance {
            encryption_time_ms: started.elapsed().as_secs_f64() * 1_000.0,
            key_size_bytes,
        },
    }
}
