//! Signature and data-integrity validation
//!
//! Signatures cover the canonical SHA-256 hash of the data together with the
//! signer identity and the signing time. Verification reports problems as
//! `errors` on the report; only an unknown signature family or an internal
//! failure is returned as `Err`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use qsafe_core::hash::{canonical_hash, public_key_hash, DATA_HASH_ALGORITHM};
use qsafe_core::identity::{derive_id, derive_optional_id, SIGNATURE_OPERATION};
use qsafe_core::{
    encoding, IdentityContext, RequestContext, Result, SignatureAlgorithm, SignatureEnvelope,
    SignatureFamily,
};

use crate::orchestrator::{Orchestrator, SignatureCheck};

/// Error recorded when the data no longer matches the signed hash
pub const DATA_HASH_MISMATCH: &str = "Data hash mismatch";

/// Options for [`SignatureValidator::verify_signature`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Reject signatures older than `max_age`
    pub check_timestamp: bool,
    /// Falls back to the configured default when unset
    pub max_age: Option<Duration>,
    /// Expected signer; checked against the envelope's signer identity
    pub user_id: Option<String>,
}

impl VerifyOptions {
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            check_timestamp: true,
            max_age: Some(max_age),
            user_id: None,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Timing of one verification
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub hash_time_ms: f64,
    pub verification_time_ms: f64,
}

/// Verdict of [`SignatureValidator::verify_signature`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub is_valid: bool,
    pub algorithm: SignatureAlgorithm,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub performance_metrics: PerformanceMetrics,
}

/// State of a data-integrity record when last checked
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Tampered,
    Expired,
}

/// Signed hash of a piece of data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegrityRecord {
    pub hash: String,
    pub algorithm: String,
    pub signature: SignatureEnvelope,
    pub timestamp: DateTime<Utc>,
    pub validation_status: ValidationStatus,
}

/// Result of re-checking data against its integrity record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub status: ValidationStatus,
    pub hash_matches: bool,
    pub verification: VerificationReport,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }
}

/// Produces and checks signature envelopes through the orchestrator
#[derive(Clone, Debug)]
pub struct SignatureValidator {
    orchestrator: Arc<Orchestrator>,
    default_max_age: Duration,
}

impl SignatureValidator {
    pub fn new(orchestrator: Arc<Orchestrator>, default_max_age: Duration) -> Self {
        Self {
            orchestrator,
            default_max_age,
        }
    }

    /// Sign `data` with `algorithm`, falling back to RSA-2048 if ML-DSA-65 fails
    pub async fn generate_signature<T: Serialize + ?Sized>(
        &self,
        data: &T,
        algorithm: SignatureAlgorithm,
        ctx: &RequestContext,
    ) -> Result<SignatureEnvelope> {
        let signed_data_hash = canonical_hash(data)?;
        let signer_id = derive_optional_id(
            ctx.user_id.as_deref(),
            &IdentityContext::new(algorithm.as_str(), SIGNATURE_OPERATION),
        );
        let timestamp_utc = Utc::now();
        let message = SignatureEnvelope::signing_input(&signed_data_hash, &signer_id, &timestamp_utc);

        let output = self
            .orchestrator
            .sign_with_fallback(&message, &signer_id, algorithm, ctx)
            .await?;

        Ok(SignatureEnvelope {
            signature: output.family.tag(&encoding::encode(&output.signature)),
            algorithm: output.family.algorithm(),
            requested_algorithm: algorithm,
            public_key_hash: public_key_hash(&output.public_key),
            timestamp_utc,
            signed_data_hash,
            signer_id,
            fallback_used: output.fallback_used,
        })
    }

    /// Check `envelope` against `data`
    ///
    /// Order: data hash (stops on mismatch), age, then the family named by the
    /// signature prefix.
    pub async fn verify_signature<T: Serialize + ?Sized>(
        &self,
        data: &T,
        envelope: &SignatureEnvelope,
        options: &VerifyOptions,
    ) -> Result<VerificationReport> {
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let hash = canonical_hash(data)?;
        let hash_time_ms = elapsed_ms(started);
        if hash != envelope.signed_data_hash {
            errors.push(DATA_HASH_MISMATCH.to_string());
            return Ok(self.finish(envelope, errors, warnings, hash_time_ms, started));
        }

        if options.check_timestamp {
            let max_age = options.max_age.unwrap_or(self.default_max_age);
            let age = Utc::now().signed_duration_since(envelope.timestamp_utc);
            match age.to_std() {
                Ok(age) if age > max_age => errors.push(format!(
                    "Signature expired: age {}s exceeds max age {}s",
                    age.as_secs(),
                    max_age.as_secs()
                )),
                Ok(_) => {}
                Err(_) => warnings.push("Signature timestamp is in the future".to_string()),
            }
        }

        let (family, payload) = SignatureFamily::parse(&envelope.signature)?;
        if family.algorithm() != envelope.algorithm {
            errors.push(format!(
                "Algorithm mismatch: signature is {} but envelope declares {}",
                family.algorithm(),
                envelope.algorithm
            ));
        }

        if let Some(user_id) = &options.user_id {
            let expected = derive_id(
                user_id,
                &IdentityContext::new(envelope.requested_algorithm.as_str(), SIGNATURE_OPERATION),
            );
            if expected != envelope.signer_id {
                errors.push("Signer identity mismatch".to_string());
            }
        }

        match encoding::decode(payload) {
            Ok(signature) => {
                let check = self
                    .orchestrator
                    .verify_raw(family, &envelope.message(), &signature, &envelope.signer_id)
                    .await?;
                match check {
                    SignatureCheck::Valid {
                        public_key: Some(public_key),
                    } => {
                        if public_key_hash(&public_key) != envelope.public_key_hash {
                            errors.push("Public key hash mismatch".to_string());
                        }
                    }
                    SignatureCheck::Valid { public_key: None } => {
                        warnings.push("Signer public key unknown, key hash not checked".to_string())
                    }
                    SignatureCheck::Invalid { detail: Some(detail) } => {
                        errors.push(format!("Signature verification failed: {}", detail))
                    }
                    SignatureCheck::Invalid { detail: None } => {
                        errors.push("Signature verification failed".to_string())
                    }
                    SignatureCheck::Unavailable(reason) => {
                        errors.push(format!("Signature verification unavailable: {}", reason))
                    }
                }
            }
            Err(_) => errors.push("Malformed signature encoding".to_string()),
        }

        if family == SignatureFamily::Classical {
            warnings.push("Classical signature is not quantum-safe".to_string());
        }
        if envelope.fallback_used {
            warnings.push("Signature was produced by the classical fallback".to_string());
        }

        Ok(self.finish(envelope, errors, warnings, hash_time_ms, started))
    }

    /// Hash and sign `data` as an integrity record
    pub async fn create_data_integrity<T: Serialize + ?Sized>(
        &self,
        data: &T,
        user_id: Option<&str>,
    ) -> Result<DataIntegrityRecord> {
        let ctx = match user_id {
            Some(user) => RequestContext::for_user(user),
            None => RequestContext::anonymous(),
        };
        let signature = self
            .generate_signature(data, SignatureAlgorithm::MlDsa65, &ctx)
            .await?;

        Ok(DataIntegrityRecord {
            hash: signature.signed_data_hash.clone(),
            algorithm: DATA_HASH_ALGORITHM.to_string(),
            timestamp: signature.timestamp_utc,
            signature,
            validation_status: ValidationStatus::Valid,
        })
    }

    /// Re-check `data` against `record`, rejecting records older than the
    /// configured default max age
    pub async fn validate_data_integrity<T: Serialize + ?Sized>(
        &self,
        data: &T,
        record: &DataIntegrityRecord,
    ) -> Result<IntegrityReport> {
        let options = VerifyOptions {
            check_timestamp: true,
            ..VerifyOptions::default()
        };
        self.validate_data_integrity_with(data, record, &options).await
    }

    pub async fn validate_data_integrity_with<T: Serialize + ?Sized>(
        &self,
        data: &T,
        record: &DataIntegrityRecord,
        options: &VerifyOptions,
    ) -> Result<IntegrityReport> {
        let hash_matches = canonical_hash(data)? == record.hash;
        let verification = self.verify_signature(data, &record.signature, options).await?;

        let status = if !hash_matches || record.hash != record.signature.signed_data_hash {
            ValidationStatus::Tampered
        } else if verification.is_valid {
            ValidationStatus::Valid
        } else if verification.errors.iter().any(|e| e.contains("expired")) {
            ValidationStatus::Expired
        } else {
            ValidationStatus::Invalid
        };

        if status != ValidationStatus::Valid {
            tracing::warn!(status = ?status, errors = ?verification.errors, "Data integrity check failed");
        }

        Ok(IntegrityReport {
            status,
            hash_matches,
            verification,
        })
    }

    fn finish(
        &self,
        envelope: &SignatureEnvelope,
        errors: Vec<String>,
        warnings: Vec<String>,
        hash_time_ms: f64,
        started: Instant,
    ) -> VerificationReport {
        let is_valid = errors.is_empty();
        let verification_time_ms = elapsed_ms(started);
        tracing::debug!(
            algorithm = %envelope.algorithm,
            is_valid,
            errors = errors.len(),
            elapsed_ms = verification_time_ms,
            "Signature verified"
        );
        VerificationReport {
            is_valid,
            algorithm: envelope.algorithm,
            errors,
            warnings,
            performance_metrics: PerformanceMetrics {
                hash_time_ms,
                verification_time_ms,
            },
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}
