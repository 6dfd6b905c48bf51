//! Engine facade
//!
//! Wires configuration, backend, bridge, orchestrator and validator together
//! and exposes the caller-facing operations in one place.

use serde::Serialize;
use std::sync::Arc;

use qsafe_bridge::{LocalPqcBackend, PqcBackend, PqcBridge};
use qsafe_core::{
    EncryptedEnvelope, EngineConfig, GeneratedKeyPair, HealthStatus, RequestContext, Result,
    SignatureAlgorithm, SignatureEnvelope,
};

use crate::circuit_breaker::CircuitStats;
use crate::orchestrator::{DecryptionKeys, HealthReport, KeyBundle, Orchestrator, RecipientKeys};
use crate::telemetry::{TelemetrySink, TracingTelemetrySink};
use crate::validator::{
    DataIntegrityRecord, IntegrityReport, SignatureValidator, VerificationReport, VerifyOptions,
};

/// Hybrid crypto engine
pub struct Engine {
    config: EngineConfig,
    orchestrator: Arc<Orchestrator>,
    validator: SignatureValidator,
    /// Set when the engine runs on the in-process backend
    local: Option<Arc<LocalPqcBackend>>,
}

impl Engine {
    /// Engine over an arbitrary backend, telemetry written to `tracing`
    pub fn new(config: EngineConfig, backend: Arc<dyn PqcBackend>) -> Result<Self> {
        Self::with_telemetry(config, backend, Arc::new(TracingTelemetrySink))
    }

    /// Engine over an arbitrary backend with a custom telemetry sink
    pub fn with_telemetry(
        config: EngineConfig,
        backend: Arc<dyn PqcBackend>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        config.validate()?;
        let bridge = PqcBridge::new(backend, &config.bridge);
        let orchestrator = Arc::new(Orchestrator::new(bridge, &config).with_telemetry(telemetry));
        let validator =
            SignatureValidator::new(orchestrator.clone(), config.signature.default_max_age());

        tracing::info!(
            backend = orchestrator.bridge().backend_name(),
            timeout_ms = config.bridge.timeout_ms,
            failure_threshold = config.circuit_breaker.failure_threshold,
            "Crypto engine ready"
        );

        Ok(Self {
            config,
            orchestrator,
            validator,
            local: None,
        })
    }

    /// Engine over the in-process ML-KEM / ML-DSA backend
    pub fn local(config: EngineConfig) -> Result<Self> {
        let backend = LocalPqcBackend::shared(&config.backend);
        let mut engine = Self::new(config, backend.clone())?;
        engine.local = Some(backend);
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn validator(&self) -> &SignatureValidator {
        &self.validator
    }

    /// The in-process backend, when the engine was built with [`Engine::local`]
    pub fn local_backend(&self) -> Option<&Arc<LocalPqcBackend>> {
        self.local.as_ref()
    }

    // === Encryption ===

    pub async fn encrypt_with_fallback(
        &self,
        plaintext: &[u8],
        recipient: &RecipientKeys,
        ctx: &RequestContext,
    ) -> Result<EncryptedEnvelope> {
        self.orchestrator
            .encrypt_with_fallback(plaintext, recipient, ctx)
            .await
    }

    pub fn decrypt_with_fallback(
        &self,
        envelope: &EncryptedEnvelope,
        keys: &DecryptionKeys,
    ) -> Result<Vec<u8>> {
        self.orchestrator.decrypt_with_fallback(envelope, keys)
    }

    pub fn decrypt_json(&self, json: &str, keys: &DecryptionKeys) -> Result<Vec<u8>> {
        self.orchestrator.decrypt_json(json, keys)
    }

    // === Keys ===

    pub async fn generate_key_pair_with_fallback(
        &self,
        ctx: &RequestContext,
    ) -> Result<GeneratedKeyPair> {
        self.orchestrator.generate_key_pair_with_fallback(ctx).await
    }

    pub async fn generate_key_bundle(&self, ctx: &RequestContext) -> Result<KeyBundle> {
        self.orchestrator.generate_key_bundle(ctx).await
    }

    // === Signatures ===

    pub async fn generate_signature<T: Serialize + ?Sized>(
        &self,
        data: &T,
        algorithm: SignatureAlgorithm,
        ctx: &RequestContext,
    ) -> Result<SignatureEnvelope> {
        self.validator.generate_signature(data, algorithm, ctx).await
    }

    pub async fn verify_signature<T: Serialize + ?Sized>(
        &self,
        data: &T,
        envelope: &SignatureEnvelope,
        options: &VerifyOptions,
    ) -> Result<VerificationReport> {
        self.validator.verify_signature(data, envelope, options).await
    }

    pub async fn create_data_integrity<T: Serialize + ?Sized>(
        &self,
        data: &T,
        user_id: Option<&str>,
    ) -> Result<DataIntegrityRecord> {
        self.validator.create_data_integrity(data, user_id).await
    }

    pub async fn validate_data_integrity<T: Serialize + ?Sized>(
        &self,
        data: &T,
        record: &DataIntegrityRecord,
    ) -> Result<IntegrityReport> {
        self.validator.validate_data_integrity(data, record).await
    }

    pub async fn validate_data_integrity_with<T: Serialize + ?Sized>(
        &self,
        data: &T,
        record: &DataIntegrityRecord,
        options: &VerifyOptions,
    ) -> Result<IntegrityReport> {
        self.validator
            .validate_data_integrity_with(data, record, options)
            .await
    }

    // === Health ===

    pub async fn get_health_status(&self) -> HealthStatus {
        self.orchestrator.get_health_status().await
    }

    pub async fn health_report(&self) -> HealthReport {
        self.orchestrator.health_report().await
    }

    pub fn circuit_stats(&self, name: &str) -> Option<CircuitStats> {
        self.orchestrator.breaker().stats(name)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("orchestrator", &self.orchestrator)
            .field("local", &self.local.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qsafe_core::CryptoError;

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        let err = Engine::local(config).unwrap_err();
        assert!(matches!(err, CryptoError::Config(_)));
    }

    #[tokio::test]
    async fn test_local_engine_end_to_end() {
        let engine = Engine::local(EngineConfig::default()).unwrap();
        assert!(engine.local_backend().is_some());

        let ctx = RequestContext::for_user("frank");
        let bundle = engine.generate_key_bundle(&ctx).await.unwrap();
        let envelope = engine
            .encrypt_with_fallback(b"payload", &bundle.recipient, &ctx)
            .await
            .unwrap();
        let json = envelope.to_json().unwrap();
        assert_eq!(engine.decrypt_json(&json, &bundle.decryption).unwrap(), b"payload");

        let signature = engine
            .generate_signature("payload", SignatureAlgorithm::MlDsa65, &ctx)
            .await
            .unwrap();
        let report = engine
            .verify_signature("payload", &signature, &VerifyOptions::default())
            .await
            .unwrap();
        assert!(report.is_valid);

        assert!(engine.circuit_stats("pqc.encrypt").is_some());
        assert!(engine.circuit_stats("pqc.unused").is_none());
    }
}
