//! End-to-end fallback behaviour against the in-process backend

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use qsafe_bridge::LocalPqcBackend;
use qsafe_core::{EncryptionAlgorithm, EngineConfig, HealthState, ReasonCode, RequestContext, SignatureAlgorithm};
use qsafe_crypto::pqc;
use qsafe_crypto::RsaKeyPair;
use qsafe_engine::validator::DATA_HASH_MISMATCH;
use qsafe_engine::{
    DecryptionKeys, Engine, FallbackEvent, MemoryTelemetrySink, RecipientKeys, TelemetryError,
    TelemetrySink, VerifyOptions,
};
use zeroize::Zeroizing;

fn local_engine(config: EngineConfig) -> (Engine, Arc<LocalPqcBackend>, Arc<MemoryTelemetrySink>) {
    let backend = LocalPqcBackend::shared(&config.backend);
    let sink = Arc::new(MemoryTelemetrySink::new());
    let engine = Engine::with_telemetry(config, backend.clone(), sink.clone()).unwrap();
    (engine, backend, sink)
}

fn keys() -> (RecipientKeys, DecryptionKeys) {
    let rsa = RsaKeyPair::generate().unwrap();
    let kem = pqc::kem_keypair();
    (
        RecipientKeys {
            key_id: "k-1".into(),
            ml_kem_public_key: Some(kem.public_key().to_vec()),
            rsa_public_key: rsa.public_key().clone(),
        },
        DecryptionKeys {
            key_id: "k-1".into(),
            ml_kem_secret_key: Some(Zeroizing::new(kem.secret_key().to_vec())),
            rsa_private_key: rsa.private_key().clone(),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_falls_back_to_rsa() {
    let (recipient, decryption) = keys();
    let mut config = EngineConfig::default();
    config.bridge.timeout_ms = 50;
    config.backend.simulated_latency_ms = 100;
    let (engine, _backend, sink) = local_engine(config);

    let envelope = engine
        .encrypt_with_fallback(b"hello", &recipient, &RequestContext::for_user("heidi"))
        .await
        .unwrap();

    let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
    assert_eq!(value["algorithm"], "RSA-2048");
    assert_eq!(value["fallbackUsed"], true);
    assert_eq!(value["metadata"]["fallbackReason"], "PQC_SERVICE_UNAVAILABLE");
    assert!(envelope
        .metadata()
        .original_error
        .as_deref()
        .unwrap()
        .contains("timed out after 50ms"));
    assert_eq!(engine.decrypt_with_fallback(&envelope, &decryption).unwrap(), b"hello");

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "CRYPTO_FALLBACK_USED");
    assert_eq!(events[0].detail_reason, ReasonCode::PqcTimeout);
    assert_eq!(events[0].algorithm, "RSA-2048");
    assert_eq!(events[0].original_algorithm, "ML-KEM-768");
    assert!(events[0].user_id.starts_with("user:ml-kem-768:encryption:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_encrypts_under_outage() {
    let (recipient, decryption) = keys();
    let (engine, backend, sink) = local_engine(EngineConfig::default());
    backend.set_online(false);

    let engine = Arc::new(engine);
    let recipient = Arc::new(recipient);
    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let engine = engine.clone();
            let recipient = recipient.clone();
            tokio::spawn(async move {
                let ctx = RequestContext::for_user(format!("user-{}", i));
                let message = format!("message {}", i);
                let result = engine
                    .encrypt_with_fallback(message.as_bytes(), &recipient, &ctx)
                    .await;
                result
            })
        })
        .collect();

    for (i, result) in futures::future::join_all(tasks).await.into_iter().enumerate() {
        let envelope = result.unwrap().unwrap();
        assert_eq!(envelope.algorithm(), EncryptionAlgorithm::Rsa2048);
        assert!(envelope.fallback_used());
        assert_eq!(
            envelope.metadata().fallback_reason,
            Some(ReasonCode::PqcServiceUnavailable)
        );
        let plaintext = engine.decrypt_with_fallback(&envelope, &decryption).unwrap();
        assert_eq!(plaintext, format!("message {}", i).into_bytes());
    }
    assert_eq!(sink.len(), 10);
}

#[tokio::test]
async fn test_round_trip_both_paths() {
    let (engine, backend, _sink) = local_engine(EngineConfig::default());
    let ctx = RequestContext::for_user("ivan");
    let bundle = engine.generate_key_bundle(&ctx).await.unwrap();
    assert!(bundle.is_quantum_safe());

    let pqc = engine
        .encrypt_with_fallback(b"quantum", &bundle.recipient, &ctx)
        .await
        .unwrap();
    assert_eq!(pqc.algorithm(), EncryptionAlgorithm::MlKem768);

    backend.set_online(false);
    let rsa = engine
        .encrypt_with_fallback(b"classical", &bundle.recipient, &ctx)
        .await
        .unwrap();
    assert_eq!(rsa.algorithm(), EncryptionAlgorithm::Rsa2048);

    // Both decrypt with the same bundle, whatever the backend state
    assert_eq!(engine.decrypt_json(&pqc.to_json().unwrap(), &bundle.decryption).unwrap(), b"quantum");
    assert_eq!(engine.decrypt_json(&rsa.to_json().unwrap(), &bundle.decryption).unwrap(), b"classical");
}

#[tokio::test]
async fn test_signature_round_trip_and_tamper() {
    let (engine, _backend, _sink) = local_engine(EngineConfig::default());
    let record = json!({"consentId": "c-42", "purpose": "analytics", "granted": true});
    let ctx = RequestContext::for_user("judy");

    let envelope = engine
        .generate_signature(&record, SignatureAlgorithm::MlDsa65, &ctx)
        .await
        .unwrap();
    let report = engine
        .verify_signature(&record, &envelope, &VerifyOptions::default().for_user("judy"))
        .await
        .unwrap();
    assert!(report.is_valid, "{:?}", report.errors);

    let tampered = json!({"consentId": "c-42", "purpose": "advertising", "granted": true});
    let report = engine
        .verify_signature(&tampered, &envelope, &VerifyOptions::default())
        .await
        .unwrap();
    assert!(!report.is_valid);
    assert_eq!(report.errors, vec![DATA_HASH_MISMATCH.to_string()]);

    let integrity = engine.create_data_integrity(&record, Some("judy")).await.unwrap();
    assert!(engine
        .validate_data_integrity(&record, &integrity)
        .await
        .unwrap()
        .is_valid());
}

#[tokio::test]
async fn test_health_reports_fallback_active() {
    let (engine, backend, _sink) = local_engine(EngineConfig::default());

    let status = engine.get_health_status().await;
    assert!(status.pqc && status.classical);
    assert!(!status.fallback_active);

    backend.set_online(false);
    let report = engine.health_report().await;
    assert_eq!(report.state, HealthState::Degraded);
    assert!(report.status.fallback_active);

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["status"]["fallbackActive"], true);
    assert_eq!(value["state"], "degraded");
    assert!(value["backend"].is_null());

    backend.set_online(true);
    let recovered = engine.get_health_status().await;
    assert!(recovered.is_healthy());
    assert!(!recovered.fallback_active);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_bounds_every_call() {
    let (recipient, _decryption) = keys();
    let mut config = EngineConfig::default();
    config.bridge.timeout_ms = 50;
    let (engine, backend, _sink) = local_engine(config);
    backend.set_latency(Duration::from_secs(3_600));

    let started = tokio::time::Instant::now();
    let envelope = engine
        .encrypt_with_fallback(b"x", &recipient, &RequestContext::anonymous())
        .await
        .unwrap();
    assert!(envelope.fallback_used());
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// Sink whose collector never answers
struct StalledSink;

#[async_trait]
impl TelemetrySink for StalledSink {
    async fn emit(&self, _event: &FallbackEvent) -> Result<(), TelemetryError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_telemetry_does_not_block_fallback() {
    let (recipient, decryption) = keys();
    let config = EngineConfig::default();
    let backend = LocalPqcBackend::shared(&config.backend);
    backend.set_online(false);
    let engine = Engine::with_telemetry(config, backend, Arc::new(StalledSink)).unwrap();
    let ctx = RequestContext::for_user("mallory");

    let started = tokio::time::Instant::now();
    let envelope = engine
        .encrypt_with_fallback(b"still delivered", &recipient, &ctx)
        .await
        .unwrap();
    assert!(envelope.fallback_used());
    assert_eq!(engine.decrypt_with_fallback(&envelope, &decryption).unwrap(), b"still delivered");

    let signature = engine
        .generate_signature(&json!({"k": 1}), SignatureAlgorithm::MlDsa65, &ctx)
        .await
        .unwrap();
    assert!(signature.fallback_used);
    assert!(started.elapsed() < Duration::from_secs(1));
}
