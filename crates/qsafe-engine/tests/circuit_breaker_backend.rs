//! Breaker behaviour observed from the backend side

use async_trait::async_trait;
use mockall::mock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qsafe_bridge::{BackendRequest, BridgeOperation, PqcBackend, TransportError};
use qsafe_core::{encoding, EncryptionAlgorithm, EngineConfig, ReasonCode, RequestContext};
use qsafe_crypto::pqc;
use qsafe_crypto::RsaKeyPair;
use qsafe_engine::{CircuitState, DecryptionKeys, Engine, MemoryTelemetrySink, RecipientKeys};
use zeroize::Zeroizing;

mock! {
    pub Backend {}

    #[async_trait]
    impl PqcBackend for Backend {
        async fn call(&self, request: BackendRequest) -> Result<Value, TransportError>;
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.bridge.timeout_ms = 30_000;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.cooldown_ms = 1_000;
    config.circuit_breaker.max_cooldown_ms = 8_000;
    config
}

fn keys() -> (RecipientKeys, DecryptionKeys) {
    let rsa = RsaKeyPair::generate().unwrap();
    let kem = pqc::kem_keypair();
    (
        RecipientKeys {
            key_id: "recipient-1".into(),
            ml_kem_public_key: Some(kem.public_key().to_vec()),
            rsa_public_key: rsa.public_key().clone(),
        },
        DecryptionKeys {
            key_id: "recipient-1".into(),
            ml_kem_secret_key: Some(Zeroizing::new(kem.secret_key().to_vec())),
            rsa_private_key: rsa.private_key().clone(),
        },
    )
}

/// Answer an encapsulate request the way a healthy backend would
fn encapsulate(request: &BackendRequest) -> Result<Value, TransportError> {
    assert_eq!(request.operation, BridgeOperation::Encapsulate);
    let public_key = request
        .params
        .public_key
        .as_deref()
        .map(encoding::decode)
        .ok_or_else(|| TransportError::new("missing public key"))?
        .map_err(|e| TransportError::new(e.to_string()))?;
    let (ciphertext, secret) =
        pqc::kem_encapsulate(&public_key).map_err(|e| TransportError::new(e.to_string()))?;
    Ok(json!({
        "success": true,
        "ciphertext": encoding::encode(&ciphertext),
        "shared_secret": encoding::encode(secret.as_bytes()),
        "algorithm": "ML-KEM-768",
    }))
}

#[tokio::test]
async fn test_open_circuit_never_reaches_backend() {
    let (recipient, decryption) = keys();
    tokio::time::pause();

    let failures_left = Arc::new(AtomicUsize::new(3));
    let mut backend = MockBackend::new();
    {
        let failures_left = failures_left.clone();
        // Three failures open the circuit, then exactly one probe after the cooldown
        backend.expect_call().times(4).returning(move |request| {
            if failures_left.load(Ordering::SeqCst) > 0 {
                failures_left.fetch_sub(1, Ordering::SeqCst);
                Err(TransportError::new("connection refused"))
            } else {
                encapsulate(&request)
            }
        });
    }

    let sink = Arc::new(MemoryTelemetrySink::new());
    let engine = Engine::with_telemetry(config(), Arc::new(backend), sink.clone()).unwrap();
    let ctx = RequestContext::for_user("grace");

    for _ in 0..3 {
        let envelope = engine
            .encrypt_with_fallback(b"hello", &recipient, &ctx)
            .await
            .unwrap();
        assert!(envelope.fallback_used());
    }
    let stats = engine.circuit_stats("pqc.encrypt").unwrap();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.consecutive_failures, 3);

    // Rejected without a backend call
    for _ in 0..5 {
        let envelope = engine
            .encrypt_with_fallback(b"hello", &recipient, &ctx)
            .await
            .unwrap();
        assert_eq!(envelope.algorithm(), EncryptionAlgorithm::Rsa2048);
        assert_eq!(
            envelope.metadata().fallback_reason,
            Some(ReasonCode::PqcServiceUnavailable)
        );
        assert!(envelope
            .metadata()
            .original_error
            .as_deref()
            .unwrap()
            .contains("Circuit breaker open"));
    }
    assert_eq!(engine.circuit_stats("pqc.encrypt").unwrap().total_rejections, 5);

    let events = sink.events();
    assert_eq!(events.len(), 8);
    assert_eq!(events[0].detail_reason, ReasonCode::PqcServiceUnavailable);
    assert_eq!(events[7].detail_reason, ReasonCode::CircuitBreakerOpen);

    tokio::time::advance(Duration::from_millis(1_000)).await;

    let envelope = engine
        .encrypt_with_fallback(b"hello", &recipient, &ctx)
        .await
        .unwrap();
    assert_eq!(envelope.algorithm(), EncryptionAlgorithm::MlKem768);
    assert!(!envelope.fallback_used());
    assert_eq!(engine.decrypt_with_fallback(&envelope, &decryption).unwrap(), b"hello");

    let stats = engine.circuit_stats("pqc.encrypt").unwrap();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.consecutive_failures, 0);
}

#[tokio::test]
async fn test_failed_probe_doubles_cooldown() {
    let (recipient, _decryption) = keys();
    tokio::time::pause();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut backend = MockBackend::new();
    {
        let calls = calls.clone();
        // Three failures, a failed probe, then a successful probe
        backend.expect_call().times(5).returning(move |request| {
            if calls.fetch_add(1, Ordering::SeqCst) < 4 {
                Ok(json!({"success": false, "error_message": "kyber worker crashed"}))
            } else {
                encapsulate(&request)
            }
        });
    }

    let engine = Engine::new(config(), Arc::new(backend)).unwrap();
    let ctx = RequestContext::anonymous();

    for _ in 0..3 {
        engine.encrypt_with_fallback(b"x", &recipient, &ctx).await.unwrap();
    }

    tokio::time::advance(Duration::from_millis(1_000)).await;
    let probe = engine.encrypt_with_fallback(b"x", &recipient, &ctx).await.unwrap();
    assert!(probe.fallback_used());
    let stats = engine.circuit_stats("pqc.encrypt").unwrap();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.reopen_count, 1);

    // Old cooldown has passed, the extended one has not
    tokio::time::advance(Duration::from_millis(1_000)).await;
    let rejected = engine.encrypt_with_fallback(b"x", &recipient, &ctx).await.unwrap();
    assert!(rejected.fallback_used());
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    let recovered = engine.encrypt_with_fallback(b"x", &recipient, &ctx).await.unwrap();
    assert!(!recovered.fallback_used());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_operations_have_independent_circuits() {
    let (recipient, _decryption) = keys();
    tokio::time::pause();

    let mut backend = MockBackend::new();
    backend
        .expect_call()
        .returning(|request| match request.operation {
            BridgeOperation::Encapsulate => Err(TransportError::new("kem pool exhausted")),
            _ => Ok(json!({"success": false, "error_message": "unsupported"})),
        });

    let engine = Engine::new(config(), Arc::new(backend)).unwrap();
    let ctx = RequestContext::anonymous();
    for _ in 0..3 {
        engine.encrypt_with_fallback(b"x", &recipient, &ctx).await.unwrap();
    }

    assert_eq!(
        engine.circuit_stats("pqc.encrypt").unwrap().state,
        CircuitState::Open
    );
    assert!(engine.circuit_stats("pqc.sign").is_none());

    let health = engine.orchestrator().breaker().health_status();
    assert!(!health.healthy);
    assert_eq!(health.open, vec!["pqc.encrypt".to_string()]);
}
