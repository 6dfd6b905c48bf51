//! # qsafe engine
//!
//! Hybrid post-quantum / classical crypto engine:
//! - [`Orchestrator`] - PQC-first encrypt, decrypt, keygen and sign with RSA-2048 fallback
//! - [`CircuitBreaker`] - per-operation Closed / Open / HalfOpen state
//! - [`SignatureValidator`] - signature envelopes and data-integrity records
//! - [`TelemetrySink`] - one event per fallback
//! - [`Engine`] - everything above wired from an [`EngineConfig`]
//!
//! ## Fallback contract
//!
//! | PQC outcome | Result |
//! |-------------|--------|
//! | success | ML-KEM-768 / ML-DSA-65, `fallback_used = false` |
//! | timeout, transport error, `success=false`, circuit open | RSA-2048, `fallback_used = true`, reason `PQC_SERVICE_UNAVAILABLE` |
//! | classical failure | error returned to the caller |
//!
//! [`EngineConfig`]: qsafe_core::EngineConfig

pub mod circuit_breaker;
pub mod engine;
pub mod keyring;
pub mod orchestrator;
pub mod telemetry;
pub mod validator;

pub use circuit_breaker::{BreakerHealth, CircuitBreaker, CircuitError, CircuitState, CircuitStats};
pub use engine::Engine;
pub use keyring::ClassicalKeyring;
pub use orchestrator::{
    DecryptionKeys, HealthReport, KeyBundle, Orchestrator, RecipientKeys, SignatureCheck,
    SignatureOutput,
};
pub use telemetry::{
    FallbackEvent, MemoryTelemetrySink, NoopTelemetrySink, TelemetryError, TelemetrySink,
    TracingTelemetrySink,
};
pub use validator::{
    DataIntegrityRecord, IntegrityReport, SignatureValidator, ValidationStatus, VerificationReport,
    VerifyOptions,
};

/// Engine prelude
pub mod prelude {
    pub use crate::engine::Engine;
    pub use crate::orchestrator::{DecryptionKeys, KeyBundle, RecipientKeys};
    pub use crate::validator::VerifyOptions;
    pub use qsafe_core::{
        CryptoError, EncryptedEnvelope, EngineConfig, RequestContext, Result, SignatureAlgorithm,
        SignatureEnvelope,
    };
}
