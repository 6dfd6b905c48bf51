//! Engine configuration types

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{CryptoError, Result};

/// Prefix for environment overrides, e.g. `QSAFE__BRIDGE__TIMEOUT_MS=150`
pub const ENV_PREFIX: &str = "QSAFE";

/// Complete engine configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// PQC bridge settings
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Circuit breaker thresholds
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Local PQC backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Fallback telemetry
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Signature verification defaults
    #[serde(default)]
    pub signature: SignatureConfig,
}

impl EngineConfig {
    /// Load from an optional TOML file layered under `QSAFE__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: EngineConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CryptoError::Config(e.to_string()))?;
        loaded.validate()?;
        tracing::debug!(path = ?path, timeout_ms = loaded.bridge.timeout_ms, "Loaded engine configuration");
        Ok(loaded)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let parsed: EngineConfig =
            toml::from_str(content).map_err(|e| CryptoError::Config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CryptoError::Config(e.to_string()))
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bridge.timeout_ms == 0 {
            return Err(CryptoError::Config("bridge.timeout_ms must be > 0".into()));
        }
        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(CryptoError::Config(
                "circuit_breaker.failure_threshold must be > 0".into(),
            ));
        }
        if cb.cooldown_ms == 0 {
            return Err(CryptoError::Config("circuit_breaker.cooldown_ms must be > 0".into()));
        }
        if cb.max_cooldown_ms < cb.cooldown_ms {
            return Err(CryptoError::Config(format!(
                "circuit_breaker.max_cooldown_ms ({}) is below cooldown_ms ({})",
                cb.max_cooldown_ms, cb.cooldown_ms
            )));
        }
        if cb.backoff_multiplier == 0 {
            return Err(CryptoError::Config(
                "circuit_breaker.backoff_multiplier must be >= 1".into(),
            ));
        }
        if self.telemetry.enabled && self.telemetry.delivery_timeout_ms == 0 {
            return Err(CryptoError::Config(
                "telemetry.delivery_timeout_ms must be > 0".into(),
            ));
        }
        if self.backend.max_cached_keys == 0 {
            return Err(CryptoError::Config("backend.max_cached_keys must be > 0".into()));
        }
        Ok(())
    }
}

/// PQC bridge settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Hard timeout for a single backend call
    #[serde(default = "default_bridge_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_bridge_timeout_ms() -> u64 {
    200
}

impl BridgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_bridge_timeout_ms(),
        }
    }
}

/// Circuit breaker settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// First cooldown after opening
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Upper bound for the extended cooldown after failed probes
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,

    /// Cooldown growth factor per failed probe
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_max_cooldown_ms() -> u64 {
    300_000
}

fn default_backoff_multiplier() -> u32 {
    2
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }

    /// Cooldown after `reopen_count` consecutive failed probes, capped
    pub fn cooldown_for(&self, reopen_count: u32) -> Duration {
        let factor = u64::from(self.backoff_multiplier.max(1)).saturating_pow(reopen_count);
        let millis = self.cooldown_ms.saturating_mul(factor).min(self.max_cooldown_ms);
        Duration::from_millis(millis)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Local PQC backend settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Lifetime of cached ML-KEM key pairs
    #[serde(default = "default_kem_key_ttl_secs")]
    pub kem_key_ttl_secs: u64,

    /// Lifetime of custodial ML-DSA signing keys
    #[serde(default = "default_signing_key_ttl_secs")]
    pub signing_key_ttl_secs: u64,

    /// Capacity of each key cache
    #[serde(default = "default_max_cached_keys")]
    pub max_cached_keys: usize,

    /// Artificial latency added to every backend call (0 = none)
    #[serde(default)]
    pub simulated_latency_ms: u64,
}

fn default_kem_key_ttl_secs() -> u64 {
    3_600
}

fn default_signing_key_ttl_secs() -> u64 {
    86_400
}

fn default_max_cached_keys() -> usize {
    100
}

impl BackendConfig {
    pub fn kem_key_ttl(&self) -> Duration {
        Duration::from_secs(self.kem_key_ttl_secs)
    }

    pub fn signing_key_ttl(&self) -> Duration {
        Duration::from_secs(self.signing_key_ttl_secs)
    }

    pub fn simulated_latency(&self) -> Option<Duration> {
        (self.simulated_latency_ms > 0).then(|| Duration::from_millis(self.simulated_latency_ms))
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kem_key_ttl_secs: default_kem_key_ttl_secs(),
            signing_key_ttl_secs: default_signing_key_ttl_secs(),
            max_cached_keys: default_max_cached_keys(),
            simulated_latency_ms: 0,
        }
    }
}

/// Fallback telemetry settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on one sink delivery; a slower sink loses the event
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_delivery_timeout_ms() -> u64 {
    100
}

impl TelemetryConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

/// Signature verification defaults
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Max age applied when a caller asks for a timestamp check without one
    #[serde(default = "default_max_age_secs")]
    pub default_max_age_secs: u64,
}

fn default_max_age_secs() -> u64 {
    3_600
}

impl SignatureConfig {
    pub fn default_max_age(&self) -> Duration {
        Duration::from_secs(self.default_max_age_secs)
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            default_max_age_secs: default_max_age_secs(),
        }
    }
}
