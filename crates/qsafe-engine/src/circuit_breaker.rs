// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Per-operation resilience state for calls into the PQC backend.
//
// States:
// - Closed: calls pass through, consecutive failures are counted
// - Open: calls are rejected without reaching the backend until the cooldown ends
// - HalfOpen: exactly one probe call is in flight; its outcome decides the state
//
// Every operation name owns one record behind its own lock. The lock is only
// held for the admission and settlement bookkeeping, never across the call.
//
// ============================================================================

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use qsafe_core::config::CircuitBreakerConfig;
use qsafe_core::{Classify, CryptoError, ReasonCode};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Error returned by a call made through the breaker
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Rejected without invoking the operation
    #[error("Circuit breaker open for operation: {name}")]
    Open { name: String, retry_after: Duration },

    /// The operation ran and failed
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Open { .. } => None,
        }
    }
}

impl<E: Classify> Classify for CircuitError<E> {
    fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Open { .. } => ReasonCode::CircuitBreakerOpen,
            Self::Inner(e) => e.reason_code(),
        }
    }
}

impl<E: Into<CryptoError>> From<CircuitError<E>> for CryptoError {
    fn from(err: CircuitError<E>) -> Self {
        match err {
            CircuitError::Open { name, .. } => CryptoError::CircuitOpen(name),
            CircuitError::Inner(e) => e.into(),
        }
    }
}

/// Read-only view of one circuit record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_until: Option<DateTime<Utc>>,
    /// Failed probes since the circuit last closed
    pub reopen_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Summary over every circuit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerHealth {
    pub healthy: bool,
    pub circuits: usize,
    pub open: Vec<String>,
    pub half_open: Vec<String>,
}

#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    reopen_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_until: Option<Instant>,
    opened_until_utc: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            reopen_count: 0,
            last_failure_at: None,
            opened_until: None,
            opened_until_utc: None,
            probe_in_flight: false,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn open_for(&mut self, cooldown: Duration, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_until = Some(now + cooldown);
        self.opened_until_utc = chrono::Duration::from_std(cooldown)
            .ok()
            .map(|d| Utc::now() + d);
    }

    fn stats(&self, name: &str) -> CircuitStats {
        CircuitStats {
            name: name.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure_at: self.last_failure_at,
            opened_until: self.opened_until_utc,
            reopen_count: self.reopen_count,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            total_rejections: self.total_rejections,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Registry of circuit records keyed by operation name
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    records: DashMap<String, Arc<Mutex<CircuitRecord>>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the circuit named `name`
    ///
    /// While the circuit is open the operation is not invoked and
    /// [`CircuitError::Open`] is returned; otherwise the operation's own error
    /// comes back as [`CircuitError::Inner`].
    pub async fn execute<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let record = self.record(name);
        let admission = match self.admit(name, &record) {
            Ok(admission) => admission,
            Err(retry_after) => {
                tracing::debug!(
                    operation = name,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Circuit open, call rejected"
                );
                return Err(CircuitError::Open {
                    name: name.to_string(),
                    retry_after,
                });
            }
        };

        let mut settle = Settlement {
            breaker: self,
            name,
            record,
            admission,
            settled: false,
        };
        let result = operation().await;
        settle.finish(result.is_ok());
        result.map_err(CircuitError::Inner)
    }

    /// Run `operation`, handing any failure (including rejection) to `fallback`
    pub async fn execute_with_fallback<T, E, X, F, Fut, FB, FbFut>(
        &self,
        name: &str,
        operation: F,
        fallback: FB,
    ) -> Result<T, X>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(CircuitError<E>) -> FbFut,
        FbFut: Future<Output = Result<T, X>>,
    {
        match self.execute(name, operation).await {
            Ok(value) => Ok(value),
            Err(err) => fallback(err).await,
        }
    }

    /// Snapshot of one circuit, if it has ever been used
    pub fn stats(&self, name: &str) -> Option<CircuitStats> {
        let record = self.records.get(name)?.value().clone();
        let stats = record.lock().stats(name);
        Some(stats)
    }

    /// Snapshot of every circuit, ordered by name
    pub fn snapshot(&self) -> Vec<CircuitStats> {
        let records: Vec<(String, Arc<Mutex<CircuitRecord>>)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let mut stats: Vec<CircuitStats> = records
            .iter()
            .map(|(name, record)| record.lock().stats(name))
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Healthy when no circuit is open or probing
    pub fn health_status(&self) -> BreakerHealth {
        let snapshot = self.snapshot();
        let open: Vec<String> = snapshot
            .iter()
            .filter(|s| s.state == CircuitState::Open)
            .map(|s| s.name.clone())
            .collect();
        let half_open: Vec<String> = snapshot
            .iter()
            .filter(|s| s.state == CircuitState::HalfOpen)
            .map(|s| s.name.clone())
            .collect();
        BreakerHealth {
            healthy: open.is_empty() && half_open.is_empty(),
            circuits: snapshot.len(),
            open,
            half_open,
        }
    }

    fn record(&self, name: &str) -> Arc<Mutex<CircuitRecord>> {
        if let Some(record) = self.records.get(name) {
            return record.value().clone();
        }
        self.records
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitRecord::new())))
            .value()
            .clone()
    }

    /// Admission decision; `Err` carries the time left until a probe is allowed
    fn admit(&self, name: &str, record: &Mutex<CircuitRecord>) -> Result<Admission, Duration> {
        let now = Instant::now();
        let mut rec = record.lock();
        rec.total_calls += 1;

        match rec.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let until = rec.opened_until.unwrap_or(now);
                if now >= until {
                    rec.state = CircuitState::HalfOpen;
                    rec.probe_in_flight = true;
                    tracing::info!(operation = name, "Circuit half-open, admitting probe");
                    Ok(Admission::Probe)
                } else {
                    rec.total_rejections += 1;
                    Err(until - now)
                }
            }
            CircuitState::HalfOpen => {
                if rec.probe_in_flight {
                    rec.total_rejections += 1;
                    Err(Duration::ZERO)
                } else {
                    rec.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn on_success(&self, name: &str, record: &Mutex<CircuitRecord>, admission: Admission) {
        let mut rec = record.lock();
        match admission {
            Admission::Probe => {
                rec.state = CircuitState::Closed;
                rec.consecutive_failures = 0;
                rec.reopen_count = 0;
                rec.probe_in_flight = false;
                rec.opened_until = None;
                rec.opened_until_utc = None;
                tracing::info!(operation = name, "Circuit closed after successful probe");
            }
            Admission::Normal => {
                // A slow success must not close a circuit opened meanwhile
                if rec.state == CircuitState::Closed {
                    rec.consecutive_failures = 0;
                }
            }
        }
    }

    fn on_failure(&self, name: &str, record: &Mutex<CircuitRecord>, admission: Admission) {
        let now = Instant::now();
        let mut rec = record.lock();
        rec.total_failures += 1;
        rec.last_failure_at = Some(Utc::now());

        match admission {
            Admission::Probe => {
                rec.reopen_count = rec.reopen_count.saturating_add(1);
                rec.probe_in_flight = false;
                let cooldown = self.config.cooldown_for(rec.reopen_count);
                rec.open_for(cooldown, now);
                tracing::warn!(
                    operation = name,
                    reopen_count = rec.reopen_count,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Circuit probe failed, reopening"
                );
            }
            Admission::Normal => {
                rec.consecutive_failures = rec.consecutive_failures.saturating_add(1);
                if rec.state == CircuitState::Closed
                    && rec.consecutive_failures >= self.config.failure_threshold
                {
                    rec.reopen_count = 0;
                    let cooldown = self.config.cooldown_for(0);
                    rec.open_for(cooldown, now);
                    tracing::warn!(
                        operation = name,
                        failures = rec.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        cooldown_ms = cooldown.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("circuits", &self.records.len())
            .finish()
    }
}

/// Settles an admitted call; a call dropped before finishing counts as failed
struct Settlement<'a> {
    breaker: &'a CircuitBreaker,
    name: &'a str,
    record: Arc<Mutex<CircuitRecord>>,
    admission: Admission,
    settled: bool,
}

impl Settlement<'_> {
    fn finish(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success(self.name, &self.record, self.admission);
        } else {
            self.breaker.on_failure(self.name, &self.record, self.admission);
        }
    }
}

impl Drop for Settlement<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(operation = self.name, "Call cancelled before completion");
            self.breaker.on_failure(self.name, &self.record, self.admission);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_ms: 1_000,
            max_cooldown_ms: 4_000,
            backoff_multiplier: 2,
        })
    }

    async fn fail(breaker: &CircuitBreaker, name: &str) -> Result<(), CircuitError<&'static str>> {
        breaker.execute(name, || async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker, name: &str) -> Result<u32, CircuitError<&'static str>> {
        breaker.execute(name, || async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = breaker(3);
        for _ in 0..3 {
            assert!(matches!(fail(&breaker, "op").await, Err(CircuitError::Inner("boom"))));
        }
        let stats = breaker.stats("op").unwrap();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.consecutive_failures, 3);
        assert!(stats.opened_until.is_some());

        let calls = AtomicUsize::new(0);
        let result = breaker
            .execute("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let breaker = breaker(3);
        fail(&breaker, "op").await.unwrap_err();
        fail(&breaker, "op").await.unwrap_err();
        succeed(&breaker, "op").await.unwrap();
        fail(&breaker, "op").await.unwrap_err();
        assert_eq!(breaker.stats("op").unwrap().state, CircuitState::Closed);
        assert_eq!(breaker.stats("op").unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes() {
        let breaker = breaker(1);
        fail(&breaker, "op").await.unwrap_err();
        assert!(succeed(&breaker, "op").await.unwrap_err().is_open());

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(succeed(&breaker, "op").await.unwrap(), 7);

        let stats = breaker.stats("op").unwrap();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.reopen_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_extends_cooldown() {
        let breaker = breaker(1);
        fail(&breaker, "op").await.unwrap_err();

        // First probe fails: cooldown doubles to 2s
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(matches!(fail(&breaker, "op").await, Err(CircuitError::Inner(_))));
        assert_eq!(breaker.stats("op").unwrap().reopen_count, 1);

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(succeed(&breaker, "op").await.unwrap_err().is_open());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(succeed(&breaker, "op").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_is_capped() {
        let breaker = breaker(1);
        fail(&breaker, "op").await.unwrap_err();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(4_000)).await;
            assert!(matches!(fail(&breaker, "op").await, Err(CircuitError::Inner(_))));
        }
        // Capped at 4s however many probes failed
        tokio::time::advance(Duration::from_millis(4_000)).await;
        assert!(succeed(&breaker, "op").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_in_half_open() {
        let breaker = Arc::new(breaker(1));
        fail(&breaker, "op").await.unwrap_err();
        tokio::time::advance(Duration::from_millis(1_000)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                breaker
                    .execute("op", || async move {
                        let _ = release_rx.await;
                        Ok::<_, &'static str>(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.stats("op").unwrap().state, CircuitState::HalfOpen);

        // Second caller is rejected while the probe is outstanding
        assert!(succeed(&breaker, "op").await.unwrap_err().is_open());

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), 1);
        assert_eq!(breaker.stats("op").unwrap().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_reopens() {
        let breaker = breaker(1);
        fail(&breaker, "op").await.unwrap_err();
        tokio::time::advance(Duration::from_millis(1_000)).await;

        let pending = breaker.execute("op", || futures::future::pending::<Result<(), &'static str>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        let stats = breaker.stats("op").unwrap();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.reopen_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_are_independent() {
        let breaker = breaker(1);
        fail(&breaker, "pqc.encrypt").await.unwrap_err();
        assert!(succeed(&breaker, "pqc.sign").await.is_ok());

        let health = breaker.health_status();
        assert!(!health.healthy);
        assert_eq!(health.circuits, 2);
        assert_eq!(health.open, vec!["pqc.encrypt".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_receives_error() {
        let breaker = breaker(1);
        let value: Result<u32, ()> = breaker
            .execute_with_fallback(
                "op",
                || async { Err::<u32, _>("boom") },
                |err| async move {
                    assert!(matches!(err, CircuitError::Inner("boom")));
                    Ok(99)
                },
            )
            .await;
        assert_eq!(value, Ok(99));

        let value: Result<u32, ()> = breaker
            .execute_with_fallback(
                "op",
                || async { Ok::<u32, &'static str>(1) },
                |err| async move {
                    assert!(err.is_open());
                    Ok(100)
                },
            )
            .await;
        assert_eq!(value, Ok(100));
    }

    #[test]
    fn test_classification() {
        let open: CircuitError<CryptoError> = CircuitError::Open {
            name: "pqc.encrypt".into(),
            retry_after: Duration::from_secs(1),
        };
        assert_eq!(open.reason_code(), ReasonCode::CircuitBreakerOpen);
        assert_eq!(
            CryptoError::from(open),
            CryptoError::CircuitOpen("pqc.encrypt".into())
        );

        let inner: CircuitError<CryptoError> =
            CircuitError::Inner(CryptoError::PqcTimeout { timeout_ms: 50 });
        assert_eq!(inner.reason_code(), ReasonCode::PqcTimeout);
    }
}
