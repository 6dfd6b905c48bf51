//! Fallback telemetry
//!
//! One [`FallbackEvent`] is emitted each time an operation completes on the
//! classical path after the PQC path failed. Delivery is best effort and
//! bounded in time: a sink error or a sink that does not answer within the
//! delivery timeout is logged and dropped, never surfaced to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use qsafe_core::ReasonCode;

/// Event name carried by every fallback event
pub const FALLBACK_EVENT: &str = "CRYPTO_FALLBACK_USED";

/// Telemetry delivery error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Telemetry delivery failed: {0}")]
pub struct TelemetryError(pub String);

/// A fallback that happened
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackEvent {
    pub event: String,
    /// Externally reported reason
    pub fallback_reason: ReasonCode,
    /// Finer reason, for diagnostics
    pub detail_reason: ReasonCode,
    /// Algorithm actually used
    pub algorithm: String,
    /// Derived crypto identity of the caller
    pub user_id: String,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    /// Algorithm that was attempted first
    pub original_algorithm: String,
}

impl FallbackEvent {
    pub fn new(
        detail_reason: ReasonCode,
        algorithm: &str,
        original_algorithm: &str,
        user_id: String,
        operation: &str,
    ) -> Self {
        Self {
            event: FALLBACK_EVENT.to_string(),
            fallback_reason: detail_reason.external(),
            detail_reason,
            algorithm: algorithm.to_string(),
            user_id,
            operation: operation.to_string(),
            timestamp: Utc::now(),
            original_algorithm: original_algorithm.to_string(),
        }
    }
}

/// Destination for fallback events
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn emit(&self, event: &FallbackEvent) -> Result<(), TelemetryError>;
}

/// Writes events to the `tracing` pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

#[async_trait]
impl TelemetrySink for TracingTelemetrySink {
    async fn emit(&self, event: &FallbackEvent) -> Result<(), TelemetryError> {
        tracing::info!(
            target: "qsafe::telemetry",
            event = %event.event,
            reason = %event.fallback_reason,
            detail = %event.detail_reason,
            algorithm = %event.algorithm,
            original_algorithm = %event.original_algorithm,
            operation = %event.operation,
            user_id = %event.user_id,
            "Crypto fallback used"
        );
        Ok(())
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetrySink;

#[async_trait]
impl TelemetrySink for NoopTelemetrySink {
    async fn emit(&self, _event: &FallbackEvent) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryTelemetrySink {
    events: Mutex<Vec<FallbackEvent>>,
}

impl MemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FallbackEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetrySink {
    async fn emit(&self, event: &FallbackEvent) -> Result<(), TelemetryError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Deliver `event` within `timeout`, logging and discarding any failure
pub async fn deliver(sink: &dyn TelemetrySink, event: &FallbackEvent, timeout: Duration) {
    match tokio::time::timeout(timeout, sink.emit(event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(
            error = %e,
            operation = %event.operation,
            "Dropping fallback telemetry event"
        ),
        Err(_) => tracing::warn!(
            timeout_ms = timeout.as_millis() as u64,
            operation = %event.operation,
            "Telemetry sink timed out, dropping fallback event"
        ),
    }
}
