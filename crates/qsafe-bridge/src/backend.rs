//! Backend trait

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::wire::BackendRequest;

/// A PQC compute backend reachable from the bridge
///
/// Implementations return the backend's raw JSON answer; the bridge owns
/// timeouts and response validation, so a backend never needs to.
#[async_trait]
pub trait PqcBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str {
        "pqc-backend"
    }

    /// Perform one operation
    async fn call(&self, request: BackendRequest) -> Result<Value, TransportError>;
}
