//! Request and response shapes exchanged with a PQC backend
//!
//! Requests carry an operation name plus flat string params; binary values
//! travel as standard base64. Responses are validated into
//! [`BackendResponse`] before any field is trusted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use qsafe_core::encoding;

use crate::error::{BridgeError, Result};

/// Operations a backend understands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeOperation {
    #[serde(rename = "generate_key_pair")]
    KeyGen,
    #[serde(rename = "encapsulate")]
    Encapsulate,
    #[serde(rename = "sign_token")]
    Sign,
    #[serde(rename = "verify_token")]
    Verify,
    #[serde(rename = "get_status")]
    Status,
}

impl BridgeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyGen => "generate_key_pair",
            Self::Encapsulate => "encapsulate",
            Self::Sign => "sign_token",
            Self::Verify => "verify_token",
            Self::Status => "get_status",
        }
    }
}

impl fmt::Display for BridgeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a backend call
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    /// Crypto identity the call acts for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Message to sign or verify (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    /// Recipient public key for encapsulation (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Signature to verify (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// One backend call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub operation: BridgeOperation,
    pub params: RequestParams,
}

impl BackendRequest {
    pub fn key_gen(identity: &str) -> Self {
        Self {
            operation: BridgeOperation::KeyGen,
            params: RequestParams {
                user_id: Some(identity.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn encapsulate(identity: &str, public_key: &[u8]) -> Self {
        Self {
            operation: BridgeOperation::Encapsulate,
            params: RequestParams {
                user_id: Some(identity.to_string()),
                public_key: Some(encoding::encode(public_key)),
                ..Default::default()
            },
        }
    }

    pub fn sign(identity: &str, message: &[u8]) -> Self {
        Self {
            operation: BridgeOperation::Sign,
            params: RequestParams {
                user_id: Some(identity.to_string()),
                payload: Some(encoding::encode(message)),
                ..Default::default()
            },
        }
    }

    pub fn verify(identity: &str, message: &[u8], signature: &[u8]) -> Self {
        Self {
            operation: BridgeOperation::Verify,
            params: RequestParams {
                user_id: Some(identity.to_string()),
                payload: Some(encoding::encode(message)),
                signature: Some(encoding::encode(signature)),
                ..Default::default()
            },
        }
    }

    pub fn status() -> Self {
        Self {
            operation: BridgeOperation::Status,
            params: RequestParams::default(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.metadata.insert(key.into(), value.into());
        self
    }
}

/// Validated backend response
///
/// `success` is mandatory; every other field is optional at this level and
/// checked by the typed accessor that needs it.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub success: bool,

    /// Signature for `sign_token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Fields specific to one operation (status details and the like)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BackendResponse {
    /// Parse raw backend output, mapping any shape deviation to
    /// [`BridgeError::MalformedResponse`]
    pub fn from_value(raw: Value) -> Result<Self> {
        if !raw.is_object() {
            return Err(BridgeError::MalformedResponse(format!(
                "expected a JSON object, got {}",
                json_kind(&raw)
            )));
        }
        serde_json::from_value(raw).map_err(|e| BridgeError::MalformedResponse(e.to_string()))
    }

    /// Successful response or [`BridgeError::OperationFailed`]
    pub fn into_success(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            let message = self
                .error_message
                .clone()
                .unwrap_or_else(|| "backend reported failure".to_string());
            Err(BridgeError::OperationFailed(message))
        }
    }

    /// Decode a mandatory base64 field
    pub fn bytes(&self, field: &'static str) -> Result<Vec<u8>> {
        let value = match field {
            "token" => &self.token,
            "ciphertext" => &self.ciphertext,
            "shared_secret" => &self.shared_secret,
            "public_key" => &self.public_key,
            "private_key" => &self.private_key,
            other => {
                return Err(BridgeError::MalformedResponse(format!(
                    "unknown binary field {}",
                    other
                )))
            }
        };
        let text = value
            .as_deref()
            .ok_or_else(|| BridgeError::MalformedResponse(format!("missing field {}", field)))?;
        encoding::decode(text)
            .map_err(|e| BridgeError::MalformedResponse(format!("field {}: {}", field, e)))
    }

    /// Reject a response labelled with a different algorithm than requested
    pub fn expect_algorithm(&self, expected: &str) -> Result<()> {
        match self.algorithm.as_deref() {
            Some(actual) if actual != expected => Err(BridgeError::MalformedResponse(format!(
                "expected algorithm {}, got {}",
                expected, actual
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendResponse")
            .field("success", &self.success)
            .field("algorithm", &self.algorithm)
            .field("valid", &self.valid)
            .field("error_message", &self.error_message)
            .finish_non_exhaustive()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
