//! Crypto identity derivation
//!
//! A crypto identity namespaces a user id by algorithm and operation so that
//! keys held for one purpose are never looked up for another. Identities are
//! derived on demand and never stored: the same inputs always produce the
//! same string.

use serde::{Deserialize, Serialize};

/// BLAKE3 key-derivation context for identities
const IDENTITY_CONTEXT: &str = "qsafe 2024-01 crypto identity v1";

/// Namespace used for real users
const USER_NAMESPACE: &str = "user";

/// Namespace used when no user id is supplied
const ANONYMOUS_NAMESPACE: &str = "anon";

/// Operation label shared by signature generation and verification
pub const SIGNATURE_OPERATION: &str = "data_signature";

/// Algorithm and operation an identity is scoped to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityContext {
    pub algorithm: String,
    pub operation: String,
}

impl IdentityContext {
    pub fn new(algorithm: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            operation: operation.into(),
        }
    }
}

/// Derive the crypto identity for `(base_user_id, algorithm, operation)`.
///
/// Output has the form `<namespace>:<algorithm>:<operation>:<digest>` where
/// the digest is a BLAKE3 key derivation over the length-prefixed triple, so
/// two distinct triples cannot collide even when labels contain `:`. An empty
/// user id lands in the anonymous namespace.
pub fn derive_id(base_user_id: &str, context: &IdentityContext) -> String {
    let namespace = if base_user_id.is_empty() {
        ANONYMOUS_NAMESPACE
    } else {
        USER_NAMESPACE
    };

    let mut material = Vec::with_capacity(
        namespace.len() + base_user_id.len() + context.algorithm.len() + context.operation.len() + 32,
    );
    for field in [
        namespace,
        base_user_id,
        context.algorithm.as_str(),
        context.operation.as_str(),
    ] {
        material.extend_from_slice(&(field.len() as u64).to_le_bytes());
        material.extend_from_slice(field.as_bytes());
    }

    let digest = blake3::derive_key(IDENTITY_CONTEXT, &material);

    format!(
        "{}:{}:{}:{}",
        namespace,
        normalize_label(&context.algorithm),
        normalize_label(&context.operation),
        hex::encode(&digest[..16])
    )
}

/// Derive the identity for an optional user id
pub fn derive_optional_id(base_user_id: Option<&str>, context: &IdentityContext) -> String {
    derive_id(base_user_id.unwrap_or_default(), context)
}

// Readable prefix only; uniqueness comes from the digest.
fn normalize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
