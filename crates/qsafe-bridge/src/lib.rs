//! # PQC Bridge
//!
//! Connects the engine to a post-quantum compute backend:
//! - [`PqcBackend`] - trait any backend implements (in-process or remote)
//! - [`PqcBridge`] - hard timeout and response validation on every call
//! - [`LocalPqcBackend`] - in-process ML-KEM-768 / ML-DSA-65 via `pqcrypto`
//!
//! ## Operations
//!
//! | Operation | Wire name | Response fields |
//! |-----------|-----------|-----------------|
//! | KeyGen | `generate_key_pair` | `public_key`, `private_key` |
//! | Encapsulate | `encapsulate` | `ciphertext`, `shared_secret` |
//! | Sign | `sign_token` | `token`, `public_key` |
//! | Verify | `verify_token` | `valid`, `public_key` |
//! | Status | `get_status` | `pqc_available`, `algorithms_supported`, `cache_stats` |
//!
//! Every response also carries `success`, `algorithm` and, on failure,
//! `error_message`.

pub mod backend;
pub mod bridge;
pub mod error;
pub mod local;
pub mod wire;

pub use backend::PqcBackend;
pub use bridge::{
    BackendKeyPair, BackendSignature, BackendStatus, BackendVerification, Encapsulation, PqcBridge,
};
pub use error::{BridgeError, Result, TransportError};
pub use local::LocalPqcBackend;
pub use wire::{BackendRequest, BackendResponse, BridgeOperation, RequestParams};
