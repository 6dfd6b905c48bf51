//! Base64 helpers for binary fields in JSON

use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine;

use crate::error::{CryptoError, Result};

pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| CryptoError::Serialization(format!("invalid base64: {}", e)))
}

/// `#[serde(with = "qsafe_core::encoding::base64")]` for `Vec<u8>` fields
pub mod base64 {
    use super::STANDARD;
    use ::base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_base64_is_serialization_error() {
        assert!(matches!(decode("***"), Err(CryptoError::Serialization(_))));
        assert_eq!(decode(&encode(b"qsafe")).unwrap(), b"qsafe");
    }
}
