//! AES-256-GCM body encryption
//!
//! Both key-transport paths (ML-KEM and RSA-OAEP) end in a 32-byte content
//! key; the payload itself is always sealed with AES-256-GCM.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use crate::error::{PrimitiveError, Result};

/// Content key size in bytes
pub const CONTENT_KEY_SIZE: usize = 32;

/// Nonce size in bytes
pub const AEAD_NONCE_SIZE: usize = NONCE_LEN;

/// Authentication tag size in bytes
pub const AEAD_TAG_SIZE: usize = 16;

/// Sealed body: nonce plus ciphertext-with-tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBox {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Fresh random content key
pub fn random_content_key() -> Result<[u8; CONTENT_KEY_SIZE]> {
    let mut key = [0u8; CONTENT_KEY_SIZE];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| PrimitiveError::RNGFailed("content key".to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` under `key`, binding `aad`
pub fn seal(key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<SealedBox> {
    let sealing_key = less_safe_key(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| PrimitiveError::RNGFailed("nonce".to_string()))?;

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut in_out)
        .map_err(|_| PrimitiveError::EncryptionFailed("AES-256-GCM seal".to_string()))?;

    Ok(SealedBox {
        nonce,
        ciphertext: in_out,
    })
}

/// Decrypt and authenticate a sealed body
pub fn open(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let opening_key = less_safe_key(key)?;
    let nonce: [u8; NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| PrimitiveError::DecryptionFailed(format!("nonce must be {} bytes", NONCE_LEN)))?;

    let mut in_out = ciphertext.to_vec();
    let plaintext_len = match opening_key.open_in_place(
        Nonce::assume_unique_for_key(nonce),
        Aad::from(aad),
        &mut in_out,
    ) {
        Ok(plaintext) => plaintext.len(),
        Err(_) => {
            in_out.zeroize();
            return Err(PrimitiveError::DecryptionFailed(
                "authentication tag mismatch".to_string(),
            ));
        }
    };
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn less_safe_key(key: &[u8]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| PrimitiveError::InvalidSecretKey(format!("content key must be {} bytes", CONTENT_KEY_SIZE)))?;
    Ok(LessSafeKey::new(unbound))
}
