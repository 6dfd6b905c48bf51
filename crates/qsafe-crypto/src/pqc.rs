//! Post-quantum primitives
//!
//! | Algorithm | Wire name | Role |
//! |-----------|-----------|------|
//! | Kyber768 | ML-KEM-768 | Key encapsulation |
//! | Dilithium3 | ML-DSA-65 | Detached signatures |
//!
//! Thin, byte-oriented wrappers over `pqcrypto`: keys, ciphertexts and
//! signatures cross this boundary as plain bytes so they can travel through
//! the bridge wire format and the envelopes unchanged.

use pqcrypto_dilithium::dilithium3;
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{PrimitiveError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Dilithium3 public key size
pub const DILITHIUM3_PUBLIC_KEY_SIZE: usize = 1952;

/// Dilithium3 signature size
pub const DILITHIUM3_SIGNATURE_SIZE: usize = 3293;

/// Kyber768 public key size
pub const KYBER768_PUBLIC_KEY_SIZE: usize = 1184;

/// Kyber768 secret key size
pub const KYBER768_SECRET_KEY_SIZE: usize = 2400;

/// Kyber768 ciphertext size
pub const KYBER768_CIPHERTEXT_SIZE: usize = 1088;

/// Kyber768 shared secret size
pub const KYBER768_SHARED_SECRET_SIZE: usize = 32;

// ============================================================================
// Key material
// ============================================================================

/// ML-KEM-768 key pair (secret key zeroized on drop)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KemKeyPair {
    #[zeroize(skip)]
    public_key: Vec<u8>,
    secret_key: Vec<u8>,
}

impl KemKeyPair {
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }
}

impl std::fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemKeyPair")
            .field("public_key_len", &self.public_key.len())
            .finish_non_exhaustive()
    }
}

/// ML-DSA-65 key pair (secret key zeroized on drop)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKeyPair {
    #[zeroize(skip)]
    public_key: Vec<u8>,
    secret_key: Vec<u8>,
}

impl SigningKeyPair {
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }

    /// Detached signature over `message`
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        dsa_sign(&self.secret_key, message)
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public_key_len", &self.public_key.len())
            .finish_non_exhaustive()
    }
}

/// Decapsulated shared secret
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    secret: [u8; KYBER768_SHARED_SECRET_SIZE],
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; KYBER768_SHARED_SECRET_SIZE] {
        &self.secret
    }

    pub fn from_bytes(bytes: [u8; KYBER768_SHARED_SECRET_SIZE]) -> Self {
        Self { secret: bytes }
    }

    /// Accept a secret that arrived as an untyped byte string
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let secret: [u8; KYBER768_SHARED_SECRET_SIZE] = bytes.try_into().map_err(|_| {
            PrimitiveError::EncapsulationFailed(format!(
                "shared secret must be {} bytes, got {}",
                KYBER768_SHARED_SECRET_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self { secret })
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

// ============================================================================
// ML-KEM-768
// ============================================================================

pub fn kem_keypair() -> KemKeyPair {
    let (pk, sk) = kyber768::keypair();
    KemKeyPair {
        public_key: pk.as_bytes().to_vec(),
        secret_key: sk.as_bytes().to_vec(),
    }
}

/// Encapsulate a fresh shared secret to `public_key`; returns `(ciphertext, secret)`
pub fn kem_encapsulate(public_key: &[u8]) -> Result<(Vec<u8>, SharedSecret)> {
    let pk = kyber768::PublicKey::from_bytes(public_key)
        .map_err(|e| PrimitiveError::InvalidPublicKey(format!("ML-KEM-768: {}", e)))?;
    let (shared, ciphertext) = kyber768::encapsulate(&pk);
    let secret = SharedSecret::from_slice(shared.as_bytes())?;
    Ok((ciphertext.as_bytes().to_vec(), secret))
}

pub fn kem_decapsulate(secret_key: &[u8], ciphertext: &[u8]) -> Result<SharedSecret> {
    let sk = kyber768::SecretKey::from_bytes(secret_key)
        .map_err(|e| PrimitiveError::InvalidSecretKey(format!("ML-KEM-768: {}", e)))?;
    let ct = kyber768::Ciphertext::from_bytes(ciphertext)
        .map_err(|e| PrimitiveError::DecapsulationFailed(format!("ciphertext: {}", e)))?;
    let shared = kyber768::decapsulate(&ct, &sk);
    SharedSecret::from_slice(shared.as_bytes())
        .map_err(|e| PrimitiveError::DecapsulationFailed(e.to_string()))
}

// ============================================================================
// ML-DSA-65
// ============================================================================

pub fn dsa_keypair() -> SigningKeyPair {
    let (pk, sk) = dilithium3::keypair();
    SigningKeyPair {
        public_key: pk.as_bytes().to_vec(),
        secret_key: sk.as_bytes().to_vec(),
    }
}

pub fn dsa_sign(secret_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let sk = dilithium3::SecretKey::from_bytes(secret_key)
        .map_err(|e| PrimitiveError::InvalidSecretKey(format!("ML-DSA-65: {}", e)))?;
    Ok(dilithium3::detached_sign(message, &sk).as_bytes().to_vec())
}

/// Verify a detached signature; unparseable keys or signatures are invalid
pub fn dsa_verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let pk = match dilithium3::PublicKey::from_bytes(public_key) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let sig = match dilithium3::DetachedSignature::from_bytes(signature) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    dilithium3::verify_detached_signature(&sig, message, &pk).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kem_round_trip() {
        let pair = kem_keypair();
        assert_eq!(pair.public_key().len(), KYBER768_PUBLIC_KEY_SIZE);
        assert_eq!(pair.secret_key().len(), KYBER768_SECRET_KEY_SIZE);

        let (ct, sender) = kem_encapsulate(pair.public_key()).unwrap();
        assert_eq!(ct.len(), KYBER768_CIPHERTEXT_SIZE);

        let receiver = kem_decapsulate(pair.secret_key(), &ct).unwrap();
        assert_eq!(sender.as_bytes(), receiver.as_bytes());
    }

    #[test]
    fn test_kem_rejects_bad_public_key() {
        assert!(matches!(
            kem_encapsulate(&[0u8; 10]),
            Err(PrimitiveError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_kem_wrong_key_yields_different_secret() {
        let alice = kem_keypair();
        let mallory = kem_keypair();
        let (ct, sender) = kem_encapsulate(alice.public_key()).unwrap();
        // Kyber decapsulation is implicit-reject: it succeeds with a garbage secret
        let wrong = kem_decapsulate(mallory.secret_key(), &ct).unwrap();
        assert_ne!(sender.as_bytes(), wrong.as_bytes());
    }

    #[test]
    fn test_dsa_sign_verify() {
        let pair = dsa_keypair();
        assert_eq!(pair.public_key().len(), DILITHIUM3_PUBLIC_KEY_SIZE);

        let sig = pair.sign(b"quantum safe").unwrap();
        assert_eq!(sig.len(), DILITHIUM3_SIGNATURE_SIZE);
        assert!(dsa_verify(pair.public_key(), b"quantum safe", &sig));
        assert!(!dsa_verify(pair.public_key(), b"quantum unsafe", &sig));
        assert!(!dsa_verify(pair.public_key(), b"quantum safe", &sig[..100]));
        assert!(!dsa_verify(&[1, 2, 3], b"quantum safe", &sig));
    }

    #[test]
    fn test_shared_secret_length_checked() {
        assert!(SharedSecret::from_slice(&[0u8; 16]).is_err());
        assert!(SharedSecret::from_slice(&[0u8; 32]).is_ok());
    }
}
