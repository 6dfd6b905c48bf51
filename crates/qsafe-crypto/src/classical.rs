//! Classical RSA-2048 provider
//!
//! The fallback of last resort. It has no dependency on the PQC backend and
//! is never placed behind a circuit breaker; an error here is fatal to the
//! operation that needed it.
//!
//! | Operation | Construction |
//! |-----------|--------------|
//! | Encrypt | RSA-OAEP(SHA-256) wraps a random AES-256-GCM content key |
//! | Sign | RSASSA-PKCS1-v1_5 with SHA-256 |

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use qsafe_core::EncryptionAlgorithm;

use crate::aead::{self, AEAD_NONCE_SIZE};
use crate::error::{PrimitiveError, Result};

/// RSA modulus size
pub const RSA_KEY_BITS: usize = 2048;

/// RSA-2048 signature / OAEP block size
pub const RSA_BLOCK_SIZE: usize = RSA_KEY_BITS / 8;

const SELF_TEST_MESSAGE: &[u8] = b"qsafe classical self test";

// ============================================================================
// Key pair
// ============================================================================

/// RSA-2048 key pair
#[derive(Clone)]
pub struct RsaKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh key pair on the current thread (CPU heavy)
    pub fn generate() -> Result<Self> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| PrimitiveError::KeyGenerationFailed(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Restore from a PKCS#8 DER private key
    pub fn from_private_key_der(der: &[u8]) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| PrimitiveError::InvalidSecretKey(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// SubjectPublicKeyInfo DER
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        public_key_to_der(&self.public_key)
    }

    /// PKCS#8 DER, wiped when dropped
    pub fn private_key_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let doc = self
            .private_key
            .to_pkcs8_der()
            .map_err(|e| PrimitiveError::InvalidSecretKey(e.to_string()))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair").field("bits", &RSA_KEY_BITS).finish_non_exhaustive()
    }
}

/// Encode a public key as SubjectPublicKeyInfo DER
pub fn public_key_to_der(public_key: &RsaPublicKey) -> Result<Vec<u8>> {
    public_key
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| PrimitiveError::InvalidPublicKey(e.to_string()))
}

/// Decode a SubjectPublicKeyInfo DER public key
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| PrimitiveError::InvalidPublicKey(e.to_string()))
}

// ============================================================================
// Ciphertext
// ============================================================================

/// Output of [`ClassicalProvider::encrypt_rsa`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaCiphertext {
    /// OAEP-wrapped content key (256 bytes)
    pub wrapped_key: Vec<u8>,
    /// AES-256-GCM nonce
    pub nonce: [u8; AEAD_NONCE_SIZE],
    /// AES-256-GCM ciphertext with tag
    pub encrypted_data: Vec<u8>,
}

impl RsaCiphertext {
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        EncryptionAlgorithm::Rsa2048
    }
}

// ============================================================================
// Provider
// ============================================================================

/// RSA-2048 encrypt / decrypt / sign / verify / keygen
#[derive(Default)]
pub struct ClassicalProvider {
    /// Key used only by the self test, generated on first health check
    self_test_key: OnceCell<RsaKeyPair>,
}

impl ClassicalProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encrypt arbitrary-length plaintext to an RSA public key
    pub fn encrypt_rsa(&self, plaintext: &[u8], public_key: &RsaPublicKey) -> Result<RsaCiphertext> {
        let content_key = Zeroizing::new(aead::random_content_key()?);
        let sealed = aead::seal(content_key.as_slice(), EncryptionAlgorithm::Rsa2048.as_str().as_bytes(), plaintext)?;

        let mut rng = rand::rngs::OsRng;
        let wrapped_key = public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), content_key.as_slice())
            .map_err(|e| PrimitiveError::EncryptionFailed(e.to_string()))?;

        Ok(RsaCiphertext {
            wrapped_key,
            nonce: sealed.nonce,
            encrypted_data: sealed.ciphertext,
        })
    }

    /// Decrypt a ciphertext produced by [`Self::encrypt_rsa`]
    pub fn decrypt_rsa(&self, ciphertext: &RsaCiphertext, private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
        let content_key = Zeroizing::new(
            private_key
                .decrypt(Oaep::new::<Sha256>(), &ciphertext.wrapped_key)
                .map_err(|e| PrimitiveError::DecryptionFailed(format!("key unwrap: {}", e)))?,
        );
        aead::open(
            content_key.as_slice(),
            &ciphertext.nonce,
            EncryptionAlgorithm::Rsa2048.as_str().as_bytes(),
            &ciphertext.encrypted_data,
        )
    }

    /// PKCS#1 v1.5 SHA-256 signature
    pub fn sign_rsa(&self, message: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
        let signing_key = SigningKey::<Sha256>::new(private_key.clone());
        let mut rng = rand::rngs::OsRng;
        let signature = signing_key
            .try_sign_with_rng(&mut rng, message)
            .map_err(|e| PrimitiveError::SigningFailed(e.to_string()))?;
        Ok(signature.to_vec())
    }

    /// Verify a PKCS#1 v1.5 SHA-256 signature; malformed input is simply invalid
    pub fn verify_rsa(&self, message: &[u8], signature: &[u8], public_key: &RsaPublicKey) -> bool {
        let signature = match Signature::try_from(signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        VerifyingKey::<Sha256>::new(public_key.clone())
            .verify(message, &signature)
            .is_ok()
    }

    /// Generate a key pair on the blocking pool
    pub async fn generate_rsa_key_pair(&self) -> Result<RsaKeyPair> {
        let started = std::time::Instant::now();
        let pair = tokio::task::spawn_blocking(RsaKeyPair::generate).await??;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generated RSA-2048 key pair"
        );
        Ok(pair)
    }

    /// Round-trip an encryption and a signature with a private self-test key
    pub async fn health_check(&self) -> Result<()> {
        let pair = self
            .self_test_key
            .get_or_try_init(|| self.generate_rsa_key_pair())
            .await?;

        let ciphertext = self.encrypt_rsa(SELF_TEST_MESSAGE, pair.public_key())?;
        let decrypted = self.decrypt_rsa(&ciphertext, pair.private_key())?;
        if decrypted != SELF_TEST_MESSAGE {
            return Err(PrimitiveError::SelfTestFailed("decrypt mismatch".to_string()));
        }

        let signature = self.sign_rsa(SELF_TEST_MESSAGE, pair.private_key())?;
        if !self.verify_rsa(SELF_TEST_MESSAGE, &signature, pair.public_key()) {
            return Err(PrimitiveError::SelfTestFailed("signature rejected".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn shared_pair() -> &'static RsaKeyPair {
        static PAIR: OnceLock<RsaKeyPair> = OnceLock::new();
        PAIR.get_or_init(|| RsaKeyPair::generate().unwrap())
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let provider = ClassicalProvider::new();
        let pair = shared_pair();

        for message in [&b""[..], &b"hello"[..], &[0x42u8; 4096][..]] {
            let ct = provider.encrypt_rsa(message, pair.public_key()).unwrap();
            assert_eq!(ct.wrapped_key.len(), RSA_BLOCK_SIZE);
            assert_eq!(ct.algorithm(), EncryptionAlgorithm::Rsa2048);
            assert_eq!(provider.decrypt_rsa(&ct, pair.private_key()).unwrap(), message);
        }
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let provider = ClassicalProvider::new();
        let other = RsaKeyPair::generate().unwrap();
        let ct = provider.encrypt_rsa(b"secret", shared_pair().public_key()).unwrap();
        assert!(matches!(
            provider.decrypt_rsa(&ct, other.private_key()),
            Err(PrimitiveError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_sign_verify() {
        let provider = ClassicalProvider::new();
        let pair = shared_pair();

        let sig = provider.sign_rsa(b"message", pair.private_key()).unwrap();
        assert_eq!(sig.len(), RSA_BLOCK_SIZE);
        assert!(provider.verify_rsa(b"message", &sig, pair.public_key()));
        assert!(!provider.verify_rsa(b"massage", &sig, pair.public_key()));
        assert!(!provider.verify_rsa(b"message", &sig[..10], pair.public_key()));
    }

    #[test]
    fn test_der_round_trip() {
        let pair = shared_pair();
        let der = pair.private_key_der().unwrap();
        let restored = RsaKeyPair::from_private_key_der(&der).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());

        let pub_der = pair.public_key_der().unwrap();
        assert_eq!(&public_key_from_der(&pub_der).unwrap(), pair.public_key());
        assert!(public_key_from_der(b"not a key").is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        let provider = ClassicalProvider::new();
        assert!(provider.health_check().await.is_ok());
        // Second call reuses the cached self-test key
        assert!(provider.health_check().await.is_ok());
    }
}
