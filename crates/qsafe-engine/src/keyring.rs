//! Classical custodial keyring
//!
//! Per-identity RSA-2048 signing keys for the classical signature path. A key
//! is generated on first use; concurrent first uses of one identity share a
//! single generation.
//!
//! The keyring grows by one key per signing identity and never evicts: a
//! dropped key leaves every classical signature it produced unverifiable.
//! Identities are retired explicitly with [`ClassicalKeyring::remove`].

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use qsafe_core::Result;
use qsafe_crypto::{ClassicalProvider, RsaKeyPair};

/// Lazily populated identity → RSA key map
pub struct ClassicalKeyring {
    keys: DashMap<String, Arc<OnceCell<RsaKeyPair>>>,
    provider: Arc<ClassicalProvider>,
}

impl ClassicalKeyring {
    pub fn new(provider: Arc<ClassicalProvider>) -> Self {
        Self {
            keys: DashMap::new(),
            provider,
        }
    }

    /// Key for `identity`, generating it off the async workers if needed
    pub async fn get_or_create(&self, identity: &str) -> Result<RsaKeyPair> {
        let cell = self
            .keys
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let pair = cell
            .get_or_try_init(|| async {
                tracing::debug!(identity, "Generating classical signing key");
                self.provider.generate_rsa_key_pair().await
            })
            .await?;
        Ok(pair.clone())
    }

    /// Existing key only
    pub fn get(&self, identity: &str) -> Option<RsaKeyPair> {
        let cell = self.keys.get(identity)?.value().clone();
        cell.get().cloned()
    }

    /// Store a caller-provided key, replacing any previous one
    pub fn insert(&self, identity: &str, pair: RsaKeyPair) {
        let cell = OnceCell::new_with(Some(pair));
        self.keys.insert(identity.to_string(), Arc::new(cell));
    }

    /// Forget the key for `identity`; its signatures no longer verify
    pub fn remove(&self, identity: &str) -> Option<RsaKeyPair> {
        let (_, cell) = self.keys.remove(identity)?;
        let pair = cell.get().cloned();
        if pair.is_some() {
            tracing::info!(identity, "Retired classical signing key");
        }
        pair
    }

    /// Identities holding a generated key
    pub fn len(&self) -> usize {
        self.keys.iter().filter(|entry| entry.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ClassicalKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassicalKeyring").field("keys", &self.len()).finish()
    }
}
