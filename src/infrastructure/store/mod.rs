//! Durable key storage
//!
//! The store owns the at-rest representation of issued keys and nothing else;
//! the lifecycle manager is its only caller and the only writer.

mod encrypted;

pub use encrypted::EncryptedKeyStore;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::api_key::{ApiKey, KeyId};
use crate::domain::{SecurityError, SecurityEvent};

/// The full persisted key set, snapshotted as a whole on every save.
pub type KeyMap = HashMap<KeyId, ApiKey>;

/// Persistence contract for the key set.
///
/// `load` never fails: a missing database yields an empty map, and a corrupt
/// or undecryptable one yields an empty map plus a load-error event. Losing
/// the key database must never take the service down - keys can be reissued -
/// but an operator has to hear about it. `save` failures, by contrast, are
/// hard errors for the caller to handle.
#[async_trait]
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    async fn load(&self) -> KeyMap;

    async fn save(&self, keys: &KeyMap) -> Result<(), SecurityError>;
}

/// In-memory store used by tests and ephemeral deployments.
///
/// Round-trips through the same serialized form as the file-backed store and
/// can be switched into a failing mode to exercise persistence-failure paths.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    blob: RwLock<Option<Vec<u8>>>,
    fail_saves: AtomicBool,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail with a persistence error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn load(&self) -> KeyMap {
        let blob = self.blob.read().await;
        match blob.as_deref() {
            None => KeyMap::new(),
            Some(bytes) => match serde_json::from_slice(bytes) {
                Ok(keys) => keys,
                Err(e) => {
                    SecurityEvent::KeyStoreLoadError {
                        error: e.to_string(),
                    }
                    .emit();
                    KeyMap::new()
                }
            },
        }
    }

    async fn save(&self, keys: &KeyMap) -> Result<(), SecurityError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SecurityError::persistence("key store unavailable"));
        }

        let bytes =
            serde_json::to_vec(keys).map_err(|e| SecurityError::persistence(e.to_string()))?;
        *self.blob.write().await = Some(bytes);
        Ok(())
    }
}
