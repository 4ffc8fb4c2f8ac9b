//! Encrypted file-backed key store
//!
//! Keys are serialized as JSON and sealed with AES-256-GCM under a
//! process-wide master key. The master key is generated on first run and
//! persisted next to the database with owner-only permissions; both files are
//! written with mode 0o600.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::fs as async_fs;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use rand::RngCore;

use crate::domain::{SecurityError, SecurityEvent};

use super::{KeyMap, KeyStore};

const MASTER_KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// File-backed key store, encrypted at rest.
pub struct EncryptedKeyStore {
    keys_file: PathBuf,
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EncryptedKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The cipher holds the master key; keep it out of debug output.
        f.debug_struct("EncryptedKeyStore")
            .field("keys_file", &self.keys_file)
            .finish_non_exhaustive()
    }
}

impl EncryptedKeyStore {
    /// Open the store, loading the master key or generating one on first run.
    pub fn open(
        keys_file: impl Into<PathBuf>,
        master_key_file: impl AsRef<Path>,
    ) -> Result<Self, SecurityError> {
        let master_key = load_or_create_master_key(master_key_file.as_ref())?;
        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| SecurityError::crypto(e.to_string()))?;

        Ok(Self {
            keys_file: keys_file.into(),
            cipher,
        })
    }

    /// Seal a plaintext blob. Returns `nonce || ciphertext`.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SecurityError::crypto(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a blob produced by `encrypt`.
    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if sealed.len() <= NONCE_SIZE {
            return Err(SecurityError::crypto("sealed key database is truncated"));
        }

        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &sealed[NONCE_SIZE..])
            .map_err(|_| SecurityError::crypto("key database failed to decrypt"))
    }

    async fn try_load(&self) -> Result<KeyMap, SecurityError> {
        let sealed = async_fs::read(&self.keys_file)
            .await
            .map_err(|e| SecurityError::persistence(e.to_string()))?;
        let plaintext = self.decrypt(&sealed)?;
        serde_json::from_slice(&plaintext).map_err(|e| SecurityError::persistence(e.to_string()))
    }
}

#[async_trait]
impl KeyStore for EncryptedKeyStore {
    async fn load(&self) -> KeyMap {
        if !self.keys_file.exists() {
            return KeyMap::new();
        }

        match self.try_load().await {
            Ok(keys) => keys,
            Err(e) => {
                SecurityEvent::KeyStoreLoadError {
                    error: e.to_string(),
                }
                .emit();
                KeyMap::new()
            }
        }
    }

    async fn save(&self, keys: &KeyMap) -> Result<(), SecurityError> {
        let plaintext =
            serde_json::to_vec(keys).map_err(|e| SecurityError::persistence(e.to_string()))?;
        let sealed = self.encrypt(&plaintext)?;

        if let Some(parent) = self.keys_file.parent() {
            async_fs::create_dir_all(parent)
                .await
                .map_err(|e| SecurityError::persistence(e.to_string()))?;
        }
        async_fs::write(&self.keys_file, &sealed)
            .await
            .map_err(|e| SecurityError::persistence(e.to_string()))?;
        restrict_permissions(&self.keys_file)?;

        Ok(())
    }
}

fn load_or_create_master_key(path: &Path) -> Result<Vec<u8>, SecurityError> {
    if path.exists() {
        let key = fs::read(path).map_err(|e| SecurityError::persistence(e.to_string()))?;
        if key.len() != MASTER_KEY_SIZE {
            return Err(SecurityError::crypto(format!(
                "master key file has {} bytes, expected {}",
                key.len(),
                MASTER_KEY_SIZE
            )));
        }
        return Ok(key);
    }

    let mut key = vec![0u8; MASTER_KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SecurityError::persistence(e.to_string()))?;
    }
    fs::write(path, &key).map_err(|e| SecurityError::persistence(e.to_string()))?;
    restrict_permissions(path)?;

    tracing::info!(path = %path.display(), "generated new master key");
    Ok(key)
}

/// Owner read/write only.
fn restrict_permissions(path: &Path) -> Result<(), SecurityError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| SecurityError::persistence(e.to_string()))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::{ApiKey, KeyId};

    fn open_store(dir: &Path) -> EncryptedKeyStore {
        EncryptedKeyStore::open(dir.join("api_keys.enc"), dir.join("master.key")).unwrap()
    }

    fn sample_keys() -> KeyMap {
        let mut keys = KeyMap::new();
        for id in ["k1", "k2"] {
            let key = ApiKey::new(KeyId::new(id).unwrap(), format!("pbkdf2-sha256$1000${id}"))
                .with_label(format!("key {id}"));
            keys.insert(key.id().clone(), key);
        }
        keys
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let keys = sample_keys();
        store.save(&keys).await.unwrap();
        let loaded = store.load().await;

        assert_eq!(loaded.len(), keys.len());
        for (id, key) in &keys {
            let back = &loaded[id];
            assert_eq!(back.secret_hash(), key.secret_hash());
            assert_eq!(back.label(), key.label());
            assert_eq!(back.created_at(), key.created_at());
        }
    }

    #[tokio::test]
    async fn test_data_is_not_plaintext_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.save(&sample_keys()).await.unwrap();

        let raw = std::fs::read(dir.path().join("api_keys.enc")).unwrap();
        let raw_str = String::from_utf8_lossy(&raw);
        assert!(!raw_str.contains("pbkdf2-sha256"));
        assert!(!raw_str.contains("key k1"));
    }

    #[tokio::test]
    async fn test_master_key_reused_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = open_store(dir.path());
        store.save(&sample_keys()).await.unwrap();
        drop(store);

        // A fresh instance picks up the same master key and can decrypt.
        let reopened = open_store(dir.path());
        assert_eq!(reopened.load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.save(&sample_keys()).await.unwrap();

        std::fs::write(dir.path().join("api_keys.enc"), b"not an encrypted blob").unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_master_key_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.save(&sample_keys()).await.unwrap();

        // Replace the master key; the database must become unreadable, not fatal.
        std::fs::remove_file(dir.path().join("master.key")).unwrap();
        let reopened = open_store(dir.path());
        assert!(reopened.load().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.save(&sample_keys()).await.unwrap();

        for name in ["master.key", "api_keys.enc"] {
            let mode = std::fs::metadata(dir.path().join(name))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600, "{name} should be owner-only");
        }
    }
}
