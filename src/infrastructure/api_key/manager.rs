//! API key lifecycle management
//!
//! Owns the in-memory key map and keeps it in sync with the backing
//! [`KeyStore`]. Issuance and revocation treat a failed save as fatal and
//! roll the in-memory change back; usage bookkeeping during validation
//! tolerates a failed save so that a flaky disk cannot lock callers out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domain::api_key::{ApiKey, KeyId, KeyInfo, KeyStats};
use crate::domain::{SecurityError, SecurityEvent};
use crate::infrastructure::store::{KeyMap, KeyStore};

use super::generator::{constant_time_compare, ApiKeyGenerator};

/// A freshly issued key, as returned to the caller.
///
/// This is the only place the plaintext secret ever surfaces.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub info: KeyInfo,
    pub secret: String,
}

/// Parameters for issuing a new key.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub label: Option<String>,
    pub permissions: Vec<String>,
    pub expires_in: Option<Duration>,
}

impl IssueRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }
}

/// Manages the full lifecycle of API keys: issue, validate, revoke,
/// rotate and cleanup.
#[derive(Debug)]
pub struct KeyLifecycleManager {
    keys: Arc<RwLock<KeyMap>>,
    store: Arc<dyn KeyStore>,
    // Serializes disk writes. Always acquired before the map lock so a
    // deferred usage-update save cannot overwrite a newer snapshot.
    save_lock: Arc<Mutex<()>>,
    generator: ApiKeyGenerator,
    rotation_grace: Duration,
    cleanup_retention: Duration,
}

impl KeyLifecycleManager {
    /// Load all persisted keys from the store and build the manager.
    pub async fn load(
        store: Arc<dyn KeyStore>,
        generator: ApiKeyGenerator,
        rotation_grace: Duration,
        cleanup_retention: Duration,
    ) -> Self {
        let keys = store.load().await;
        info!(key_count = keys.len(), "loaded api keys from store");

        Self {
            keys: Arc::new(RwLock::new(keys)),
            store,
            save_lock: Arc::new(Mutex::new(())),
            generator,
            rotation_grace,
            cleanup_retention,
        }
    }

    /// Issue a new key and persist it.
    ///
    /// The plaintext secret is present only in the returned [`IssuedKey`];
    /// it is never stored or logged. If the store rejects the save the
    /// in-memory insert is rolled back and the error propagated.
    pub async fn issue(&self, request: IssueRequest) -> Result<IssuedKey, SecurityError> {
        let generated = self.generator.generate()?;
        let _save_guard = self.save_lock.lock().await;

        let mut key = ApiKey::new(generated.key_id.clone(), generated.secret_hash.clone())
            .with_permissions(request.permissions.into_iter().collect());

        if let Some(label) = request.label {
            key = key.with_label(label);
        }

        if let Some(expires_in) = request.expires_in {
            key = key.with_expiration(Utc::now() + expires_in);
        }

        let mut keys = self.keys.write().await;

        // A duplicate hash would make validation ambiguous. With 256-bit
        // random secrets this never fires in practice, but refuse to
        // overwrite rather than silently aliasing two keys.
        if keys
            .values()
            .any(|existing| existing.secret_hash() == generated.secret_hash)
        {
            return Err(SecurityError::crypto(
                "generated key collides with an existing key",
            ));
        }

        if keys.contains_key(&generated.key_id) {
            return Err(SecurityError::crypto(
                "generated key id collides with an existing key",
            ));
        }

        keys.insert(generated.key_id.clone(), key.clone());

        if let Err(err) = self.store.save(&keys).await {
            keys.remove(&generated.key_id);
            return Err(err);
        }

        SecurityEvent::KeyGenerated {
            key_id: generated.key_id.clone(),
            label: key.label().map(str::to_string),
            expires_at: key.expires_at(),
            permissions: key.permissions().iter().cloned().collect(),
        }
        .emit();

        Ok(IssuedKey {
            info: key.info(),
            secret: generated.secret,
        })
    }

    /// Validate a presented secret against every stored key.
    ///
    /// The candidate hash is derived exactly once, then compared against
    /// every record in constant time with no early exit, so response
    /// timing does not depend on the position of the matching record.
    pub async fn validate(&self, secret: &str) -> Result<KeyInfo, SecurityError> {
        let candidate_hash = self.generator.hash_secret(secret);

        let mut matched: Option<KeyId> = None;
        let mut expired_match: Option<KeyId> = None;

        {
            let keys = self.keys.read().await;

            for (id, key) in keys.iter() {
                let hash_matches = constant_time_compare(key.secret_hash(), &candidate_hash);

                if hash_matches {
                    if key.is_valid_for_use() {
                        matched = Some(id.clone());
                    } else if key.is_active() && key.is_expired() {
                        expired_match = Some(id.clone());
                    }
                }
            }
        }

        let Some(key_id) = matched else {
            if let Some(expired_id) = expired_match {
                SecurityEvent::ExpiredKeyUsed {
                    key_id: expired_id,
                }
                .emit();
                // Callers that talk to clients must coarsen this to the
                // same rejection as an unknown credential.
                return Err(SecurityError::Expired);
            }
            return Err(SecurityError::InvalidCredential);
        };

        let info = {
            let mut keys = self.keys.write().await;

            let Some(key) = keys.get_mut(&key_id) else {
                // Revoked between the read and write phases.
                return Err(SecurityError::InvalidCredential);
            };

            // Re-check under the write lock: expiry may have passed.
            if !key.is_valid_for_use() {
                return Err(SecurityError::InvalidCredential);
            }

            key.record_usage();
            key.info()
        };

        self.persist_usage_update(key_id);

        Ok(info)
    }

    /// Persist the map after a usage update, off the request path.
    ///
    /// The spawned task snapshots the map at save time, under the save
    /// lock, so it always writes state at least as new as the update it
    /// was spawned for. Usage counters are best-effort bookkeeping; a
    /// save failure here must not turn a valid credential into a
    /// rejection, so it is only logged.
    fn persist_usage_update(&self, key_id: KeyId) {
        let keys = Arc::clone(&self.keys);
        let store = Arc::clone(&self.store);
        let save_lock = Arc::clone(&self.save_lock);

        tokio::spawn(async move {
            let _save_guard = save_lock.lock().await;
            let snapshot = keys.read().await.clone();
            if let Err(err) = store.save(&snapshot).await {
                warn!(key_id = %key_id, error = %err, "failed to persist usage update");
            }
        });
    }

    /// Revoke a key by id. Returns `Ok(false)` if the key is unknown.
    ///
    /// Revocation is a soft delete: the record stays in the map, marked
    /// inactive, until cleanup removes it.
    pub async fn revoke(&self, key_id: &KeyId) -> Result<bool, SecurityError> {
        let _save_guard = self.save_lock.lock().await;
        let mut keys = self.keys.write().await;

        let Some(key) = keys.get_mut(key_id) else {
            debug!(key_id = %key_id, "revoke requested for unknown key");
            return Ok(false);
        };

        if !key.is_active() {
            return Ok(true);
        }

        let previous = key.clone();
        key.revoke();

        if let Err(err) = self.store.save(&keys).await {
            if let Some(key) = keys.get_mut(key_id) {
                *key = previous;
            }
            return Err(err);
        }

        SecurityEvent::KeyRevoked {
            key_id: key_id.clone(),
        }
        .emit();

        Ok(true)
    }

    /// Rotate a key: issue a replacement inheriting label and permissions,
    /// and put the old key on a grace-period expiry.
    ///
    /// The old key's expiry is set to now plus the grace window even if it
    /// was already due to expire sooner, so callers always get the full
    /// window to migrate. Both changes land in a single save; on failure
    /// neither takes effect.
    pub async fn rotate(
        &self,
        key_id: &KeyId,
        expires_in: Option<Duration>,
    ) -> Result<IssuedKey, SecurityError> {
        let generated = self.generator.generate()?;
        let _save_guard = self.save_lock.lock().await;

        let mut keys = self.keys.write().await;

        let Some(old_key) = keys.get(key_id) else {
            return Err(SecurityError::not_found(format!("key '{key_id}' not found")));
        };

        if !old_key.is_active() {
            return Err(SecurityError::not_found(format!(
                "key '{key_id}' is already revoked"
            )));
        }

        if keys.contains_key(&generated.key_id)
            || keys
                .values()
                .any(|existing| existing.secret_hash() == generated.secret_hash)
        {
            return Err(SecurityError::crypto(
                "generated key collides with an existing key",
            ));
        }

        let mut new_key = ApiKey::new(generated.key_id.clone(), generated.secret_hash.clone())
            .with_permissions(old_key.permissions().iter().cloned().collect());

        if let Some(label) = old_key.label() {
            new_key = new_key.with_label(label.to_string());
        }

        if let Some(expires_in) = expires_in {
            new_key = new_key.with_expiration(Utc::now() + expires_in);
        }

        let previous_old = old_key.clone();
        let grace_expiry = Utc::now() + self.rotation_grace;

        keys.insert(generated.key_id.clone(), new_key.clone());
        if let Some(old_key) = keys.get_mut(key_id) {
            old_key.set_expiration(Some(grace_expiry));
        }

        if let Err(err) = self.store.save(&keys).await {
            keys.remove(&generated.key_id);
            if let Some(old_key) = keys.get_mut(key_id) {
                *old_key = previous_old;
            }
            return Err(err);
        }

        SecurityEvent::KeyRotated {
            old_key_id: key_id.clone(),
            new_key_id: generated.key_id.clone(),
        }
        .emit();

        Ok(IssuedKey {
            info: new_key.info(),
            secret: generated.secret,
        })
    }

    /// Remove keys that have been expired or revoked for longer than the
    /// retention window. Returns the number of keys removed.
    pub async fn cleanup_expired(&self) -> Result<usize, SecurityError> {
        let cutoff = Utc::now() - self.cleanup_retention;
        let _save_guard = self.save_lock.lock().await;
        let mut keys = self.keys.write().await;

        let doomed: Vec<KeyId> = keys
            .iter()
            .filter(|(_, key)| Self::is_cleanup_candidate(key, cutoff))
            .map(|(id, _)| id.clone())
            .collect();

        if doomed.is_empty() {
            return Ok(0);
        }

        let mut removed: HashMap<KeyId, ApiKey> = HashMap::new();
        for id in &doomed {
            if let Some(key) = keys.remove(id) {
                removed.insert(id.clone(), key);
            }
        }

        if let Err(err) = self.store.save(&keys).await {
            for (id, key) in removed {
                keys.insert(id, key);
            }
            return Err(err);
        }

        for id in &doomed {
            SecurityEvent::KeyCleanedUp { key_id: id.clone() }.emit();
        }

        info!(removed = doomed.len(), "cleaned up expired api keys");
        Ok(doomed.len())
    }

    fn is_cleanup_candidate(key: &ApiKey, cutoff: DateTime<Utc>) -> bool {
        if !key.is_active() {
            // Retention for revoked keys counts from the revocation
            // itself, so a just-revoked key stays inspectable for the
            // full window no matter how old it is. Records predating the
            // revocation stamp are kept for an operator to judge.
            return key.revoked_at().is_some_and(|revoked_at| revoked_at < cutoff);
        }

        match key.expires_at() {
            Some(expires_at) => expires_at < cutoff,
            None => false,
        }
    }

    /// Fetch metadata for a single key.
    pub async fn get_info(&self, key_id: &KeyId) -> Result<KeyInfo, SecurityError> {
        let keys = self.keys.read().await;
        keys.get(key_id)
            .map(ApiKey::info)
            .ok_or_else(|| SecurityError::not_found(format!("key '{key_id}' not found")))
    }

    /// List metadata for all keys.
    pub async fn list(&self) -> Vec<KeyInfo> {
        let keys = self.keys.read().await;
        let mut infos: Vec<KeyInfo> = keys.values().map(ApiKey::info).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Aggregate statistics over the key map.
    pub async fn stats(&self) -> KeyStats {
        let keys = self.keys.read().await;
        KeyStats::from_keys(keys.values())
    }
}
