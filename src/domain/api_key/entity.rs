//! API key record and related types

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::SecurityError;

/// Permission tags understood by the surrounding service.
pub mod permissions {
    /// Submit generation requests.
    pub const GENERATE: &str = "generate";
    /// Read and clear the content cache.
    pub const CACHE: &str = "cache";
    /// Query service health.
    pub const HEALTH: &str = "health";
}

const MAX_KEY_ID_LENGTH: usize = 64;

/// Public identifier of an issued key - URL-safe, max 64 characters.
///
/// Used for management operations (revoke/rotate/info); never itself a
/// secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    /// Create a new KeyId after validation.
    pub fn new(id: impl Into<String>) -> Result<Self, SecurityError> {
        let id = id.into();
        if id.is_empty() {
            return Err(SecurityError::configuration("key id cannot be empty"));
        }
        if id.len() > MAX_KEY_ID_LENGTH {
            return Err(SecurityError::configuration(format!(
                "key id exceeds maximum length of {} characters",
                MAX_KEY_ID_LENGTH
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SecurityError::configuration(
                "key id may only contain alphanumeric characters, '-' and '_'",
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeyId {
    type Error = SecurityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One issued API credential: lifecycle metadata plus the one-way hash of the
/// bearer secret. The secret itself is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Public identifier, unique across the store.
    id: KeyId,
    /// KDF-derived hash of the bearer secret.
    secret_hash: String,
    /// Creation timestamp.
    created_at: DateTime<Utc>,
    /// Expiration timestamp (None = never expires).
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    /// Last time the key was successfully validated.
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used_at: Option<DateTime<Utc>>,
    /// Successful validations to date. Monotonically non-decreasing.
    #[serde(default)]
    usage_count: u64,
    /// False once explicitly revoked - distinct from natural expiry.
    #[serde(default = "default_active")]
    active: bool,
    /// When the key was revoked. Cleanup retention for revoked keys is
    /// counted from this moment, keeping fresh revocations inspectable.
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_at: Option<DateTime<Utc>>,
    /// Capability tags. Non-empty; defaults applied at creation.
    permissions: BTreeSet<String>,
    /// Optional human-readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

fn default_active() -> bool {
    true
}

impl ApiKey {
    /// Create a new key record with the default permission set.
    pub fn new(id: KeyId, secret_hash: impl Into<String>) -> Self {
        Self {
            id,
            secret_hash: secret_hash.into(),
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
            usage_count: 0,
            active: true,
            revoked_at: None,
            permissions: default_permissions(),
            label: None,
        }
    }

    /// Set expiration.
    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set permissions. An empty set falls back to the defaults rather than
    /// producing an unusable key.
    pub fn with_permissions(mut self, permissions: BTreeSet<String>) -> Self {
        if !permissions.is_empty() {
            self.permissions = permissions;
        }
        self
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    // Getters

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn secret_hash(&self) -> &str {
        &self.secret_hash
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.last_used_at
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    // Status checks

    /// Check if the key has passed its expiry.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    /// Check if the key is valid for use: not revoked and not expired.
    pub fn is_valid_for_use(&self) -> bool {
        self.active && !self.is_expired()
    }

    /// Check a capability tag.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    // Mutators

    /// Record a successful validation.
    pub fn record_usage(&mut self) {
        self.last_used_at = Some(Utc::now());
        self.usage_count += 1;
    }

    /// Revoke the key. Irreversible; stamps the revocation time so cleanup
    /// retention counts from the revocation, not from prior activity.
    pub fn revoke(&mut self) {
        self.active = false;
        if self.revoked_at.is_none() {
            self.revoked_at = Some(Utc::now());
        }
    }

    /// Move the expiry, e.g. to the rotation grace deadline.
    pub fn set_expiration(&mut self, expires_at: Option<DateTime<Utc>>) {
        self.expires_at = expires_at;
    }

    /// Management view of this record, with the hash excluded.
    pub fn info(&self) -> KeyInfo {
        KeyInfo {
            key_id: self.id.clone(),
            label: self.label.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            usage_count: self.usage_count,
            active: self.active,
            revoked_at: self.revoked_at,
            permissions: self.permissions.clone(),
            expired: self.is_expired(),
        }
    }
}

fn default_permissions() -> BTreeSet<String> {
    [permissions::GENERATE, permissions::CACHE, permissions::HEALTH]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// Key metadata exposed to the management surface.
///
/// Deliberately excludes `secret_hash`; the plaintext secret is only ever
/// visible at the single issuance moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: KeyId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    pub permissions: BTreeSet<String>,
    pub expired: bool,
}

impl KeyInfo {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Aggregate counts over the key set. Read-only, computed on demand.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeyStats {
    pub total_keys: usize,
    pub active_keys: usize,
    pub expired_keys: usize,
    pub total_usage: u64,
    pub keys_by_permission: BTreeMap<String, usize>,
}

impl KeyStats {
    pub fn from_keys<'a>(keys: impl Iterator<Item = &'a ApiKey>) -> Self {
        let mut stats = Self::default();
        for key in keys {
            stats.total_keys += 1;
            stats.total_usage += key.usage_count();
            if key.is_expired() {
                stats.expired_keys += 1;
            } else if key.is_active() {
                stats.active_keys += 1;
            }
            for permission in key.permissions() {
                *stats.keys_by_permission.entry(permission.clone()).or_default() += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_key(id: &str) -> ApiKey {
        ApiKey::new(KeyId::new(id).unwrap(), "pbkdf2-sha256$1000$hash")
    }

    #[test]
    fn test_key_id_valid() {
        let id = KeyId::new("abc_DEF-123").unwrap();
        assert_eq!(id.as_str(), "abc_DEF-123");
    }

    #[test]
    fn test_key_id_invalid() {
        assert!(KeyId::new("").is_err());
        assert!(KeyId::new("has space").is_err());
        assert!(KeyId::new("has/slash").is_err());
        assert!(KeyId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_new_key_has_default_permissions() {
        let key = test_key("k1");
        assert!(key.has_permission(permissions::GENERATE));
        assert!(key.has_permission(permissions::CACHE));
        assert!(key.has_permission(permissions::HEALTH));
        assert!(key.is_valid_for_use());
    }

    #[test]
    fn test_empty_permissions_fall_back_to_defaults() {
        let key = test_key("k1").with_permissions(BTreeSet::new());
        assert!(!key.permissions().is_empty());
    }

    #[test]
    fn test_custom_permissions() {
        let perms: BTreeSet<String> = [permissions::GENERATE.to_string()].into();
        let key = test_key("k1").with_permissions(perms);
        assert!(key.has_permission(permissions::GENERATE));
        assert!(!key.has_permission(permissions::CACHE));
    }

    #[test]
    fn test_expiry() {
        let key = test_key("k1").with_expiration(Utc::now() - Duration::hours(1));
        assert!(key.is_expired());
        assert!(!key.is_valid_for_use());
        // Revoked-vs-expired stays distinguishable.
        assert!(key.is_active());
    }

    #[test]
    fn test_revocation() {
        let mut key = test_key("k1");
        assert!(key.revoked_at().is_none());

        key.revoke();
        assert!(!key.is_active());
        assert!(!key.is_valid_for_use());
        assert!(!key.is_expired());
        assert!(key.revoked_at().is_some());
    }

    #[test]
    fn test_revoking_twice_keeps_first_timestamp() {
        let mut key = test_key("k1");
        key.revoke();
        let first = key.revoked_at().unwrap();

        key.revoke();
        assert_eq!(key.revoked_at(), Some(first));
    }

    #[test]
    fn test_record_usage_is_monotonic() {
        let mut key = test_key("k1");
        assert_eq!(key.usage_count(), 0);
        assert!(key.last_used_at().is_none());

        key.record_usage();
        key.record_usage();
        assert_eq!(key.usage_count(), 2);
        assert!(key.last_used_at().is_some());
    }

    #[test]
    fn test_info_excludes_hash() {
        let key = test_key("k1").with_label("ci runner");
        let info = key.info();

        assert_eq!(info.key_id.as_str(), "k1");
        assert_eq!(info.label.as_deref(), Some("ci runner"));

        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_record_serde_round_trip() {
        let mut key = test_key("k1")
            .with_label("batch")
            .with_expiration(Utc::now() + Duration::days(30));
        key.record_usage();

        let json = serde_json::to_string(&key).unwrap();
        let back: ApiKey = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id(), key.id());
        assert_eq!(back.secret_hash(), key.secret_hash());
        assert_eq!(back.usage_count(), 1);
        assert_eq!(back.permissions(), key.permissions());
        assert_eq!(back.expires_at(), key.expires_at());
    }
}
