//! Security event taxonomy
//!
//! Every observable action of the subsystem is one of these variants, each
//! carrying only the fields relevant to its kind. Identifiers for sensitive
//! values (client fingerprints) are already one-way derived and are further
//! truncated before emission; raw secrets and raw client addresses never
//! appear in an event.

use chrono::{DateTime, Utc};

use super::api_key::KeyId;
use super::fingerprint::ClientFingerprint;

/// A structured security event, consumed via the tracing subscriber.
#[derive(Debug, Clone)]
pub enum SecurityEvent {
    KeyGenerated {
        key_id: KeyId,
        label: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        permissions: Vec<String>,
    },
    KeyRevoked {
        key_id: KeyId,
    },
    KeyRotated {
        old_key_id: KeyId,
        new_key_id: KeyId,
    },
    ExpiredKeyUsed {
        key_id: KeyId,
    },
    KeyCleanedUp {
        key_id: KeyId,
    },
    KeyStoreLoadError {
        error: String,
    },
    AuthSuccess {
        fingerprint: ClientFingerprint,
        key_id: KeyId,
    },
    AuthFailure {
        fingerprint: ClientFingerprint,
        reason: String,
    },
    LockoutTriggered {
        fingerprint: ClientFingerprint,
        recent_failures: usize,
        locked_until: DateTime<Utc>,
    },
    SuspiciousActivity {
        fingerprint: ClientFingerprint,
        reason: String,
    },
}

impl SecurityEvent {
    /// Stable event name for log consumers.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::KeyGenerated { .. } => "api_key_generated",
            Self::KeyRevoked { .. } => "api_key_revoked",
            Self::KeyRotated { .. } => "api_key_rotated",
            Self::ExpiredKeyUsed { .. } => "api_key_expired_used",
            Self::KeyCleanedUp { .. } => "api_key_cleaned_up",
            Self::KeyStoreLoadError { .. } => "api_key_load_error",
            Self::AuthSuccess { .. } => "auth_success",
            Self::AuthFailure { .. } => "auth_failure",
            Self::LockoutTriggered { .. } => "lockout_triggered",
            Self::SuspiciousActivity { .. } => "suspicious_activity",
        }
    }

    /// Emit the event through tracing at its per-kind severity.
    pub fn emit(&self) {
        let event_type = self.event_type();

        match self {
            Self::KeyGenerated {
                key_id,
                label,
                expires_at,
                permissions,
            } => {
                tracing::info!(
                    event_type,
                    key_id = %key_id,
                    label = label.as_deref().unwrap_or(""),
                    expires_at = expires_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    permissions = permissions.join(","),
                    "API key generated"
                );
            }
            Self::KeyRevoked { key_id } => {
                tracing::info!(event_type, key_id = %key_id, "API key revoked");
            }
            Self::KeyRotated {
                old_key_id,
                new_key_id,
            } => {
                tracing::info!(
                    event_type,
                    old_key_id = %old_key_id,
                    new_key_id = %new_key_id,
                    "API key rotated"
                );
            }
            Self::ExpiredKeyUsed { key_id } => {
                tracing::warn!(event_type, key_id = %key_id, "expired API key presented");
            }
            Self::KeyCleanedUp { key_id } => {
                tracing::info!(event_type, key_id = %key_id, "expired API key removed");
            }
            Self::KeyStoreLoadError { error } => {
                tracing::error!(
                    event_type,
                    error = %error,
                    "key store unreadable, starting with an empty key set"
                );
            }
            Self::AuthSuccess {
                fingerprint,
                key_id,
            } => {
                tracing::info!(
                    event_type,
                    client = %fingerprint,
                    key_id = %key_id,
                    "authentication succeeded"
                );
            }
            Self::AuthFailure {
                fingerprint,
                reason,
            } => {
                tracing::warn!(
                    event_type,
                    client = %fingerprint,
                    reason = %reason,
                    "authentication failed"
                );
            }
            Self::LockoutTriggered {
                fingerprint,
                recent_failures,
                locked_until,
            } => {
                tracing::warn!(
                    event_type,
                    client = %fingerprint,
                    recent_failures,
                    locked_until = %locked_until.to_rfc3339(),
                    "client locked out after repeated auth failures"
                );
            }
            Self::SuspiciousActivity {
                fingerprint,
                reason,
            } => {
                tracing::warn!(
                    event_type,
                    client = %fingerprint,
                    reason = %reason,
                    "client marked suspicious"
                );
            }
        }
    }
}
