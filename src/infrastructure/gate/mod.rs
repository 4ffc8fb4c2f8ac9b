//! Request admission gate
//!
//! Front door for every incoming request: checks the client's lockout
//! state, authenticates the presented credential and enforces the
//! permission the request needs. Transport concerns (header parsing,
//! response codes) belong to the caller; the gate only decides.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::api_key::KeyInfo;
use crate::domain::{ClientFingerprint, SecurityError, SecurityEvent};
use crate::infrastructure::abuse::AbuseTracker;
use crate::infrastructure::api_key::KeyLifecycleManager;

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub enum AdmissionDecision {
    /// Let the request through. `key` is `None` only in anonymous mode.
    Admitted { key: Option<KeyInfo> },
    /// Client is locked out; retry after the given number of seconds.
    RejectedLocked { retry_after_secs: i64 },
    /// Credential missing, unknown, revoked or expired. Deliberately one
    /// variant for all of these so rejections leak nothing.
    RejectedInvalid,
    /// Valid credential without the permission this request needs.
    RejectedForbidden { permission: String },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// Convert the decision into a result, for callers that propagate
    /// rejections as errors.
    pub fn require(self) -> Result<Option<KeyInfo>, SecurityError> {
        match self {
            Self::Admitted { key } => Ok(key),
            Self::RejectedLocked { retry_after_secs } => Err(SecurityError::Locked {
                retry_after_secs: retry_after_secs.max(0) as u64,
            }),
            Self::RejectedInvalid => Err(SecurityError::InvalidCredential),
            Self::RejectedForbidden { permission } => Err(SecurityError::forbidden(permission)),
        }
    }
}

/// Decides whether a request gets through, combining credential
/// validation with per-client abuse tracking.
#[derive(Debug)]
pub struct RequestGate {
    keys: Arc<KeyLifecycleManager>,
    abuse: Arc<AbuseTracker>,
    /// When set, requests without a credential are admitted with no key.
    /// Development convenience only; config validation rejects it in
    /// production.
    allow_anonymous: bool,
}

impl RequestGate {
    pub fn new(
        keys: Arc<KeyLifecycleManager>,
        abuse: Arc<AbuseTracker>,
        allow_anonymous: bool,
    ) -> Self {
        if allow_anonymous {
            warn!("anonymous admission is enabled; credentials are not required");
        }
        Self {
            keys,
            abuse,
            allow_anonymous,
        }
    }

    /// Run the admission checks for one request.
    ///
    /// Order matters: the lockout check comes first so a locked client
    /// learns nothing about credential validity, and a permission miss is
    /// not an authentication failure so it never feeds the abuse tracker.
    pub async fn admit(
        &self,
        credential: Option<&str>,
        fingerprint: &ClientFingerprint,
        permission: &str,
    ) -> AdmissionDecision {
        if let Some(retry_after_secs) = self.abuse.locked_out_for(fingerprint) {
            debug!(fingerprint = %fingerprint, retry_after_secs, "rejected locked-out client");
            return AdmissionDecision::RejectedLocked { retry_after_secs };
        }

        let Some(credential) = credential else {
            if self.allow_anonymous {
                debug!(fingerprint = %fingerprint, "admitted anonymous request");
                return AdmissionDecision::Admitted { key: None };
            }
            return self.reject_invalid(fingerprint, "missing credential");
        };

        let key = match self.keys.validate(credential).await {
            Ok(key) => key,
            Err(SecurityError::InvalidCredential | SecurityError::Expired) => {
                // Expired keys look identical to unknown ones from the
                // outside, leaving no oracle for secret probing.
                return self.reject_invalid(fingerprint, "invalid credential");
            }
            Err(err) => {
                // Internal faults must not count against the client.
                warn!(fingerprint = %fingerprint, error = %err, "credential validation failed");
                return AdmissionDecision::RejectedInvalid;
            }
        };

        if !key.has_permission(permission) {
            debug!(
                fingerprint = %fingerprint,
                key_id = %key.key_id,
                permission,
                "rejected request lacking permission"
            );
            return AdmissionDecision::RejectedForbidden {
                permission: permission.to_string(),
            };
        }

        SecurityEvent::AuthSuccess {
            fingerprint: fingerprint.clone(),
            key_id: key.key_id.clone(),
        }
        .emit();

        AdmissionDecision::Admitted { key: Some(key) }
    }

    fn reject_invalid(
        &self,
        fingerprint: &ClientFingerprint,
        reason: &str,
    ) -> AdmissionDecision {
        self.abuse.record_failure(fingerprint);

        SecurityEvent::AuthFailure {
            fingerprint: fingerprint.clone(),
            reason: reason.to_string(),
        }
        .emit();

        AdmissionDecision::RejectedInvalid
    }
}
