//! Client identity derivation for abuse tracking

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Characters of the fingerprint hash kept as the client identity.
const FINGERPRINT_LEN: usize = 32;

/// Characters of a hashed sensitive value kept in log payloads.
const LOG_HASH_LEN: usize = 16;

/// Derived client identity used for abuse tracking.
///
/// Never the raw network address: the fingerprint is a one-way hash over the
/// address plus user agent, so identity derivation stays pluggable and log
/// payloads never contain the address itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientFingerprint(String);

impl ClientFingerprint {
    /// Derive a fingerprint from the client address and user agent.
    pub fn derive(client_addr: &str, user_agent: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(client_addr.as_bytes());
        hasher.update(b":");
        hasher.update(user_agent.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..FINGERPRINT_LEN].to_string())
    }

    /// Wrap an already-derived fingerprint (e.g. computed by the HTTP layer).
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for event payloads.
    pub fn truncated(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ClientFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.truncated())
    }
}

/// Hash a sensitive value for inclusion in a log payload.
///
/// Returns a truncated SHA-256 digest; the original value is not recoverable
/// but repeated occurrences remain correlatable.
pub fn hash_sensitive(value: &str) -> String {
    let digest = hex::encode(Sha256::digest(value.as_bytes()));
    digest[..LOG_HASH_LEN].to_string()
}
