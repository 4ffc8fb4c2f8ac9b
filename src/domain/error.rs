use thiserror::Error;

/// Core security subsystem errors.
///
/// Only the coarse categories (`InvalidCredential`, `Locked`, `Forbidden`)
/// are meant to cross the service boundary; the finer distinctions (expired
/// vs. unknown vs. revoked) exist for internal logging only and must never be
/// surfaced verbatim to a network caller.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Generic credential rejection. Deliberately carries no detail so that
    /// callers cannot distinguish unknown, revoked and expired credentials.
    #[error("Invalid credential")]
    InvalidCredential,

    /// The presented credential matched a record past its expiry. Internal
    /// variant; the gate reports it to callers as `InvalidCredential`.
    #[error("Credential expired")]
    Expired,

    #[error("Client is locked out, retry after {retry_after_secs}s")]
    Locked { retry_after_secs: u64 },

    #[error("Missing required permission: {permission}")]
    Forbidden { permission: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Crypto error: {message}")]
    Crypto { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl SecurityError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn forbidden(permission: impl Into<String>) -> Self {
        Self::Forbidden {
            permission: permission.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
