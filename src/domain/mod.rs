//! Domain layer - core types of the credential subsystem

pub mod api_key;
pub mod error;
pub mod event;
pub mod fingerprint;

pub use api_key::{permissions, ApiKey, KeyId, KeyInfo, KeyStats};
pub use error::SecurityError;
pub use event::SecurityEvent;
pub use fingerprint::{hash_sensitive, ClientFingerprint};
