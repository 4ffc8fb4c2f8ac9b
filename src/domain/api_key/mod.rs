//! API key domain model

mod entity;

pub use entity::{permissions, ApiKey, KeyId, KeyInfo, KeyStats};
