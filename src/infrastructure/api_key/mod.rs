//! API key generation and lifecycle infrastructure

pub mod generator;
pub mod manager;

pub use generator::{ApiKeyGenerator, GeneratedKey, DEFAULT_KDF_ITERATIONS};
pub use manager::{IssueRequest, IssuedKey, KeyLifecycleManager};
