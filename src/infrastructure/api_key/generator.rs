//! API key generation and secret hashing
//!
//! Secrets are high-entropy random tokens carrying a recognizable prefix;
//! stored hashes are derived with PBKDF2-SHA256 under a fixed application
//! salt. The salt can be fixed because the input is already 256 bits of
//! randomness; the iteration count is what matters against offline brute
//! force, and it stays configurable only so tests can run fast.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::domain::api_key::KeyId;
use crate::domain::SecurityError;

/// Application-wide KDF salt. Changing it invalidates every stored hash.
const KDF_SALT: &[u8] = b"resona_api_salt_v1";

const KDF_OUTPUT_SIZE: usize = 32;
const SECRET_BYTES: usize = 32;
const ID_BYTES: usize = 16;

/// Default PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Result of generating a new API key.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Public identifier, safe to log and list.
    pub key_id: KeyId,
    /// The plaintext bearer secret. Shown exactly once at issuance.
    pub secret: String,
    /// KDF-derived hash of the secret, the only form that is stored.
    pub secret_hash: String,
}

/// Generator for bearer secrets and their stored hashes.
#[derive(Debug, Clone)]
pub struct ApiKeyGenerator {
    /// Prefix for all generated secrets (e.g. "rsn_live_", "rsn_test_").
    prefix: String,
    /// PBKDF2 rounds used for hashing.
    iterations: u32,
}

impl ApiKeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    /// Generator for production keys.
    pub fn production() -> Self {
        Self::new("rsn_live_")
    }

    /// Generator for test keys.
    pub fn test() -> Self {
        Self::new("rsn_test_").with_iterations(1_000)
    }

    /// Override the PBKDF2 iteration count.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Generate a fresh key: random secret, random public id, stored hash.
    pub fn generate(&self) -> Result<GeneratedKey, SecurityError> {
        let mut secret_bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let secret = format!("{}{}", self.prefix, URL_SAFE_NO_PAD.encode(secret_bytes));

        self.from_secret(&secret)
    }

    /// Build a key around a known secret.
    ///
    /// Used by rotation-free test setups that need a deterministic secret.
    pub fn from_secret(&self, secret: &str) -> Result<GeneratedKey, SecurityError> {
        let mut id_bytes = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let key_id = KeyId::new(URL_SAFE_NO_PAD.encode(id_bytes))?;

        Ok(GeneratedKey {
            key_id,
            secret: secret.to_string(),
            secret_hash: self.hash_secret(secret),
        })
    }

    /// Derive the stored hash for a secret.
    ///
    /// Deterministic: equal secrets yield equal hash strings, which is what
    /// makes the exact-match lookup in validation possible.
    pub fn hash_secret(&self, secret: &str) -> String {
        let mut derived = [0u8; KDF_OUTPUT_SIZE];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, self.iterations, &mut derived);
        format!(
            "pbkdf2-sha256${}${}",
            self.iterations,
            URL_SAFE_NO_PAD.encode(derived)
        )
    }
}

/// Constant-time string comparison to prevent timing attacks.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    let mut result = 0u8;

    for i in 0..a.len() {
        result |= a_bytes[i] ^ b_bytes[i];
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key() {
        let generator = ApiKeyGenerator::test();
        let generated = generator.generate().unwrap();

        assert!(generated.secret.starts_with("rsn_test_"));
        assert!(generated.secret_hash.starts_with("pbkdf2-sha256$1000$"));
        // 32 bytes base64-encoded = 43 chars, plus prefix
        assert!(generated.secret.len() > 40);
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let generator = ApiKeyGenerator::test();
        let a = generator.generate().unwrap();
        let b = generator.generate().unwrap();

        assert_ne!(a.secret, b.secret);
        assert_ne!(a.secret_hash, b.secret_hash);
        assert_ne!(a.key_id, b.key_id);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let generator = ApiKeyGenerator::test();
        let h1 = generator.hash_secret("rsn_test_fixed");
        let h2 = generator.hash_secret("rsn_test_fixed");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_depends_on_iterations() {
        let weak = ApiKeyGenerator::new("rsn_test_").with_iterations(100);
        let strong = ApiKeyGenerator::new("rsn_test_").with_iterations(200);
        assert_ne!(
            weak.hash_secret("rsn_test_fixed"),
            strong.hash_secret("rsn_test_fixed")
        );
    }

    #[test]
    fn test_hash_does_not_contain_secret() {
        let generator = ApiKeyGenerator::test();
        let generated = generator.generate().unwrap();
        assert!(!generated.secret_hash.contains(&generated.secret));
    }

    #[test]
    fn test_from_secret_round_trips() {
        let generator = ApiKeyGenerator::test();
        let generated = generator.from_secret("rsn_test_known_secret").unwrap();

        assert_eq!(generated.secret, "rsn_test_known_secret");
        assert_eq!(
            generated.secret_hash,
            generator.hash_secret("rsn_test_known_secret")
        );
    }

    #[test]
    fn test_production_defaults() {
        let generator = ApiKeyGenerator::production();
        let hash = generator.hash_secret("x");
        assert!(hash.starts_with("pbkdf2-sha256$100000$"));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
        assert!(constant_time_compare("", ""));
    }
}
