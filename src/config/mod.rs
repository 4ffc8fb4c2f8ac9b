//! Security subsystem configuration
//!
//! Loaded from `config/default` / `config/local` files with `RESONA__`
//! environment overrides, then validated. Production deployments get a
//! hardening pass: the anonymous-admission bypass and weakened KDF settings
//! are rejected outright rather than silently accepted.

use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::SecurityError;

/// Deployment environment.
///
/// `Test` disables the abuse tracker so suites that deliberately hammer the
/// gate with bad credentials cannot poison later tests sharing process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test)
    }
}

/// Top-level configuration for the security subsystem.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub environment: Environment,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub lifecycle: LifecycleConfig,
    pub logging: LoggingConfig,
}

/// Where the encrypted key database and its master key live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub keys_file: PathBuf,
    pub master_key_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            keys_file: PathBuf::from("config/api_keys.enc"),
            master_key_file: PathBuf::from("config/master.key"),
        }
    }
}

/// Authentication and abuse-tracking policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Failures within the window before a lockout is established.
    pub max_failed_attempts: usize,
    /// Trailing window, in seconds, over which failures are counted.
    pub lockout_window_secs: u64,
    /// How long a lockout lasts, in seconds.
    pub lockout_duration_secs: u64,
    /// Ring-buffer capacity of retained failure timestamps per client.
    pub failure_history_size: usize,
    /// Admit unauthenticated requests unconditionally. Development only;
    /// must be an explicit choice and is logged loudly at startup.
    pub allow_anonymous: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_window_secs: 900,
            lockout_duration_secs: 900,
            failure_history_size: 100,
            allow_anonymous: false,
        }
    }
}

/// Key lifecycle policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a rotated-out key keeps working, in hours.
    pub rotation_grace_hours: i64,
    /// How long past expiry a record stays inspectable before the cleanup
    /// sweep deletes it, in days.
    pub cleanup_retention_days: i64,
    /// Interval of the expired-key cleanup sweep, in seconds.
    pub key_sweep_interval_secs: u64,
    /// Interval of the abuse-tracker compaction sweep, in seconds.
    pub abuse_sweep_interval_secs: u64,
    /// PBKDF2 iteration count for secret hashing.
    pub kdf_iterations: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            rotation_grace_hours: 24,
            cleanup_retention_days: 7,
            key_sweep_interval_secs: 86_400,
            abuse_sweep_interval_secs: 3_600,
            kdf_iterations: 100_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Minimum KDF rounds accepted in production.
const MIN_PRODUCTION_KDF_ITERATIONS: u32 = 100_000;

impl SecurityConfig {
    /// Load configuration from files and environment.
    pub fn load() -> Result<Self, SecurityError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("RESONA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SecurityError::configuration(e.to_string()))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| SecurityError::configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, applying production hardening rules.
    pub fn validate(&self) -> Result<(), SecurityError> {
        let mut errors = Vec::new();

        if self.auth.max_failed_attempts == 0 {
            errors.push("auth.max_failed_attempts must be positive".to_string());
        }
        if self.auth.lockout_window_secs == 0 || self.auth.lockout_duration_secs == 0 {
            errors.push("lockout window and duration must be positive".to_string());
        }
        if self.auth.failure_history_size == 0 {
            errors.push("auth.failure_history_size must be positive".to_string());
        }
        if self.lifecycle.rotation_grace_hours < 0 || self.lifecycle.cleanup_retention_days < 0 {
            errors.push("lifecycle windows must not be negative".to_string());
        }
        if self.lifecycle.kdf_iterations == 0 {
            errors.push("lifecycle.kdf_iterations must be positive".to_string());
        }

        if self.environment.is_production() {
            if self.auth.allow_anonymous {
                errors.push("auth.allow_anonymous cannot be enabled in production".to_string());
            }
            if self.lifecycle.kdf_iterations < MIN_PRODUCTION_KDF_ITERATIONS {
                errors.push(format!(
                    "lifecycle.kdf_iterations must be at least {} in production",
                    MIN_PRODUCTION_KDF_ITERATIONS
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SecurityError::configuration(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SecurityConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.max_failed_attempts, 5);
        assert_eq!(config.auth.lockout_duration_secs, 900);
        assert_eq!(config.lifecycle.kdf_iterations, 100_000);
    }

    #[test]
    fn test_production_rejects_anonymous_bypass() {
        let mut config = SecurityConfig::default();
        config.environment = Environment::Production;
        config.auth.allow_anonymous = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_production_rejects_weak_kdf() {
        let mut config = SecurityConfig::default();
        config.environment = Environment::Production;
        config.lifecycle.kdf_iterations = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_development_allows_weak_kdf() {
        let mut config = SecurityConfig::default();
        config.lifecycle.kdf_iterations = 1_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let mut config = SecurityConfig::default();
        config.auth.max_failed_attempts = 0;
        assert!(config.validate().is_err());
    }
}
