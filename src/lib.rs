//! Resona Gateway security subsystem
//!
//! Credential lifecycle and request admission for the Resona generation
//! API: an encrypted at-rest key store, API key issuance / validation /
//! rotation / cleanup, per-client abuse tracking with temporary lockouts,
//! and a request gate that combines them into a single admission decision.
//!
//! The crate is transport-agnostic. A server embeds it by initializing a
//! [`SecurityGateway`] and asking its [`RequestGate`] to admit each
//! request:
//!
//! ```no_run
//! use resona_gateway::{SecurityConfig, SecurityGateway};
//! use resona_gateway::domain::{permissions, ClientFingerprint};
//!
//! # async fn example() -> Result<(), resona_gateway::SecurityError> {
//! let gateway = SecurityGateway::initialize(SecurityConfig::load()?).await?;
//! let _maintenance = gateway.start_maintenance();
//!
//! let fingerprint = ClientFingerprint::derive("203.0.113.7", "resona-cli/1.4");
//! let decision = gateway
//!     .gate()
//!     .admit(Some("rsn_live_..."), &fingerprint, permissions::GENERATE)
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod infrastructure;

use std::sync::Arc;

use tracing::info;

pub use config::{Environment, LogFormat, SecurityConfig};
pub use domain::{ClientFingerprint, SecurityError, SecurityEvent};
pub use infrastructure::abuse::{AbuseConfig, AbuseStats, AbuseTracker};
pub use infrastructure::api_key::{ApiKeyGenerator, IssueRequest, IssuedKey, KeyLifecycleManager};
pub use infrastructure::gate::{AdmissionDecision, RequestGate};
pub use infrastructure::logging::init_logging;
pub use infrastructure::maintenance::MaintenanceTasks;
pub use infrastructure::store::{EncryptedKeyStore, KeyStore};

/// The assembled security subsystem.
///
/// Initialization wires the encrypted store, the lifecycle manager, the
/// abuse tracker and the request gate from one [`SecurityConfig`].
/// Maintenance loops are opt-in; the caller owns their handle.
#[derive(Debug)]
pub struct SecurityGateway {
    config: SecurityConfig,
    keys: Arc<KeyLifecycleManager>,
    abuse: Arc<AbuseTracker>,
    gate: Arc<RequestGate>,
}

impl SecurityGateway {
    /// Build the subsystem, opening (or creating) the encrypted key store
    /// and loading persisted keys.
    pub async fn initialize(config: SecurityConfig) -> Result<Self, SecurityError> {
        config.validate()?;

        let store = Arc::new(EncryptedKeyStore::open(
            &config.storage.keys_file,
            &config.storage.master_key_file,
        )?);

        let prefix = if config.environment.is_test() {
            "rsn_test_"
        } else {
            "rsn_live_"
        };
        let generator =
            ApiKeyGenerator::new(prefix).with_iterations(config.lifecycle.kdf_iterations);

        let keys = Arc::new(
            KeyLifecycleManager::load(
                store,
                generator,
                chrono::Duration::hours(config.lifecycle.rotation_grace_hours),
                chrono::Duration::days(config.lifecycle.cleanup_retention_days),
            )
            .await,
        );

        let abuse = Arc::new(AbuseTracker::new(AbuseConfig::from_security_config(
            &config,
        )));

        let gate = Arc::new(RequestGate::new(
            keys.clone(),
            abuse.clone(),
            config.auth.allow_anonymous,
        ));

        info!(environment = ?config.environment, "security gateway initialized");

        Ok(Self {
            config,
            keys,
            abuse,
            gate,
        })
    }

    /// Start the periodic cleanup and sweep loops. The returned handle
    /// stops them when shut down or dropped.
    pub fn start_maintenance(&self) -> MaintenanceTasks {
        MaintenanceTasks::spawn(
            self.keys.clone(),
            self.abuse.clone(),
            std::time::Duration::from_secs(self.config.lifecycle.key_sweep_interval_secs),
            std::time::Duration::from_secs(self.config.lifecycle.abuse_sweep_interval_secs),
        )
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn keys(&self) -> &Arc<KeyLifecycleManager> {
        &self.keys
    }

    pub fn abuse(&self) -> &Arc<AbuseTracker> {
        &self.abuse
    }

    pub fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }
}
