//! Background maintenance
//!
//! Periodic key cleanup and abuse-record sweeping run as owned tokio
//! tasks. The owner keeps the handles and can stop them deterministically
//! instead of leaving daemons running behind its back.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::infrastructure::abuse::AbuseTracker;
use crate::infrastructure::api_key::KeyLifecycleManager;

/// Handles for the periodic maintenance tasks.
///
/// Aborts its tasks on [`shutdown`](Self::shutdown) or when dropped.
#[derive(Debug)]
pub struct MaintenanceTasks {
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceTasks {
    /// Spawn the key-cleanup and abuse-sweep loops.
    ///
    /// Neither loop runs at spawn time; the first pass happens one full
    /// interval in.
    pub fn spawn(
        keys: Arc<KeyLifecycleManager>,
        abuse: Arc<AbuseTracker>,
        key_sweep_interval: Duration,
        abuse_sweep_interval: Duration,
    ) -> Self {
        let key_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(key_sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match keys.cleanup_expired().await {
                    Ok(removed) if removed > 0 => {
                        info!(removed, "periodic key cleanup complete");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        // Keys kept one cycle too long are harmless; the
                        // next pass retries.
                        warn!(error = %err, "periodic key cleanup failed");
                    }
                }
            }
        });

        let abuse_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(abuse_sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                abuse.sweep();
            }
        });

        info!(
            key_sweep_interval_secs = key_sweep_interval.as_secs(),
            abuse_sweep_interval_secs = abuse_sweep_interval.as_secs(),
            "maintenance tasks started"
        );

        Self {
            handles: vec![key_task, abuse_task],
        }
    }

    /// Stop all maintenance tasks.
    pub fn shutdown(mut self) {
        self.abort_all();
        info!("maintenance tasks stopped");
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for MaintenanceTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::abuse::AbuseConfig;
    use crate::infrastructure::api_key::{ApiKeyGenerator, IssueRequest};
    use crate::infrastructure::store::InMemoryKeyStore;

    async fn fixtures() -> (Arc<KeyLifecycleManager>, Arc<AbuseTracker>) {
        let store = Arc::new(InMemoryKeyStore::new());
        let keys = Arc::new(
            KeyLifecycleManager::load(
                store,
                ApiKeyGenerator::test(),
                chrono::Duration::hours(24),
                chrono::Duration::milliseconds(1),
            )
            .await,
        );
        let abuse = Arc::new(AbuseTracker::new(AbuseConfig::default()));
        (keys, abuse)
    }

    #[tokio::test]
    async fn test_periodic_cleanup_runs() {
        let (keys, abuse) = fixtures().await;

        let doomed = keys
            .issue(IssueRequest::new().with_expires_in(chrono::Duration::milliseconds(-100)))
            .await
            .unwrap();

        let tasks = MaintenanceTasks::spawn(
            keys.clone(),
            abuse,
            Duration::from_millis(20),
            Duration::from_secs(3600),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        tasks.shutdown();

        assert!(keys.get_info(&doomed.info.key_id).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_tasks() {
        let (keys, abuse) = fixtures().await;

        let tasks = MaintenanceTasks::spawn(
            keys,
            abuse,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );

        let handles: Vec<_> = tasks.handles.iter().map(JoinHandle::abort_handle).collect();
        tasks.shutdown();

        tokio::time::sleep(Duration::from_millis(10)).await;
        for handle in handles {
            assert!(handle.is_finished());
        }
    }
}
