//! Per-client authentication failure tracking and lockout
//!
//! Clients are keyed by [`ClientFingerprint`]. Each record keeps a bounded
//! ring of recent failure timestamps; when enough of them fall inside the
//! lockout window the client is locked out for a fixed duration. State is
//! held in a [`DashMap`] so unrelated clients never contend on a lock.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tracing::debug;

use crate::config::{Environment, SecurityConfig};
use crate::domain::{ClientFingerprint, SecurityEvent};

/// Tracker policy, derived from [`SecurityConfig`].
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Failures inside the window that trigger a lockout.
    pub max_failed_attempts: usize,
    /// How far back failures count toward the threshold.
    pub lockout_window: Duration,
    /// How long a triggered lockout lasts.
    pub lockout_duration: Duration,
    /// Cap on retained failure timestamps per client.
    pub failure_history_size: usize,
    /// When false the tracker records but never locks anyone out.
    pub blocking_enabled: bool,
}

impl AbuseConfig {
    pub fn from_security_config(config: &SecurityConfig) -> Self {
        Self {
            max_failed_attempts: config.auth.max_failed_attempts,
            lockout_window: Duration::seconds(config.auth.lockout_window_secs as i64),
            lockout_duration: Duration::seconds(config.auth.lockout_duration_secs as i64),
            failure_history_size: config.auth.failure_history_size,
            // Test runs hammer the auth path on purpose; locking them out
            // would only make the suite flaky.
            blocking_enabled: config.environment != Environment::Test,
        }
    }
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_window: Duration::seconds(900),
            lockout_duration: Duration::seconds(900),
            failure_history_size: 100,
            blocking_enabled: true,
        }
    }
}

#[derive(Debug)]
struct ClientRecord {
    failures: VecDeque<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

impl ClientRecord {
    fn new() -> Self {
        Self {
            failures: VecDeque::new(),
            locked_until: None,
        }
    }
}

/// Snapshot of tracker state, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct AbuseStats {
    pub tracked_clients: usize,
    pub locked_clients: usize,
    pub suspicious_clients: usize,
}

/// Tracks authentication failures per client fingerprint and enforces
/// temporary lockouts.
#[derive(Debug)]
pub struct AbuseTracker {
    config: AbuseConfig,
    records: DashMap<String, ClientRecord>,
    suspicious: DashSet<String>,
}

impl AbuseTracker {
    pub fn new(config: AbuseConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            suspicious: DashSet::new(),
        }
    }

    /// Seconds remaining on an active lockout for this client, if any.
    ///
    /// An expired lockout is cleared on the way through, so a client that
    /// has served its time is readmitted without waiting for a sweep.
    pub fn locked_out_for(&self, fingerprint: &ClientFingerprint) -> Option<i64> {
        if !self.config.blocking_enabled {
            return None;
        }

        let mut record = self.records.get_mut(fingerprint.as_str())?;
        let locked_until = record.locked_until?;
        let now = Utc::now();

        if locked_until <= now {
            record.locked_until = None;
            debug!(fingerprint = %fingerprint, "lockout expired");
            return None;
        }

        Some((locked_until - now).num_seconds().max(1))
    }

    /// Record an authentication failure. Returns the lockout expiry if
    /// this failure pushed the client over the threshold.
    pub fn record_failure(&self, fingerprint: &ClientFingerprint) -> Option<DateTime<Utc>> {
        let now = Utc::now();

        let mut record = self
            .records
            .entry(fingerprint.as_str().to_string())
            .or_insert_with(ClientRecord::new);

        record.failures.push_back(now);
        while record.failures.len() > self.config.failure_history_size {
            record.failures.pop_front();
        }

        if !self.config.blocking_enabled {
            return None;
        }

        if record.locked_until.is_some_and(|until| until > now) {
            return record.locked_until;
        }

        let window_start = now - self.config.lockout_window;
        let recent = record
            .failures
            .iter()
            .filter(|ts| **ts >= window_start)
            .count();

        if recent < self.config.max_failed_attempts {
            return None;
        }

        let locked_until = now + self.config.lockout_duration;
        record.locked_until = Some(locked_until);
        drop(record);

        SecurityEvent::LockoutTriggered {
            fingerprint: fingerprint.clone(),
            recent_failures: recent,
            locked_until,
        }
        .emit();

        Some(locked_until)
    }

    /// Flag a client as suspicious. Flags are advisory and only surface
    /// through logs and [`AbuseStats`].
    pub fn mark_suspicious(&self, fingerprint: &ClientFingerprint, reason: &str) {
        let newly_flagged = self.suspicious.insert(fingerprint.as_str().to_string());

        if newly_flagged {
            SecurityEvent::SuspiciousActivity {
                fingerprint: fingerprint.clone(),
                reason: reason.to_string(),
            }
            .emit();
        }
    }

    pub fn is_suspicious(&self, fingerprint: &ClientFingerprint) -> bool {
        self.suspicious.contains(fingerprint.as_str())
    }

    /// Drop records with no recent failures and no active lockout.
    ///
    /// Run periodically so fingerprints seen once do not accumulate
    /// forever. Returns the number of records removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let window_start = now - self.config.lockout_window;
        let before = self.records.len();

        self.records.retain(|_, record| {
            record.failures.retain(|ts| *ts >= window_start);
            if record.locked_until.is_some_and(|until| until > now) {
                return true;
            }
            record.locked_until = None;
            !record.failures.is_empty()
        });

        let removed = before - self.records.len();
        if removed > 0 {
            debug!(removed, "swept stale abuse records");
        }
        removed
    }

    pub fn stats(&self) -> AbuseStats {
        let now = Utc::now();
        let locked_clients = self
            .records
            .iter()
            .filter(|entry| entry.locked_until.is_some_and(|until| until > now))
            .count();

        AbuseStats {
            tracked_clients: self.records.len(),
            locked_clients,
            suspicious_clients: self.suspicious.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(max_attempts: usize) -> AbuseConfig {
        AbuseConfig {
            max_failed_attempts: max_attempts,
            lockout_window: Duration::seconds(60),
            lockout_duration: Duration::seconds(60),
            failure_history_size: 10,
            blocking_enabled: true,
        }
    }

    fn client(name: &str) -> ClientFingerprint {
        ClientFingerprint::derive(name, "test-agent")
    }

    #[test]
    fn test_below_threshold_no_lockout() {
        let tracker = AbuseTracker::new(fast_config(3));
        let fp = client("10.0.0.1");

        assert!(tracker.record_failure(&fp).is_none());
        assert!(tracker.record_failure(&fp).is_none());
        assert!(tracker.locked_out_for(&fp).is_none());
    }

    #[test]
    fn test_threshold_triggers_lockout() {
        let tracker = AbuseTracker::new(fast_config(3));
        let fp = client("10.0.0.1");

        tracker.record_failure(&fp);
        tracker.record_failure(&fp);
        let locked_until = tracker.record_failure(&fp);

        assert!(locked_until.is_some());
        assert!(tracker.locked_out_for(&fp).is_some());
    }

    #[test]
    fn test_lockout_is_per_client() {
        let tracker = AbuseTracker::new(fast_config(2));
        let attacker = client("10.0.0.1");
        let bystander = client("10.0.0.2");

        tracker.record_failure(&attacker);
        tracker.record_failure(&attacker);

        assert!(tracker.locked_out_for(&attacker).is_some());
        assert!(tracker.locked_out_for(&bystander).is_none());
    }

    #[test]
    fn test_expired_lockout_clears() {
        let config = AbuseConfig {
            lockout_duration: Duration::milliseconds(10),
            ..fast_config(1)
        };
        let tracker = AbuseTracker::new(config);
        let fp = client("10.0.0.1");

        tracker.record_failure(&fp);
        assert!(tracker.locked_out_for(&fp).is_some());

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(tracker.locked_out_for(&fp).is_none());
    }

    #[test]
    fn test_old_failures_fall_out_of_window() {
        let config = AbuseConfig {
            lockout_window: Duration::milliseconds(10),
            ..fast_config(3)
        };
        let tracker = AbuseTracker::new(config);
        let fp = client("10.0.0.1");

        tracker.record_failure(&fp);
        tracker.record_failure(&fp);
        std::thread::sleep(std::time::Duration::from_millis(20));

        // Earlier failures are outside the window now.
        assert!(tracker.record_failure(&fp).is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let config = AbuseConfig {
            failure_history_size: 5,
            max_failed_attempts: 100,
            ..fast_config(100)
        };
        let tracker = AbuseTracker::new(config);
        let fp = client("10.0.0.1");

        for _ in 0..50 {
            tracker.record_failure(&fp);
        }

        let record = tracker.records.get(fp.as_str()).unwrap();
        assert_eq!(record.failures.len(), 5);
    }

    #[test]
    fn test_blocking_disabled() {
        let config = AbuseConfig {
            blocking_enabled: false,
            ..fast_config(1)
        };
        let tracker = AbuseTracker::new(config);
        let fp = client("10.0.0.1");

        for _ in 0..10 {
            assert!(tracker.record_failure(&fp).is_none());
        }
        assert!(tracker.locked_out_for(&fp).is_none());
    }

    #[test]
    fn test_test_environment_disables_blocking() {
        let mut config = SecurityConfig::default();
        config.environment = Environment::Test;

        let abuse = AbuseConfig::from_security_config(&config);
        assert!(!abuse.blocking_enabled);

        config.environment = Environment::Production;
        let abuse = AbuseConfig::from_security_config(&config);
        assert!(abuse.blocking_enabled);
    }

    #[test]
    fn test_mark_suspicious() {
        let tracker = AbuseTracker::new(fast_config(3));
        let fp = client("10.0.0.1");

        assert!(!tracker.is_suspicious(&fp));
        tracker.mark_suspicious(&fp, "scanner user agent");
        assert!(tracker.is_suspicious(&fp));
        assert_eq!(tracker.stats().suspicious_clients, 1);
    }

    #[test]
    fn test_sweep_removes_stale_records() {
        let config = AbuseConfig {
            lockout_window: Duration::milliseconds(10),
            ..fast_config(100)
        };
        let tracker = AbuseTracker::new(config);

        tracker.record_failure(&client("10.0.0.1"));
        tracker.record_failure(&client("10.0.0.2"));
        assert_eq!(tracker.stats().tracked_clients, 2);

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(tracker.sweep(), 2);
        assert_eq!(tracker.stats().tracked_clients, 0);
    }

    #[test]
    fn test_sweep_keeps_locked_clients() {
        let config = AbuseConfig {
            lockout_window: Duration::milliseconds(10),
            lockout_duration: Duration::seconds(60),
            ..fast_config(1)
        };
        let tracker = AbuseTracker::new(config);
        let fp = client("10.0.0.1");

        tracker.record_failure(&fp);
        std::thread::sleep(std::time::Duration::from_millis(20));

        assert_eq!(tracker.sweep(), 0);
        assert!(tracker.locked_out_for(&fp).is_some());
    }

    #[test]
    fn test_stats_counts_locked() {
        let tracker = AbuseTracker::new(fast_config(1));
        tracker.record_failure(&client("10.0.0.1"));
        tracker.record_failure(&client("10.0.0.2"));

        let stats = tracker.stats();
        assert_eq!(stats.tracked_clients, 2);
        assert_eq!(stats.locked_clients, 2);
    }
}
