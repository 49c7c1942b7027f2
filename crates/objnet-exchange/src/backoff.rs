//! Dial backoff.
//!
//! Every failed dial blocks its address for
//! `min(base * growth^(attempts-1), max)`. Blocked addresses are skipped
//! without consuming an attempt; a successful dial clears the counter.
//! Peers are tracked alongside addresses (as counts only) so repeated
//! whole-peer failures are visible in logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Block time after the first failure.
    pub base: Duration,
    /// Multiplier applied per additional failure.
    pub growth: f64,
    /// Upper bound on the block time.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            growth: 2.0,
            max: Duration::from_secs(5 * 60),
        }
    }
}

impl BackoffConfig {
    /// Block time after `attempts` consecutive failures (1-indexed).
    pub fn ttl_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.growth.powi(exponent);
        let max = self.max.as_secs_f64();
        if secs.is_nan() || secs < 0.0 {
            Duration::ZERO
        } else if secs >= max {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    attempts: u32,
    blocked_until: Option<Instant>,
}

/// Addresses (and peers) currently in backoff.
#[derive(Debug, Default)]
pub struct Blocklist {
    config: BackoffConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Blocklist {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Record a failed dial and block the address. Returns the block time.
    pub fn record_failure(&self, address: &str) -> Duration {
        self.record_failure_at(address, Instant::now())
    }

    pub fn record_failure_at(&self, address: &str, now: Instant) -> Duration {
        let mut entries = self.entries.lock();
        let entry = entries.entry(address.to_string()).or_insert(Entry {
            attempts: 0,
            blocked_until: None,
        });
        entry.attempts = entry.attempts.saturating_add(1);
        let ttl = self.config.ttl_for(entry.attempts);
        entry.blocked_until = Some(now + ttl);
        ttl
    }

    /// Count a failure against a peer without blocking anything.
    pub fn record_peer_failure(&self, peer: &str) -> u32 {
        let mut entries = self.entries.lock();
        let entry = entries.entry(peer.to_string()).or_insert(Entry {
            attempts: 0,
            blocked_until: None,
        });
        entry.attempts = entry.attempts.saturating_add(1);
        entry.attempts
    }

    pub fn is_blocked(&self, address: &str) -> bool {
        self.is_blocked_at(address, Instant::now())
    }

    pub fn is_blocked_at(&self, address: &str, now: Instant) -> bool {
        self.entries
            .lock()
            .get(address)
            .and_then(|e| e.blocked_until)
            .is_some_and(|until| now < until)
    }

    /// Consecutive failures recorded for an address or peer.
    pub fn attempts(&self, address: &str) -> u32 {
        self.entries.lock().get(address).map_or(0, |e| e.attempts)
    }

    /// Forget an address or peer after a success.
    pub fn reset(&self, address: &str) {
        self.entries.lock().remove(address);
    }
}

/// Dial and delivery counters.
#[derive(Debug, Default)]
pub struct DialMetrics {
    dial_attempts: AtomicU64,
    dial_successes: AtomicU64,
    dial_failures: AtomicU64,
    blocked_skips: AtomicU64,
    relay_sends: AtomicU64,
    objects_sent: AtomicU64,
    objects_received: AtomicU64,
}

/// A point-in-time copy of [`DialMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dial_attempts: u64,
    pub dial_successes: u64,
    pub dial_failures: u64,
    pub blocked_skips: u64,
    pub relay_sends: u64,
    pub objects_sent: u64,
    pub objects_received: u64,
}

impl DialMetrics {
    pub fn dial_attempt(&self) {
        self.dial_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dial_success(&self) {
        self.dial_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocked_skip(&self) {
        self.blocked_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_send(&self) {
        self.relay_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_sent(&self) {
        self.objects_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn object_received(&self) {
        self.objects_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dial_attempts: self.dial_attempts.load(Ordering::Relaxed),
            dial_successes: self.dial_successes.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            blocked_skips: self.blocked_skips.load(Ordering::Relaxed),
            relay_sends: self.relay_sends.load(Ordering::Relaxed),
            objects_sent: self.objects_sent.load(Ordering::Relaxed),
            objects_received: self.objects_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(1),
            growth: 2.0,
            max: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_ttl_grows_and_caps() {
        let config = config();
        assert_eq!(config.ttl_for(1), Duration::from_secs(1));
        assert_eq!(config.ttl_for(2), Duration::from_secs(2));
        assert_eq!(config.ttl_for(3), Duration::from_secs(4));
        assert_eq!(config.ttl_for(4), Duration::from_secs(8));
        assert_eq!(config.ttl_for(5), Duration::from_secs(10));
        assert_eq!(config.ttl_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_failures_block_with_growing_ttl() {
        let blocklist = Blocklist::new(config());
        let now = Instant::now();

        assert_eq!(
            blocklist.record_failure_at("mem:x", now),
            Duration::from_secs(1)
        );
        assert!(blocklist.is_blocked_at("mem:x", now));
        assert!(!blocklist.is_blocked_at("mem:x", now + Duration::from_secs(1)));

        assert_eq!(
            blocklist.record_failure_at("mem:x", now),
            Duration::from_secs(2)
        );
        assert!(blocklist.is_blocked_at("mem:x", now + Duration::from_millis(1500)));
        assert_eq!(blocklist.attempts("mem:x"), 2);
    }

    #[test]
    fn test_reset_clears_entry() {
        let blocklist = Blocklist::new(config());
        blocklist.record_failure("mem:x");
        assert!(blocklist.is_blocked("mem:x"));
        blocklist.reset("mem:x");
        assert!(!blocklist.is_blocked("mem:x"));
        assert_eq!(blocklist.attempts("mem:x"), 0);
    }

    #[test]
    fn test_peer_failures_only_count() {
        let blocklist = Blocklist::new(config());
        assert_eq!(blocklist.record_peer_failure("peer:abc"), 1);
        assert_eq!(blocklist.record_peer_failure("peer:abc"), 2);
        assert!(!blocklist.is_blocked("peer:abc"));
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = DialMetrics::default();
        metrics.dial_attempt();
        metrics.dial_attempt();
        metrics.dial_failure();
        metrics.blocked_skip();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dial_attempts, 2);
        assert_eq!(snapshot.dial_failures, 1);
        assert_eq!(snapshot.blocked_skips, 1);
        assert_eq!(snapshot.dial_successes, 0);
    }
}
