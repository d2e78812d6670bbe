//! # Endpoint Health Tracker
//!
//! Keeps one [`EndpointStatus`] per candidate base address and decides which
//! address the next request should go to.
//!
//! ## Rules:
//! - `mark_success` restores an address immediately: healthy, zero failures.
//! - `mark_failure` counts consecutive failures; reaching the threshold
//!   (3 by default) marks the address unhealthy.
//! - `pick_address` considers an address usable when it is healthy, or when it
//!   is unhealthy but has not been checked for `recheck_after` (60s by
//!   default). Among usable addresses the one with the fewest consecutive
//!   failures wins; ties go to configuration order. With nothing usable it
//!   falls back to the first configured address instead of failing.
//!
//! The table is owned by a single tracker instance that is injected into the
//! failover client. The mutex is only held for the duration of a method call.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::configs::FailoverConfig;

/// Health record for one candidate address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    /// Base address as configured.
    pub address: String,
    /// False once `consecutive_failures` reached the threshold.
    pub is_healthy: bool,
    /// When the address was last marked, or when the tracker was created.
    pub last_checked_at: Instant,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

impl EndpointStatus {
    fn new(address: String, now: Instant) -> Self {
        Self {
            address,
            is_healthy: true,
            last_checked_at: now,
            consecutive_failures: 0,
        }
    }

    fn is_usable(&self, now: Instant, recheck_after: Duration) -> bool {
        self.is_healthy || now.saturating_duration_since(self.last_checked_at) >= recheck_after
    }
}

/// Owner of the endpoint status table.
pub struct EndpointHealthTracker {
    endpoints: Mutex<Vec<EndpointStatus>>,
    failure_threshold: u32,
    recheck_after: Duration,
}

impl EndpointHealthTracker {
    /// Creates a tracker with every address healthy.
    pub fn new<I, S>(addresses: I, failure_threshold: u32, recheck_after: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Instant::now();
        let endpoints = addresses
            .into_iter()
            .map(|a| EndpointStatus::new(a.into(), now))
            .collect();
        Self {
            endpoints: Mutex::new(endpoints),
            failure_threshold: failure_threshold.max(1),
            recheck_after,
        }
    }

    /// Creates a tracker from the failover settings.
    pub fn from_config(config: &FailoverConfig) -> Self {
        Self::new(
            config.base_urls.iter().cloned(),
            config.failure_threshold,
            config.recheck_after(),
        )
    }

    /// Records a successful attempt against `address`.
    pub fn mark_success(&self, address: &str) {
        self.mark_success_at(address, Instant::now());
    }

    /// Records a network-level failure against `address`.
    pub fn mark_failure(&self, address: &str) {
        self.mark_failure_at(address, Instant::now());
    }

    /// Picks the address for the next attempt. `None` only when no address is configured.
    pub fn pick_address(&self) -> Option<String> {
        self.pick_address_excluding_at(&[], Instant::now())
    }

    /// Like [`pick_address`](Self::pick_address), but skips addresses already
    /// tried in the current call while an untried one remains.
    pub fn pick_address_excluding(&self, tried: &[String]) -> Option<String> {
        self.pick_address_excluding_at(tried, Instant::now())
    }

    /// Read-only copy of the status table, in configuration order.
    pub fn statuses(&self) -> Vec<EndpointStatus> {
        self.endpoints.lock().expect("Endpoint table lock poisoned").clone()
    }

    /// Number of addresses currently marked healthy.
    pub fn healthy_count(&self) -> usize {
        self.endpoints
            .lock()
            .expect("Endpoint table lock poisoned")
            .iter()
            .filter(|e| e.is_healthy)
            .count()
    }

    pub(crate) fn mark_success_at(&self, address: &str, now: Instant) {
        let mut endpoints = self.endpoints.lock().expect("Endpoint table lock poisoned");
        match endpoints.iter_mut().find(|e| e.address == address) {
            Some(entry) => {
                if !entry.is_healthy {
                    log::info!("Endpoint {} recovered after {} failures", address, entry.consecutive_failures);
                }
                entry.is_healthy = true;
                entry.consecutive_failures = 0;
                entry.last_checked_at = now;
            }
            None => log::warn!("mark_success for unknown endpoint {}", address),
        }
    }

    pub(crate) fn mark_failure_at(&self, address: &str, now: Instant) {
        let mut endpoints = self.endpoints.lock().expect("Endpoint table lock poisoned");
        match endpoints.iter_mut().find(|e| e.address == address) {
            Some(entry) => {
                entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
                entry.last_checked_at = now;
                if entry.is_healthy && entry.consecutive_failures >= self.failure_threshold {
                    entry.is_healthy = false;
                    log::warn!(
                        "Endpoint {} marked unhealthy after {} consecutive failures",
                        address,
                        entry.consecutive_failures
                    );
                }
            }
            None => log::warn!("mark_failure for unknown endpoint {}", address),
        }
    }

    pub(crate) fn pick_address_excluding_at(&self, tried: &[String], now: Instant) -> Option<String> {
        let endpoints = self.endpoints.lock().expect("Endpoint table lock poisoned");
        let first = endpoints.first()?.address.clone();

        // `min_by_key` keeps the first of equal keys, which is configuration order.
        let best = |skip_tried: bool| {
            endpoints
                .iter()
                .filter(|e| e.is_usable(now, self.recheck_after))
                .filter(|e| !skip_tried || !tried.contains(&e.address))
                .min_by_key(|e| e.consecutive_failures)
                .map(|e| e.address.clone())
        };

        Some(best(true).or_else(|| best(false)).unwrap_or(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> EndpointHealthTracker {
        EndpointHealthTracker::new(["http://a", "http://b", "http://c"], 3, Duration::from_secs(60))
    }

    fn status(t: &EndpointHealthTracker, address: &str) -> EndpointStatus {
        t.statuses().into_iter().find(|e| e.address == address).unwrap()
    }

    #[test]
    fn test_three_failures_mark_unhealthy_and_success_restores() {
        let t = tracker();
        t.mark_failure("http://a");
        t.mark_failure("http://a");
        assert!(status(&t, "http://a").is_healthy);

        t.mark_failure("http://a");
        let a = status(&t, "http://a");
        assert!(!a.is_healthy);
        assert_eq!(a.consecutive_failures, 3);
        assert_eq!(t.healthy_count(), 2);

        t.mark_success("http://a");
        let a = status(&t, "http://a");
        assert!(a.is_healthy);
        assert_eq!(a.consecutive_failures, 0);
    }

    #[test]
    fn test_pick_prefers_fewest_failures_then_config_order() {
        let t = tracker();
        assert_eq!(t.pick_address().as_deref(), Some("http://a"));

        t.mark_failure("http://a");
        assert_eq!(t.pick_address().as_deref(), Some("http://b"));

        t.mark_failure("http://b");
        t.mark_failure("http://c");
        // All at one failure: configuration order decides.
        assert_eq!(t.pick_address().as_deref(), Some("http://a"));
    }

    #[test]
    fn test_unhealthy_skipped_until_stale() {
        let t = EndpointHealthTracker::new(["http://a", "http://b"], 3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            t.mark_failure_at("http://a", start);
        }
        for _ in 0..2 {
            t.mark_failure_at("http://b", start);
        }

        // a is unhealthy and fresh, b is healthy with two failures.
        assert_eq!(t.pick_address_excluding_at(&[], start).as_deref(), Some("http://b"));

        // b goes unhealthy too: nothing usable, fall back to the first address.
        t.mark_failure_at("http://b", start);
        let soon = start + Duration::from_secs(10);
        assert_eq!(t.pick_address_excluding_at(&[], soon).as_deref(), Some("http://a"));

        // After the recheck window both are eligible again; a was checked
        // earlier but ties on failures, so configuration order applies.
        let later = start + Duration::from_secs(61);
        assert_eq!(t.pick_address_excluding_at(&[], later).as_deref(), Some("http://a"));
    }

    #[test]
    fn test_excluding_returns_untried_address() {
        let t = tracker();
        let tried = vec!["http://a".to_string(), "http://b".to_string()];
        assert_eq!(t.pick_address_excluding(&tried).as_deref(), Some("http://c"));

        let all: Vec<String> = ["http://a", "http://b", "http://c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(t.pick_address_excluding(&all).as_deref(), Some("http://a"));
    }

    #[test]
    fn test_empty_tracker_picks_nothing() {
        let t = EndpointHealthTracker::new(Vec::<String>::new(), 3, Duration::from_secs(60));
        assert_eq!(t.pick_address(), None);
    }

    #[test]
    fn test_unknown_address_is_ignored() {
        let t = tracker();
        t.mark_failure("http://nope");
        assert_eq!(t.healthy_count(), 3);
    }
}
