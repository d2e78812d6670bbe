use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
#[cfg(feature = "retrieve")]
use crate::error::FailoverError;

/// Settings for the persistent websocket client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    /// Websocket address of the feed server (`ws://` or `wss://`).
    pub ws_url: String,
    /// Send `subscribe_new` every time the connection reaches `Connected`.
    pub auto_subscribe: bool,
    /// Re-send `subscribe_new` after a reconnect when the user had subscribed
    /// explicitly, even if `auto_subscribe` is off.
    pub resubscribe_on_reconnect: bool,
    /// Request the latest window with `get_latest` after each successful open.
    pub load_latest_on_connect: bool,
    /// How many messages `get_latest` asks for.
    pub latest_limit: usize,
    /// Base interval of the exponential reconnect backoff.
    pub reconnect_base_interval_ms: u64,
    /// Upper bound of the reconnect backoff.
    pub reconnect_max_interval_ms: u64,
    /// Reconnect attempts allowed before giving up.
    pub max_reconnect_attempts: u32,
    /// Interval between `ping` frames while connected.
    pub heartbeat_interval_ms: u64,
    /// Bound on a single open attempt.
    pub connect_timeout_ms: u64,
    /// Age after which an unanswered correlated request is discarded.
    pub request_timeout_ms: u64,
    /// How often pending requests are checked for expiry.
    pub request_sweep_interval_ms: u64,
    /// Maximum number of messages kept in the window.
    pub message_capacity: usize,
    /// How long a freshly pushed message keeps its "new" marker.
    pub new_marker_ttl_ms: u64,
    /// How often expired "new" markers are cleared.
    pub new_marker_sweep_interval_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/ws".to_string(),
            auto_subscribe: true,
            resubscribe_on_reconnect: true,
            load_latest_on_connect: true,
            latest_limit: 100,
            reconnect_base_interval_ms: 3_000,
            reconnect_max_interval_ms: 30_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            request_sweep_interval_ms: 5_000,
            message_capacity: 1_000,
            new_marker_ttl_ms: 5_000,
            new_marker_sweep_interval_ms: 2_000,
        }
    }
}

impl RealtimeConfig {
    /// Creates a default configuration pointed at `ws_url`.
    pub fn with_url(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    /// Rejects values the client cannot run with.
    pub fn validate(&self) -> Result<(), FeedError> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(FeedError::Config(format!(
                "wsUrl must start with ws:// or wss://, got '{}'",
                self.ws_url
            )));
        }
        if self.message_capacity == 0 {
            return Err(FeedError::Config("messageCapacity must be at least 1".to_string()));
        }
        let intervals = [
            ("reconnectBaseIntervalMs", self.reconnect_base_interval_ms),
            ("heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("requestSweepIntervalMs", self.request_sweep_interval_ms),
            ("newMarkerSweepIntervalMs", self.new_marker_sweep_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(FeedError::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }

    /// `reconnect_base_interval` as a [`Duration`].
    pub fn reconnect_base_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_interval_ms)
    }

    /// `reconnect_max_interval` as a [`Duration`].
    pub fn reconnect_max_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_interval_ms)
    }

    /// `heartbeat_interval` as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// `connect_timeout` as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `request_timeout` as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `request_sweep_interval` as a [`Duration`].
    pub fn request_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.request_sweep_interval_ms)
    }

    /// `new_marker_ttl` as a [`Duration`].
    pub fn new_marker_ttl(&self) -> Duration {
        Duration::from_millis(self.new_marker_ttl_ms)
    }

    /// `new_marker_sweep_interval` as a [`Duration`].
    pub fn new_marker_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.new_marker_sweep_interval_ms)
    }
}

/// Settings for the multi-endpoint failover client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailoverConfig {
    /// Candidate base addresses, in preference order.
    pub base_urls: Vec<String>,
    /// Path prefix joined between the base address and the request path.
    pub path_prefix: String,
    /// Attempts per call.
    pub max_attempts: u32,
    /// Timeout of a single attempt.
    pub attempt_timeout_ms: u64,
    /// Linear backoff unit: attempt `n` (1-based) waits `n * unit` before the next.
    pub retry_backoff_unit_ms: u64,
    /// Consecutive failures after which an address is marked unhealthy.
    pub failure_threshold: u32,
    /// Seconds after which an unhealthy address becomes eligible again.
    pub recheck_after_secs: u64,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            base_urls: vec!["http://localhost:8080".to_string()],
            path_prefix: "/api".to_string(),
            max_attempts: 3,
            attempt_timeout_ms: 10_000,
            retry_backoff_unit_ms: 1_000,
            failure_threshold: 3,
            recheck_after_secs: 60,
            user_agent: "lib_feed/0.1".to_string(),
        }
    }
}

impl FailoverConfig {
    /// Creates a default configuration over the given addresses.
    pub fn with_base_urls<I, S>(base_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_urls: base_urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Rejects values the failover client cannot run with.
    ///
    /// # Errors
    /// [`FailoverError::NoEndpoints`] for an empty address list,
    /// [`FailoverError::Config`] for a zero attempt count or failure threshold.
    #[cfg(feature = "retrieve")]
    pub fn validate(&self) -> Result<(), FailoverError> {
        if self.base_urls.is_empty() {
            return Err(FailoverError::NoEndpoints);
        }
        if self.max_attempts == 0 {
            return Err(FailoverError::Config("maxAttempts must be at least 1".to_string()));
        }
        if self.failure_threshold == 0 {
            return Err(FailoverError::Config("failureThreshold must be at least 1".to_string()));
        }
        Ok(())
    }

    /// `attempt_timeout` as a [`Duration`].
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// `retry_backoff_unit` as a [`Duration`].
    pub fn retry_backoff_unit(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_unit_ms)
    }

    /// `recheck_after` as a [`Duration`].
    pub fn recheck_after(&self) -> Duration {
        Duration::from_secs(self.recheck_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: RealtimeConfig =
            serde_json::from_str(r#"{"wsUrl":"wss://feed.example/ws","autoSubscribe":false}"#).unwrap();

        assert_eq!(cfg.ws_url, "wss://feed.example/ws");
        assert!(!cfg.auto_subscribe);
        assert_eq!(cfg.message_capacity, 1_000);
        assert_eq!(cfg.reconnect_base_interval(), Duration::from_millis(3_000));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_http_scheme() {
        let cfg = RealtimeConfig::with_url("http://feed.example/ws");
        assert!(matches!(cfg.validate(), Err(FeedError::Config(_))));
    }

    #[cfg(feature = "retrieve")]
    #[test]
    fn test_failover_defaults_and_validation() {
        let cfg = FailoverConfig::with_base_urls(["http://a", "http://b"]);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.attempt_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.recheck_after(), Duration::from_secs(60));
        assert!(cfg.validate().is_ok());

        let empty = FailoverConfig::with_base_urls(Vec::<String>::new());
        assert!(matches!(empty.validate(), Err(FailoverError::NoEndpoints)));

        let no_attempts = FailoverConfig {
            max_attempts: 0,
            ..cfg.clone()
        };
        assert!(matches!(no_attempts.validate(), Err(FailoverError::Config(_))));

        let no_threshold = FailoverConfig {
            failure_threshold: 0,
            ..cfg
        };
        assert!(matches!(no_threshold.validate(), Err(FailoverError::Config(_))));
    }
}
