use clap::Parser;
use lib_feed::{FailoverConfig, RealtimeConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "feed_monitor.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Broadcast feed monitor", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FEED_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FEED_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FEED_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FEED_WS_URL", help = "Websocket URL of the feed server.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "FEED_BASE_URLS", value_delimiter = ',', help = "Comma separated REST base addresses, in preference order.")]
    pub base_urls: Option<Vec<String>>,

    #[clap(long, env = "FEED_PATH_PREFIX", help = "Path prefix joined between a base address and the request path.")]
    pub path_prefix: Option<String>,

    #[clap(long, env = "FEED_AUTO_SUBSCRIBE", help = "Subscribe to new messages after every connect (true/false).")]
    pub auto_subscribe: Option<bool>,

    #[clap(long, env = "FEED_LOAD_LATEST", help = "Load the latest messages after every connect (true/false).")]
    pub load_latest: Option<bool>,

    #[clap(long, env = "FEED_LATEST_LIMIT", help = "How many messages to load on connect.")]
    pub latest_limit: Option<usize>,

    #[clap(long, env = "FEED_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "FEED_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "FEED_MAX_RECONNECT_ATTEMPTS", help = "Reconnect attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "FEED_HEARTBEAT_INTERVAL_MS", help = "Interval in milliseconds between heartbeat pings.")]
    pub heartbeat_interval_ms: Option<u64>,

    #[clap(long, env = "FEED_REQUEST_TIMEOUT_MS", help = "Milliseconds before an unanswered request is discarded.")]
    pub request_timeout_ms: Option<u64>,

    #[clap(long, env = "FEED_MESSAGE_CAPACITY", help = "Maximum number of messages kept in memory.")]
    pub message_capacity: Option<usize>,

    #[clap(long, env = "FEED_ATTEMPT_TIMEOUT_MS", help = "Timeout in milliseconds of a single REST attempt.")]
    pub attempt_timeout_ms: Option<u64>,

    #[clap(long, help = "Perform one REST call against this path, print the body and exit.")]
    #[serde(skip)]
    pub fetch: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            ws_url: other.ws_url.or(self.ws_url),
            base_urls: other.base_urls.or(self.base_urls),
            path_prefix: other.path_prefix.or(self.path_prefix),
            auto_subscribe: other.auto_subscribe.or(self.auto_subscribe),
            load_latest: other.load_latest.or(self.load_latest),
            latest_limit: other.latest_limit.or(self.latest_limit),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            heartbeat_interval_ms: other.heartbeat_interval_ms.or(self.heartbeat_interval_ms),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            message_capacity: other.message_capacity.or(self.message_capacity),
            attempt_timeout_ms: other.attempt_timeout_ms.or(self.attempt_timeout_ms),
            fetch: other.fetch.or(self.fetch),
        }
    }

    pub fn defaults() -> Config {
        let realtime = RealtimeConfig::default();
        let failover = FailoverConfig::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ws_url: Some(realtime.ws_url),
            base_urls: Some(failover.base_urls),
            path_prefix: Some(failover.path_prefix),
            auto_subscribe: Some(realtime.auto_subscribe),
            load_latest: Some(realtime.load_latest_on_connect),
            latest_limit: Some(realtime.latest_limit),
            reconnect_base_delay_ms: Some(realtime.reconnect_base_interval_ms),
            reconnect_max_delay_ms: Some(realtime.reconnect_max_interval_ms),
            max_reconnect_attempts: Some(realtime.max_reconnect_attempts),
            heartbeat_interval_ms: Some(realtime.heartbeat_interval_ms),
            request_timeout_ms: Some(realtime.request_timeout_ms),
            message_capacity: Some(realtime.message_capacity),
            attempt_timeout_ms: Some(failover.attempt_timeout_ms),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Settings for the websocket client; unset fields keep library defaults.
    pub fn realtime_config(&self) -> RealtimeConfig {
        let defaults = RealtimeConfig::default();
        RealtimeConfig {
            ws_url: self.ws_url.clone().unwrap_or(defaults.ws_url),
            auto_subscribe: self.auto_subscribe.unwrap_or(defaults.auto_subscribe),
            load_latest_on_connect: self.load_latest.unwrap_or(defaults.load_latest_on_connect),
            latest_limit: self.latest_limit.unwrap_or(defaults.latest_limit),
            reconnect_base_interval_ms: self.reconnect_base_delay_ms.unwrap_or(defaults.reconnect_base_interval_ms),
            reconnect_max_interval_ms: self.reconnect_max_delay_ms.unwrap_or(defaults.reconnect_max_interval_ms),
            max_reconnect_attempts: self.max_reconnect_attempts.unwrap_or(defaults.max_reconnect_attempts),
            heartbeat_interval_ms: self.heartbeat_interval_ms.unwrap_or(defaults.heartbeat_interval_ms),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(defaults.request_timeout_ms),
            message_capacity: self.message_capacity.unwrap_or(defaults.message_capacity),
            ..defaults
        }
    }

    /// Settings for the REST failover client.
    pub fn failover_config(&self) -> FailoverConfig {
        let defaults = FailoverConfig::default();
        FailoverConfig {
            base_urls: self.base_urls.clone().unwrap_or(defaults.base_urls.clone()),
            path_prefix: self.path_prefix.clone().unwrap_or(defaults.path_prefix.clone()),
            attempt_timeout_ms: self.attempt_timeout_ms.unwrap_or(defaults.attempt_timeout_ms),
            ..defaults
        }
    }
}

/// Reads a JSON config file. Missing or unreadable files yield `None` with a log line.
fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }

    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults, then the config file, then environment/CLI values.
pub fn resolve_config(cli: Config) -> Config {
    // 1. Defaults
    let mut current_config = Config::defaults();

    // 2. Config file, path overridable from CLI/env
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    // 3. Environment variables and CLI arguments win
    current_config.merge(cli)
}

pub fn load_config() -> Config {
    resolve_config(Config::parse())
}
