//! # Error Taxonomy
//!
//! Two enums cover the two halves of the crate:
//!
//! - [`FeedError`] for the realtime client. Transport and protocol failures
//!   never escape the connection actor; they surface as state and error text.
//!   The variants here are what awaiting callers and config validation see.
//! - [`FailoverError`] for the REST failover client. Endpoint exhaustion is
//!   the one failure the core hands back to its caller, and rate limiting is
//!   kept distinct so a caller can show "try again in N seconds".

use thiserror::Error;

#[cfg(feature = "retrieve")]
use crate::retrieve::failover_http::RateLimitInfo;

/// Errors produced by the realtime client and its configuration.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection refused, abnormal close, or a failed write.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with an `error` frame.
    #[error("Server error: {0}")]
    Protocol(String),

    /// A request was attempted while the transport was not open.
    #[error("Not connected")]
    NotConnected,

    /// No reply arrived for a correlated request within the request timeout.
    #[error("Request {request_type} ({request_id}) timed out")]
    RequestTimeout {
        /// Outbound frame type, e.g. `get_latest`.
        request_type: String,
        /// The correlation identifier that never got a reply.
        request_id: String,
    },

    /// The connection was torn down before the reply arrived.
    #[error("Request {0} was dropped before a response arrived")]
    RequestDropped(String),

    /// The client actor has stopped and no longer accepts commands.
    #[error("Realtime client is closed")]
    ClientClosed,

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors produced by the failover HTTP client.
#[cfg(feature = "retrieve")]
#[derive(Debug, Error)]
pub enum FailoverError {
    /// A network-level failure against one address: timeout, refused
    /// connection, DNS failure. HTTP error statuses are not network failures.
    #[error("Network failure against {address}: {source}")]
    Network {
        /// Base address the attempt was made against.
        address: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered 429. Terminal for the call, never a failover trigger.
    #[error("Rate limited, retry after {}s", .0.retry_after_secs)]
    RateLimited(RateLimitInfo),

    /// Every attempt failed; `last` is the final error encountered.
    #[error("All {attempts} attempts failed: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error encountered.
        #[source]
        last: Box<FailoverError>,
    },

    /// A configured base address or request path could not form a URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A request body could not be serialized or a response body decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client was built with an empty address list.
    #[error("No endpoints configured")]
    NoEndpoints,

    /// Invalid failover configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(feature = "retrieve")]
impl FailoverError {
    /// True when this error (or the last error of an exhausted run) is a
    /// rate-limit response rather than a reachability failure.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            FailoverError::RateLimited(_) => true,
            FailoverError::Exhausted { last, .. } => last.is_rate_limited(),
            _ => false,
        }
    }

    /// Seconds the caller should wait before retrying, when rate limited.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            FailoverError::RateLimited(info) => Some(info.retry_after_secs),
            FailoverError::Exhausted { last, .. } => last.retry_after_secs(),
            _ => None,
        }
    }
}
