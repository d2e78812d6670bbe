//! # lib_feed
//!
//! The resilience layer behind the broadcast feed dashboard. Everything the
//! presentation side shows (the live message list, connection badge, error
//! banner) is read from the types in this crate; nothing here renders.
//!
//! ## Modules (feature gated):
//!
//! - **`configs`**: serde-backed settings with defaults for both clients.
//! - **`realtime`**: the persistent websocket client. One actor task owns the
//!   connection state machine, the request correlator, the subscription flag
//!   and the bounded message window, and publishes read-only snapshots.
//! - **`retrieve`**: the multi-endpoint HTTP client that tracks endpoint
//!   health and fails over between candidate servers.
//! - **`error`**: the error taxonomy shared by both halves.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Error types for the realtime and failover clients.
pub mod error;

/// Settings for the realtime and failover clients.
#[cfg(feature = "configs")]
pub mod configs;

/// Persistent websocket client and its components.
#[cfg(feature = "realtime")]
pub mod realtime;

/// Multi-endpoint HTTP client with health tracking.
#[cfg(feature = "retrieve")]
pub mod retrieve;

// --- Public API Re-exports ---
pub use error::FeedError;
#[cfg(feature = "retrieve")]
pub use error::FailoverError;

#[cfg(feature = "configs")]
pub use configs::{FailoverConfig, RealtimeConfig};

#[cfg(feature = "realtime")]
pub use realtime::{ClientSnapshot, ConnectionState, FeedEvent, Message, RealtimeClient};

#[cfg(feature = "retrieve")]
pub use retrieve::{ApiResponse, EndpointHealthTracker, FailoverClient, RequestOptions};
