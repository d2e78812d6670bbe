//! # Data Retrieval Module
//!
//! One-shot request/response calls that live outside the persistent
//! connection. Calls are spread over several candidate servers so a single
//! unreachable host does not take the dashboard down.
//!
//! ## Contained Modules:
//!
//! - **`endpoint_health`**: the per-address health table and the address
//!   selection rule.
//! - **`failover_http`**: the `FailoverClient`, a `reqwest` wrapper that
//!   retries across addresses with linear backoff and reports every outcome
//!   to the tracker.

/// Per-address health state and address selection.
pub mod endpoint_health;
/// Multi-endpoint HTTP client with linear-backoff failover.
pub mod failover_http;

pub use endpoint_health::{EndpointHealthTracker, EndpointStatus};
pub use failover_http::{ApiResponse, FailoverClient, RateLimitInfo, RequestOptions};
