//! # Configuration Modules
//!
//! Settings for the realtime and failover clients. Every field has a default
//! so a partial JSON document deserializes cleanly; binaries layer their own
//! file/env/CLI sources on top and hand the result to the clients.

/// Realtime and failover client settings.
pub mod client_config;

pub use client_config::{FailoverConfig, RealtimeConfig};
