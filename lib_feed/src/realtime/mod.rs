//! # Realtime Module
//!
//! The persistent websocket client for the broadcast feed.
//!
//! ## Components:
//! - **`connection`**: lifecycle states, reconnect backoff and the cap.
//! - **`correlator`**: `request_id` bookkeeping for request/reply pairs.
//! - **`subscription`**: the new-message push flag and resubscribe policy.
//! - **`message_store`**: bounded, deduplicated, most-recent-first window.
//! - **`protocol`**: typed JSON frames.
//! - **`client`**: the actor that owns all of the above, and its handle.
//!
//! ## Example:
//! ```no_run
//! use lib_feed::{RealtimeClient, RealtimeConfig, FeedEvent};
//!
//! # async fn demo() -> Result<(), lib_feed::FeedError> {
//! let client = RealtimeClient::start(RealtimeConfig::with_url("ws://localhost:8080/ws"))?;
//! let mut events = client.events();
//! client.connect()?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let FeedEvent::NewMessage(message) = event {
//!         println!("[{}] {}", message.category, message.content);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod correlator;
pub mod message_store;
pub mod protocol;
pub mod subscription;

pub use client::{ClientSnapshot, FeedEvent, RealtimeClient, ResponseHandler, SendOutcome};
pub use connection::{reconnect_delay, CloseKind, ConnectionState, ConnectionStateMachine, ReconnectDecision};
pub use correlator::{Correlator, PendingRequest};
pub use message_store::{Message, MessageStore};
pub use protocol::{InboundFrame, InboundType, OutboundFrame, RequestType};
pub use subscription::SubscriptionManager;
