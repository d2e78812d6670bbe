//! # Wire Protocol
//!
//! One JSON object per websocket text frame.
//!
//! Outbound: `{ "type", "request_id", "payload"? }` with `type` one of
//! `get_latest | get_before | subscribe_new | unsubscribe | ping`.
//!
//! Inbound: `{ "type", "request_id"?, "payload"? }` with `type` one of
//! `latest_data | history_data | new_message | subscription_confirmed |
//! unsubscription_confirmed | pong | error | connection_info`. Unknown types
//! decode to [`InboundType::Unknown`] instead of failing the frame.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::realtime::message_store::Message;

/// Generic text surfaced when a frame cannot be decoded.
pub const PARSE_ERROR_TEXT: &str = "Failed to parse server message";

/// Outbound frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Most recent window of messages.
    GetLatest,
    /// Messages older than a point in time.
    GetBefore,
    /// Enable push delivery of new messages.
    SubscribeNew,
    /// Disable push delivery.
    Unsubscribe,
    /// Keep-alive.
    Ping,
}

impl RequestType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::GetLatest => "get_latest",
            RequestType::GetBefore => "get_before",
            RequestType::SubscribeNew => "subscribe_new",
            RequestType::Unsubscribe => "unsubscribe",
            RequestType::Ping => "ping",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundType {
    /// Reply to `get_latest`.
    LatestData,
    /// Reply to `get_before`.
    HistoryData,
    /// Server push of a single new message.
    NewMessage,
    /// Reply to `subscribe_new`.
    SubscriptionConfirmed,
    /// Reply to `unsubscribe`.
    UnsubscriptionConfirmed,
    /// Reply to `ping`.
    Pong,
    /// Server-side failure; text in `payload.message` or `payload.error`.
    Error,
    /// Server metadata sent after the connection opens.
    ConnectionInfo,
    /// Anything this client does not know.
    #[serde(other)]
    Unknown,
}

/// Frame sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Frame type, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: RequestType,
    /// Correlation identifier; always present on outbound frames.
    pub request_id: String,
    /// Type-specific arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OutboundFrame {
    /// Encodes the frame as JSON text.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frame received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Frame type, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: InboundType,
    /// Echo of the outbound `request_id` for replies; absent on pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Type-specific body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl InboundFrame {
    /// Decodes one text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Human-readable error text of an `error` frame.
    pub fn error_text(&self) -> String {
        self.payload
            .as_ref()
            .and_then(|p| p.get("message").or_else(|| p.get("error")))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown server error".to_string())
    }

    /// The message carried by a `new_message` frame, either as the payload
    /// itself or nested under `payload.message`.
    pub fn pushed_message(&self) -> Result<Message, serde_json::Error> {
        let payload = self.payload.as_ref().unwrap_or(&Value::Null);
        let inner = match payload.get("message") {
            Some(nested) if nested.is_object() => nested,
            _ => payload,
        };
        Message::deserialize(inner)
    }

    /// The batch carried by `latest_data` / `history_data`, either under
    /// `payload.messages` or as a bare array. A missing payload is an empty batch.
    pub fn messages(&self) -> Result<Vec<Message>, serde_json::Error> {
        match &self.payload {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(list @ Value::Array(_)) => Vec::<Message>::deserialize(list),
            Some(p) => match p.get("messages") {
                Some(list) => Vec::<Message>::deserialize(list),
                None => Ok(Vec::new()),
            },
        }
    }

    /// `payload.has_more` of a `history_data` frame; false when absent.
    pub fn has_more(&self) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get("has_more").or_else(|| p.get("hasMore")))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
