//! # Request Correlator
//!
//! Pairs outbound requests with their replies by `request_id`.
//!
//! A handler is registered before its frame leaves the client, so a reply can
//! never arrive for an id that is not yet known. Each entry resolves at most
//! once: [`Correlator::take`] removes it, and a second reply with the same id
//! falls through to push handling. Entries older than the request timeout are
//! removed by [`Correlator::expire`] without their handler ever running.
//!
//! The handler type is generic so the actor can store its own reply actions
//! while tests use plain values.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::realtime::protocol::{InboundFrame, OutboundFrame, RequestType};

/// A sent request still waiting for its reply.
#[derive(Debug)]
pub struct PendingRequest<H> {
    /// Correlation id.
    pub request_id: String,
    /// Outbound type, kept for logging and timeout text.
    pub request_type: RequestType,
    /// When the frame was handed to the transport.
    pub sent_at: Instant,
    /// What to do with the reply.
    pub on_response: H,
}

impl<H> PendingRequest<H> {
    /// Text used when the entry expires.
    pub fn timeout_text(&self) -> String {
        format!("Request {} ({}) timed out", self.request_type, self.request_id)
    }
}

/// Pending request table keyed by `request_id`.
#[derive(Debug)]
pub struct Correlator<H> {
    pending: HashMap<String, PendingRequest<H>>,
}

impl<H> Default for Correlator<H> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<H> Correlator<H> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an outbound frame with a fresh id and, when a handler is given,
    /// registers it under that id before returning.
    pub fn prepare(
        &mut self,
        request_type: RequestType,
        payload: Option<Value>,
        on_response: Option<H>,
        now: Instant,
    ) -> OutboundFrame {
        let request_id = Uuid::new_v4().to_string();

        if let Some(on_response) = on_response {
            self.pending.insert(
                request_id.clone(),
                PendingRequest {
                    request_id: request_id.clone(),
                    request_type,
                    sent_at: now,
                    on_response,
                },
            );
        }

        OutboundFrame {
            kind: request_type,
            request_id,
            payload,
        }
    }

    /// Removes and returns the entry the frame answers, if any.
    ///
    /// `None` means the frame is a push (no id) or an unmatched reply.
    pub fn take(&mut self, frame: &InboundFrame) -> Option<PendingRequest<H>> {
        let id = frame.request_id.as_deref()?;
        self.pending.remove(id)
    }

    /// Drops one entry without resolving it, e.g. when its frame failed to send.
    pub fn remove(&mut self, request_id: &str) -> Option<PendingRequest<H>> {
        self.pending.remove(request_id)
    }

    /// Removes every entry sent at least `timeout` before `now`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<PendingRequest<H>> {
        let expired_ids: Vec<String> = self
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.sent_at) >= timeout)
            .map(|p| p.request_id.clone())
            .collect();

        let mut expired: Vec<PendingRequest<H>> = expired_ids
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();
        expired.sort_by_key(|p| p.sent_at);
        expired
    }

    /// Drops every entry unresolved. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// `true` when nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether `request_id` is outstanding.
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::protocol::InboundType;

    fn reply(id: Option<&str>) -> InboundFrame {
        InboundFrame {
            kind: InboundType::Pong,
            request_id: id.map(str::to_string),
            payload: None,
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let mut c: Correlator<()> = Correlator::new();
        let now = Instant::now();
        let a = c.prepare(RequestType::Ping, None, Some(()), now);
        let b = c.prepare(RequestType::Ping, None, Some(()), now);
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_registered_before_frame_is_returned() {
        let mut c: Correlator<&str> = Correlator::new();
        let frame = c.prepare(RequestType::GetLatest, None, Some("latest"), Instant::now());
        assert!(c.is_pending(&frame.request_id));
    }

    #[test]
    fn test_without_handler_nothing_is_registered() {
        let mut c: Correlator<()> = Correlator::new();
        let frame = c.prepare(RequestType::Ping, None, None, Instant::now());
        assert!(!c.is_pending(&frame.request_id));
        assert!(c.is_empty());
    }

    #[test]
    fn test_reply_resolves_exactly_once() {
        let mut c: Correlator<u32> = Correlator::new();
        let frame = c.prepare(RequestType::SubscribeNew, None, Some(7), Instant::now());

        let first = c.take(&reply(Some(&frame.request_id)));
        assert_eq!(first.map(|p| p.on_response), Some(7));

        // A duplicate reply is unmatched and goes to push handling.
        assert!(c.take(&reply(Some(&frame.request_id))).is_none());
    }

    #[test]
    fn test_pushes_and_unknown_ids_are_unmatched() {
        let mut c: Correlator<()> = Correlator::new();
        c.prepare(RequestType::Ping, None, Some(()), Instant::now());
        assert!(c.take(&reply(None)).is_none());
        assert!(c.take(&reply(Some("someone-else"))).is_none());
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_expire_removes_only_old_entries() {
        let mut c: Correlator<&str> = Correlator::new();
        let t0 = Instant::now();
        let old = c.prepare(RequestType::GetBefore, None, Some("old"), t0);
        let fresh = c.prepare(RequestType::Ping, None, Some("fresh"), t0 + Duration::from_secs(20));

        let expired = c.expire(t0 + Duration::from_secs(30), Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].request_id, old.request_id);
        assert_eq!(
            expired[0].timeout_text(),
            format!("Request get_before ({}) timed out", old.request_id)
        );
        assert!(c.is_pending(&fresh.request_id));

        // A late reply for the expired id is now unmatched.
        assert!(c.take(&reply(Some(&old.request_id))).is_none());
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut c: Correlator<()> = Correlator::new();
        let now = Instant::now();
        c.prepare(RequestType::Ping, None, Some(()), now);
        c.prepare(RequestType::GetLatest, None, Some(()), now);
        assert_eq!(c.clear(), 2);
        assert!(c.is_empty());
    }
}
