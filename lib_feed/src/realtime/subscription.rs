//! # Subscription Manager
//!
//! Tracks whether new-message push is enabled on the current connection.
//!
//! `is_subscribed` only turns true on `subscription_confirmed` and turns false
//! on `unsubscription_confirmed` or any connection loss. Whether to send
//! `subscribe_new` after a (re)connect is decided here as well.

/// Subscription flags for one client.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    is_subscribed: bool,
    wants_subscription: bool,
    auto_subscribe: bool,
    resubscribe_on_reconnect: bool,
}

impl SubscriptionManager {
    /// `auto_subscribe` subscribes after every open; `resubscribe_on_reconnect`
    /// restores an explicit subscription after a reconnect.
    pub fn new(auto_subscribe: bool, resubscribe_on_reconnect: bool) -> Self {
        Self {
            is_subscribed: false,
            wants_subscription: false,
            auto_subscribe,
            resubscribe_on_reconnect,
        }
    }

    /// Confirmed by the server on the current connection.
    pub fn is_subscribed(&self) -> bool {
        self.is_subscribed
    }

    /// Whether to send `subscribe_new` right after the transport opened.
    pub fn should_subscribe_on_connect(&self) -> bool {
        if self.auto_subscribe {
            return true;
        }
        if self.wants_subscription {
            if self.resubscribe_on_reconnect {
                return true;
            }
            log::warn!("Subscription lost on reconnect; resubscribe is disabled");
        }
        false
    }

    /// The user called subscribe.
    pub fn subscribe_requested(&mut self) {
        self.wants_subscription = true;
    }

    /// The user called unsubscribe.
    pub fn unsubscribe_requested(&mut self) {
        self.wants_subscription = false;
    }

    /// `subscription_confirmed` arrived.
    pub fn confirm_subscribed(&mut self) {
        self.is_subscribed = true;
    }

    /// `unsubscription_confirmed` arrived.
    pub fn confirm_unsubscribed(&mut self) {
        self.is_subscribed = false;
    }

    /// The transport went away; server-side subscription state is gone.
    pub fn on_connection_lost(&mut self) {
        self.is_subscribed = false;
    }
}
