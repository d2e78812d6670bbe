//! # Connection State Machine
//!
//! Pure state and transition rules for the persistent connection. The client
//! actor owns one instance and drives it with transport events; nothing here
//! touches the network or a timer.
//!
//! ```text
//! Disconnected | Error --connect()--> Connecting --open--> Connected
//! Connected --clean close--> Disconnected --(auto)--> Reconnecting
//! Connected --abnormal close / error--> Error --(auto)--> Reconnecting
//! Reconnecting --timer--> Connecting
//! any --disconnect()--> Disconnected (no reconnect)
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle of the persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// An open attempt is in flight.
    Connecting,
    /// The transport is open.
    Connected,
    /// Closed cleanly or by the user.
    #[default]
    Disconnected,
    /// Closed abnormally or failed to open.
    Error,
    /// Waiting for the reconnect timer.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `min(base * 2^attempt, cap)`, saturating.
pub fn reconnect_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 1u128.checked_shl(attempt).unwrap_or(u128::MAX);
    let millis = base.as_millis().saturating_mul(factor).min(cap.as_millis());
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// How the transport went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseKind {
    /// Close frame with a normal code.
    Clean,
    /// Anything else, with a description for the error text.
    Abnormal(String),
}

/// Outcome of [`ConnectionStateMachine::schedule_reconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Arm a timer for `delay`; this is reconnect number `attempt` (1-based).
    Schedule {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff before the attempt.
        delay: Duration,
    },
    /// The user disconnected; stay down.
    Manual,
    /// The cap is reached; stay in `Reconnecting` with no timer.
    Exhausted,
}

/// Connection lifecycle bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    base_interval: Duration,
    max_interval: Duration,
    manual_disconnect: bool,
}

impl ConnectionStateMachine {
    /// New machine in `Disconnected`.
    pub fn new(base_interval: Duration, max_interval: Duration, max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            base_interval,
            max_interval,
            manual_disconnect: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnects scheduled since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// User-requested connect. Returns `true` if an open attempt should start.
    ///
    /// A no-op while already connecting or connected. Otherwise clears the
    /// user-disconnect flag and the attempt counter, which also leaves an
    /// exhausted `Reconnecting` dead end.
    pub fn user_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => false,
            _ => {
                self.manual_disconnect = false;
                self.reconnect_attempts = 0;
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    /// The reconnect timer fired. Returns `true` if an open attempt should start.
    pub fn reconnect_timer_fired(&mut self) -> bool {
        if self.state != ConnectionState::Reconnecting || self.manual_disconnect {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// The transport opened.
    pub fn on_open(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
    }

    /// The transport closed.
    pub fn on_close(&mut self, kind: CloseKind) {
        match kind {
            CloseKind::Clean => {
                self.state = ConnectionState::Disconnected;
            }
            CloseKind::Abnormal(_) => {
                self.state = ConnectionState::Error;
            }
        }
    }

    /// An open attempt failed or the transport reported an error.
    pub fn on_transport_error(&mut self, description: impl Into<String>) {
        self.on_close(CloseKind::Abnormal(description.into()));
    }

    /// Decides whether to reconnect after a close or error.
    ///
    /// The backoff uses the attempt count before it is incremented, so the
    /// first reconnect waits `base`.
    pub fn schedule_reconnect(&mut self) -> ReconnectDecision {
        if self.manual_disconnect {
            return ReconnectDecision::Manual;
        }

        self.state = ConnectionState::Reconnecting;
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            return ReconnectDecision::Exhausted;
        }

        let delay = reconnect_delay(self.base_interval, self.reconnect_attempts, self.max_interval);
        self.reconnect_attempts += 1;
        ReconnectDecision::Schedule {
            attempt: self.reconnect_attempts,
            delay,
        }
    }

    /// User-requested teardown. Suppresses every automatic reconnect until
    /// the next [`user_connect`](Self::user_connect).
    pub fn disconnect(&mut self) {
        self.manual_disconnect = true;
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ConnectionStateMachine {
        ConnectionStateMachine::new(Duration::from_millis(3_000), Duration::from_millis(30_000), 10)
    }

    #[test]
    fn test_reconnect_delay_doubles_and_caps() {
        let base = Duration::from_millis(3_000);
        let cap = Duration::from_millis(30_000);
        let delays: Vec<u128> = (0..6).map(|a| reconnect_delay(base, a, cap).as_millis()).collect();
        assert_eq!(delays, vec![3_000, 6_000, 12_000, 24_000, 30_000, 30_000]);

        // Huge attempt numbers saturate rather than overflow.
        assert_eq!(reconnect_delay(base, 200, cap), cap);
    }

    #[test]
    fn test_open_and_abnormal_close_schedules_reconnect() {
        let mut m = machine();
        assert!(m.user_connect());
        assert_eq!(m.state(), ConnectionState::Connecting);
        m.on_open();
        assert_eq!(m.state(), ConnectionState::Connected);

        m.on_close(CloseKind::Abnormal("connection reset".into()));
        assert_eq!(m.state(), ConnectionState::Error);

        let decision = m.schedule_reconnect();
        assert_eq!(
            decision,
            ReconnectDecision::Schedule {
                attempt: 1,
                delay: Duration::from_millis(3_000)
            }
        );
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        assert!(m.reconnect_timer_fired());
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_clean_close_goes_disconnected_then_reconnects() {
        let mut m = machine();
        m.user_connect();
        m.on_open();
        m.on_close(CloseKind::Clean);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(matches!(m.schedule_reconnect(), ReconnectDecision::Schedule { .. }));
    }

    #[test]
    fn test_successive_failures_back_off_then_reset_on_open() {
        let mut m = machine();
        m.user_connect();

        let mut delays = Vec::new();
        for _ in 0..5 {
            m.on_transport_error("refused");
            if let ReconnectDecision::Schedule { delay, .. } = m.schedule_reconnect() {
                delays.push(delay.as_millis());
            }
            assert!(m.reconnect_timer_fired());
        }
        assert_eq!(delays, vec![3_000, 6_000, 12_000, 24_000, 30_000]);

        m.on_open();
        assert_eq!(m.reconnect_attempts(), 0);
        m.on_transport_error("reset");
        assert_eq!(
            m.schedule_reconnect(),
            ReconnectDecision::Schedule {
                attempt: 1,
                delay: Duration::from_millis(3_000)
            }
        );
    }

    #[test]
    fn test_cap_leaves_machine_reconnecting_without_timer() {
        let mut m = ConnectionStateMachine::new(Duration::from_millis(10), Duration::from_millis(100), 2);
        m.user_connect();

        for _ in 0..2 {
            m.on_transport_error("refused");
            assert!(matches!(m.schedule_reconnect(), ReconnectDecision::Schedule { .. }));
            assert!(m.reconnect_timer_fired());
        }
        m.on_transport_error("refused");
        assert_eq!(m.schedule_reconnect(), ReconnectDecision::Exhausted);
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        // A user connect escapes the dead end.
        assert!(m.user_connect());
        assert_eq!(m.reconnect_attempts(), 0);
    }

    #[test]
    fn test_manual_disconnect_suppresses_reconnect() {
        let mut m = machine();
        m.user_connect();
        m.on_open();
        m.disconnect();
        assert_eq!(m.state(), ConnectionState::Disconnected);

        // A close event racing the teardown must not re-arm anything.
        m.on_close(CloseKind::Clean);
        assert_eq!(m.schedule_reconnect(), ReconnectDecision::Manual);
        assert!(!m.reconnect_timer_fired());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_is_noop_while_active() {
        let mut m = machine();
        assert!(m.user_connect());
        assert!(!m.user_connect());
        m.on_open();
        assert!(!m.user_connect());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ConnectionState::Reconnecting).unwrap(), "\"reconnecting\"");
        assert_eq!(ConnectionState::default().to_string(), "disconnected");
    }
}
