//! # Realtime Client
//!
//! The persistent-connection client as an actor.
//!
//! One spawned task owns the websocket halves, the [`ConnectionStateMachine`],
//! the [`Correlator`], the [`SubscriptionManager`], the [`MessageStore`] and
//! every timer. It reacts to commands, frames and timers from a single
//! `tokio::select!` loop, so inbound frames are handled strictly in delivery
//! order and internal state needs no locks.
//!
//! Collaborators hold a cloneable [`RealtimeClient`] handle:
//! - commands go over an unbounded `mpsc` channel,
//! - state is read from a `watch` [`ClientSnapshot`],
//! - [`FeedEvent`]s are fanned out on a `broadcast` channel.
//!
//! Dropping every handle stops the actor.

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::configs::RealtimeConfig;
use crate::error::FeedError;
use crate::realtime::connection::{
    CloseKind, ConnectionState, ConnectionStateMachine, ReconnectDecision,
};
use crate::realtime::correlator::Correlator;
use crate::realtime::message_store::{Message, MessageStore};
use crate::realtime::protocol::{InboundFrame, InboundType, RequestType, PARSE_ERROR_TEXT};
use crate::realtime::subscription::SubscriptionManager;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;
type OpenFuture = Pin<Box<dyn Future<Output = Result<WsStream, FeedError>> + Send>>;

/// Caller-supplied reply handler. Runs on the actor task, so keep it short.
pub type ResponseHandler = Box<dyn FnOnce(InboundFrame) + Send>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Read-only view of the client published after every change.
#[derive(Debug, Clone, Default)]
pub struct ClientSnapshot {
    /// Current connection state.
    pub connection_state: ConnectionState,
    /// Server confirmed new-message push on the current connection.
    pub is_subscribed: bool,
    /// Last error text, cleared on a successful open.
    pub error: Option<String>,
    /// Message window, most recent first.
    pub messages: Arc<Vec<Message>>,
    /// Payload of the last `connection_info` frame.
    pub server_info: Option<Value>,
    /// Reconnects scheduled since the last successful open.
    pub reconnect_attempts: u32,
    /// The last `history_data` reply said older messages remain.
    pub has_more_history: bool,
}

impl ClientSnapshot {
    fn same_as(&self, other: &ClientSnapshot) -> bool {
        self.connection_state == other.connection_state
            && self.is_subscribed == other.is_subscribed
            && self.error == other.error
            && Arc::ptr_eq(&self.messages, &other.messages)
            && self.server_info == other.server_info
            && self.reconnect_attempts == other.reconnect_attempts
            && self.has_more_history == other.has_more_history
    }
}

/// Notifications fanned out to every subscriber.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A pushed message was stored for the first time.
    NewMessage(Message),
    /// New error text was set.
    Error(String),
    /// The server sent `connection_info`.
    ConnectionInfo(Value),
}

/// Result of handing a request to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was written under this correlation id.
    Sent {
        /// Correlation id of the frame.
        request_id: String,
    },
    /// The transport was not open; nothing was sent or queued.
    NotConnected,
    /// Writing failed; the connection is being torn down.
    Failed(String),
}

enum ReplyAction {
    /// Handled by the client itself, by reply type.
    Internal,
    Caller(oneshot::Sender<InboundFrame>),
    Callback(ResponseHandler),
}

enum Command {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    LoadLatest {
        limit: usize,
    },
    LoadHistory {
        before: Option<DateTime<Utc>>,
        limit: usize,
    },
    ClearMessages,
    Send {
        request_type: RequestType,
        payload: Option<Value>,
        action: Option<ReplyAction>,
        outcome: oneshot::Sender<SendOutcome>,
    },
    Shutdown,
}

/// Handle to the realtime client actor.
#[derive(Clone)]
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ClientSnapshot>,
    events: broadcast::Sender<FeedEvent>,
    request_timeout: Duration,
    latest_limit: usize,
}

impl RealtimeClient {
    /// Validates `config` and spawns the actor. Must be called inside a tokio
    /// runtime. The client starts `Disconnected`; call [`connect`](Self::connect).
    pub fn start(config: RealtimeConfig) -> Result<Self, FeedError> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ClientSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let handle = Self {
            commands: cmd_tx,
            snapshot: snapshot_rx,
            events: events_tx.clone(),
            request_timeout: config.request_timeout(),
            latest_limit: config.latest_limit,
        };

        let actor = ClientActor::new(config, snapshot_tx, events_tx);
        tokio::spawn(actor.run(cmd_rx));

        Ok(handle)
    }

    fn dispatch(&self, command: Command) -> Result<(), FeedError> {
        self.commands.send(command).map_err(|_| FeedError::ClientClosed)
    }

    /// Opens the connection. No-op while connecting or connected.
    pub fn connect(&self) -> Result<(), FeedError> {
        self.dispatch(Command::Connect)
    }

    /// Closes the connection and suppresses automatic reconnects.
    pub fn disconnect(&self) -> Result<(), FeedError> {
        self.dispatch(Command::Disconnect)
    }

    /// Asks the server to push new messages.
    pub fn subscribe_to_new_messages(&self) -> Result<(), FeedError> {
        self.dispatch(Command::Subscribe)
    }

    /// Stops push delivery; the connection stays open.
    pub fn unsubscribe(&self) -> Result<(), FeedError> {
        self.dispatch(Command::Unsubscribe)
    }

    /// Replaces the message window with the server's most recent messages.
    pub fn load_latest_messages(&self) -> Result<(), FeedError> {
        self.dispatch(Command::LoadLatest {
            limit: self.latest_limit,
        })
    }

    /// Appends messages older than `before`, or older than the oldest stored
    /// message when `before` is `None`.
    pub fn load_older_messages(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<(), FeedError> {
        self.dispatch(Command::LoadHistory { before, limit })
    }

    /// Empties the message window.
    pub fn clear_messages(&self) -> Result<(), FeedError> {
        self.dispatch(Command::ClearMessages)
    }

    /// Sends one frame, registering `on_response` for its reply first.
    ///
    /// While the transport is not open this is a logged no-op returning
    /// [`SendOutcome::NotConnected`]. The handler runs at most once and never
    /// if the connection drops or the request times out.
    pub async fn send(
        &self,
        request_type: RequestType,
        payload: Option<Value>,
        on_response: Option<ResponseHandler>,
    ) -> Result<SendOutcome, FeedError> {
        self.send_with(request_type, payload, on_response.map(ReplyAction::Callback))
            .await
    }

    async fn send_with(
        &self,
        request_type: RequestType,
        payload: Option<Value>,
        action: Option<ReplyAction>,
    ) -> Result<SendOutcome, FeedError> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        self.dispatch(Command::Send {
            request_type,
            payload,
            action,
            outcome: outcome_tx,
        })?;
        outcome_rx.await.map_err(|_| FeedError::ClientClosed)
    }

    /// Sends one frame and awaits its reply, bounded by the request timeout.
    ///
    /// An `error` reply becomes [`FeedError::Protocol`].
    pub async fn request(
        &self,
        request_type: RequestType,
        payload: Option<Value>,
    ) -> Result<InboundFrame, FeedError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request_id = match self
            .send_with(request_type, payload, Some(ReplyAction::Caller(reply_tx)))
            .await?
        {
            SendOutcome::Sent { request_id } => request_id,
            SendOutcome::NotConnected => return Err(FeedError::NotConnected),
            SendOutcome::Failed(reason) => return Err(FeedError::Transport(reason)),
        };

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(frame)) if frame.kind == InboundType::Error => {
                Err(FeedError::Protocol(frame.error_text()))
            }
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(FeedError::RequestDropped(request_id)),
            Err(_) => Err(FeedError::RequestTimeout {
                request_type: request_type.to_string(),
                request_id,
            }),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ClientSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.snapshot.borrow().connection_state
    }

    /// Message window, most recent first.
    pub fn messages(&self) -> Arc<Vec<Message>> {
        Arc::clone(&self.snapshot.borrow().messages)
    }

    /// Server confirmed push delivery on the current connection.
    pub fn is_subscribed(&self) -> bool {
        self.snapshot.borrow().is_subscribed
    }

    /// Last error text.
    pub fn error(&self) -> Option<String> {
        self.snapshot.borrow().error.clone()
    }

    /// A receiver that is notified whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<ClientSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribes to [`FeedEvent`]s from now on.
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Waits until a snapshot satisfies `predicate` and returns it.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ClientSnapshot, FeedError>
    where
        F: FnMut(&ClientSnapshot) -> bool,
    {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| FeedError::ClientClosed)?;
        Ok(snapshot.clone())
    }

    /// Disconnects and stops the actor. Other handles become unusable.
    pub fn shutdown(&self) -> Result<(), FeedError> {
        self.dispatch(Command::Shutdown)
    }
}

struct ClientActor {
    config: RealtimeConfig,
    machine: ConnectionStateMachine,
    correlator: Correlator<ReplyAction>,
    subscription: SubscriptionManager,
    store: MessageStore,
    error: Option<String>,
    server_info: Option<Value>,
    has_more_history: bool,

    writer: Option<WsSink>,
    reader: Option<WsSource>,
    pending_open: Option<OpenFuture>,
    reconnect_at: Option<Instant>,
    heartbeat: Option<Interval>,

    snapshot_tx: watch::Sender<ClientSnapshot>,
    events_tx: broadcast::Sender<FeedEvent>,
    published_state: ConnectionState,
    published_revision: Option<u64>,
    published_messages: Arc<Vec<Message>>,
}

impl ClientActor {
    fn new(
        config: RealtimeConfig,
        snapshot_tx: watch::Sender<ClientSnapshot>,
        events_tx: broadcast::Sender<FeedEvent>,
    ) -> Self {
        let machine = ConnectionStateMachine::new(
            config.reconnect_base_interval(),
            config.reconnect_max_interval(),
            config.max_reconnect_attempts,
        );
        let subscription =
            SubscriptionManager::new(config.auto_subscribe, config.resubscribe_on_reconnect);
        let store = MessageStore::new(config.message_capacity, config.new_marker_ttl());

        Self {
            config,
            machine,
            correlator: Correlator::new(),
            subscription,
            store,
            error: None,
            server_info: None,
            has_more_history: false,
            writer: None,
            reader: None,
            pending_open: None,
            reconnect_at: None,
            heartbeat: None,
            snapshot_tx,
            events_tx,
            published_state: ConnectionState::Disconnected,
            published_revision: None,
            published_messages: Arc::new(Vec::new()),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut marker_sweep = interval(self.config.new_marker_sweep_interval());
        marker_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut request_sweep = interval(self.config.request_sweep_interval());
        request_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!("Realtime client actor started for {}", self.config.ws_url);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.disconnect().await;
                        self.publish();
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                item = next_frame(&mut self.reader) => self.handle_transport(item).await,
                opened = open_result(&mut self.pending_open) => self.handle_open(opened).await,
                _ = reconnect_deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    if self.machine.reconnect_timer_fired() {
                        self.start_open();
                    }
                }
                _ = heartbeat_tick(&mut self.heartbeat) => {
                    log::trace!("Sending heartbeat");
                    self.send_request(RequestType::Ping, None, Some(ReplyAction::Internal)).await;
                }
                _ = marker_sweep.tick() => {
                    let cleared = self.store.sweep_new_markers();
                    if cleared > 0 {
                        log::trace!("Cleared {} new-message markers", cleared);
                    }
                }
                _ = request_sweep.tick() => self.expire_requests(),
            }

            self.publish();
        }

        log::debug!("Realtime client actor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.machine.user_connect() {
                    self.reconnect_at = None;
                    self.start_open();
                } else {
                    log::debug!("Connect ignored while {}", self.machine.state());
                }
            }
            Command::Disconnect => self.disconnect().await,
            Command::Subscribe => {
                self.subscription.subscribe_requested();
                self.send_request(RequestType::SubscribeNew, None, Some(ReplyAction::Internal))
                    .await;
            }
            Command::Unsubscribe => {
                self.subscription.unsubscribe_requested();
                self.send_request(RequestType::Unsubscribe, None, Some(ReplyAction::Internal))
                    .await;
            }
            Command::LoadLatest { limit } => self.load_latest(limit).await,
            Command::LoadHistory { before, limit } => {
                let anchor = before.or_else(|| self.store.oldest().map(|m| m.timestamp));
                match anchor {
                    Some(before) => {
                        let payload = json!({ "before": before.to_rfc3339(), "limit": limit });
                        self.send_request(
                            RequestType::GetBefore,
                            Some(payload),
                            Some(ReplyAction::Internal),
                        )
                        .await;
                    }
                    None => {
                        log::debug!("No stored messages to page from; loading latest instead");
                        self.load_latest(limit).await;
                    }
                }
            }
            Command::ClearMessages => self.store.clear(),
            Command::Send {
                request_type,
                payload,
                action,
                outcome,
            } => {
                let result = self.send_request(request_type, payload, action).await;
                let _ = outcome.send(result);
            }
            Command::Shutdown => {}
        }
    }

    async fn load_latest(&mut self, limit: usize) {
        let payload = json!({ "limit": limit });
        self.send_request(RequestType::GetLatest, Some(payload), Some(ReplyAction::Internal))
            .await;
    }

    /// Registers `action` and writes the frame. Never queues.
    async fn send_request(
        &mut self,
        request_type: RequestType,
        payload: Option<Value>,
        action: Option<ReplyAction>,
    ) -> SendOutcome {
        if self.machine.state() != ConnectionState::Connected || self.writer.is_none() {
            log::warn!("Cannot send {}: not connected", request_type);
            return SendOutcome::NotConnected;
        }

        let frame = self
            .correlator
            .prepare(request_type, payload, action, std::time::Instant::now());
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {} frame: {}", request_type, e);
                self.correlator.remove(&frame.request_id);
                return SendOutcome::Failed(e.to_string());
            }
        };

        log::debug!("Sending {} ({})", request_type, frame.request_id);
        let written = match self.writer.as_mut() {
            Some(writer) => writer.send(WsMessage::Text(text.into())).await,
            None => return SendOutcome::NotConnected,
        };

        match written {
            Ok(()) => SendOutcome::Sent {
                request_id: frame.request_id,
            },
            Err(e) => {
                let reason = format!("Failed to send {}: {}", request_type, e);
                log::error!("{}", reason);
                self.connection_lost(CloseKind::Abnormal(reason.clone()));
                SendOutcome::Failed(reason)
            }
        }
    }

    fn start_open(&mut self) {
        let url = self.config.ws_url.clone();
        let timeout = self.config.connect_timeout();
        log::info!("Connecting to {}", url);

        self.pending_open = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(e)) => Err(FeedError::Transport(format!(
                    "Failed to connect to {}: {}",
                    url, e
                ))),
                Err(_) => Err(FeedError::Transport(format!(
                    "Connection to {} timed out after {:?}",
                    url, timeout
                ))),
            }
        }));
    }

    async fn handle_open(&mut self, opened: Result<WsStream, FeedError>) {
        self.pending_open = None;

        if self.machine.state() != ConnectionState::Connecting {
            log::debug!("Discarding open result while {}", self.machine.state());
            return;
        }

        match opened {
            Ok(stream) => {
                let (writer, reader) = stream.split();
                self.writer = Some(writer);
                self.reader = Some(reader);
                self.machine.on_open();
                self.error = None;

                let period = self.config.heartbeat_interval();
                let mut heartbeat = interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);

                log::info!("Connected to {}", self.config.ws_url);
                self.publish();

                if self.subscription.should_subscribe_on_connect() {
                    self.send_request(RequestType::SubscribeNew, None, Some(ReplyAction::Internal))
                        .await;
                }
                if self.config.load_latest_on_connect && self.machine.state() == ConnectionState::Connected {
                    self.load_latest(self.config.latest_limit).await;
                }
            }
            Err(e) => {
                let description = match e {
                    FeedError::Transport(description) => description,
                    other => other.to_string(),
                };
                log::error!("{}", description);
                self.set_error(description.clone());
                self.machine.on_transport_error(description);
                self.publish();
                self.schedule_reconnect();
            }
        }
    }

    async fn handle_transport(
        &mut self,
        item: Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
    ) {
        match item {
            Some(Ok(WsMessage::Text(text))) => self.handle_text(text.as_str()),
            Some(Ok(WsMessage::Binary(data))) => {
                log::warn!("Ignoring binary frame of {} bytes", data.len());
            }
            Some(Ok(WsMessage::Close(frame))) => {
                let kind = match frame {
                    None => CloseKind::Clean,
                    Some(CloseFrame { code, .. }) if code == CloseCode::Normal => CloseKind::Clean,
                    Some(CloseFrame { code, reason }) => CloseKind::Abnormal(format!(
                        "Connection closed with code {}: {}",
                        u16::from(code),
                        reason.as_str()
                    )),
                };
                self.connection_lost(kind);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::error!("Transport error: {}", e);
                self.connection_lost(CloseKind::Abnormal(e.to_string()));
            }
            None => {
                self.connection_lost(CloseKind::Abnormal("Connection closed unexpectedly".to_string()));
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        log::trace!("Received: {}", text);

        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("{}: {}", PARSE_ERROR_TEXT, e);
                self.set_error(PARSE_ERROR_TEXT.to_string());
                return;
            }
        };

        match self.correlator.take(&frame) {
            Some(pending) => {
                log::debug!(
                    "Reply {:?} for {} ({})",
                    frame.kind,
                    pending.request_type,
                    pending.request_id
                );
                match pending.on_response {
                    ReplyAction::Internal => self.handle_frame(frame),
                    ReplyAction::Caller(reply) => {
                        let _ = reply.send(frame);
                    }
                    ReplyAction::Callback(callback) => callback(frame),
                }
            }
            None => self.handle_frame(frame),
        }
    }

    /// Pushes, unmatched replies and replies to the client's own requests.
    fn handle_frame(&mut self, frame: InboundFrame) {
        match frame.kind {
            InboundType::LatestData => match frame.messages() {
                Ok(batch) => {
                    let kept = self.store.replace_latest(batch);
                    log::info!("Loaded {} latest messages", kept);
                }
                Err(e) => self.parse_failure(e),
            },
            InboundType::HistoryData => match frame.messages() {
                Ok(batch) => {
                    let appended = self.store.append_older(batch);
                    self.has_more_history = frame.has_more();
                    log::info!("Loaded {} older messages", appended);
                }
                Err(e) => self.parse_failure(e),
            },
            InboundType::NewMessage => match frame.pushed_message() {
                Ok(message) => {
                    if self.store.insert(message) {
                        if let Some(stored) = self.store.newest() {
                            let _ = self.events_tx.send(FeedEvent::NewMessage(stored.clone()));
                        }
                    }
                }
                Err(e) => self.parse_failure(e),
            },
            InboundType::SubscriptionConfirmed => {
                log::info!("Subscribed to new messages");
                self.subscription.confirm_subscribed();
            }
            InboundType::UnsubscriptionConfirmed => {
                log::info!("Unsubscribed from new messages");
                self.subscription.confirm_unsubscribed();
            }
            InboundType::Pong => {}
            InboundType::Error => {
                let text = frame.error_text();
                log::warn!("Server error: {}", text);
                self.set_error(text);
            }
            InboundType::ConnectionInfo => {
                let info = frame.payload.unwrap_or(Value::Null);
                log::info!("Connection info: {}", info);
                self.server_info = Some(info.clone());
                let _ = self.events_tx.send(FeedEvent::ConnectionInfo(info));
            }
            InboundType::Unknown => log::debug!("Ignoring frame of unknown type"),
        }
    }

    fn parse_failure(&mut self, e: serde_json::Error) {
        log::warn!("{}: {}", PARSE_ERROR_TEXT, e);
        self.set_error(PARSE_ERROR_TEXT.to_string());
    }

    fn expire_requests(&mut self) {
        let expired = self
            .correlator
            .expire(std::time::Instant::now(), self.config.request_timeout());
        for pending in expired {
            let text = pending.timeout_text();
            if pending.request_type == RequestType::Ping {
                log::debug!("{}", text);
                continue;
            }
            log::warn!("{}", text);
            self.set_error(text);
        }
    }

    /// Tears the transport down after a close or error and decides whether to
    /// reconnect. Pending requests are dropped unresolved.
    fn connection_lost(&mut self, kind: CloseKind) {
        self.writer = None;
        self.reader = None;
        self.heartbeat = None;

        let dropped = self.correlator.clear();
        if dropped > 0 {
            log::warn!("Dropped {} pending requests", dropped);
        }
        self.subscription.on_connection_lost();

        match &kind {
            CloseKind::Clean => log::info!("Connection closed"),
            CloseKind::Abnormal(description) => {
                log::warn!("Connection lost: {}", description);
                self.set_error(description.clone());
            }
        }
        self.machine.on_close(kind);
        self.publish();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        match self.machine.schedule_reconnect() {
            ReconnectDecision::Schedule { attempt, delay } => {
                log::info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    attempt,
                    self.config.max_reconnect_attempts
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            ReconnectDecision::Manual => {}
            ReconnectDecision::Exhausted => {
                log::error!(
                    "Giving up after {} reconnect attempts",
                    self.config.max_reconnect_attempts
                );
            }
        }
    }

    async fn disconnect(&mut self) {
        self.pending_open = None;
        self.reconnect_at = None;
        self.heartbeat = None;

        let dropped = self.correlator.clear();
        if dropped > 0 {
            log::debug!("Discarded {} pending requests on disconnect", dropped);
        }
        self.subscription.on_connection_lost();
        self.machine.disconnect();

        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: "Client disconnect".into(),
            };
            if let Err(e) = writer.send(WsMessage::Close(Some(close))).await {
                log::debug!("Close frame not delivered: {}", e);
            }
            log::info!("Disconnected from {}", self.config.ws_url);
        }
    }

    fn set_error(&mut self, text: String) {
        self.error = Some(text.clone());
        let _ = self.events_tx.send(FeedEvent::Error(text));
    }

    fn publish(&mut self) {
        let state = self.machine.state();
        if state != self.published_state {
            self.published_state = state;
            log::debug!("Connection state: {}", state);
            let _ = self.events_tx.send(FeedEvent::StateChanged(state));
        }

        let revision = self.store.revision();
        if self.published_revision != Some(revision) {
            self.published_messages = Arc::new(self.store.snapshot());
            self.published_revision = Some(revision);
        }

        let snapshot = ClientSnapshot {
            connection_state: state,
            is_subscribed: self.subscription.is_subscribed(),
            error: self.error.clone(),
            messages: Arc::clone(&self.published_messages),
            server_info: self.server_info.clone(),
            reconnect_attempts: self.machine.reconnect_attempts(),
            has_more_history: self.has_more_history,
        };

        self.snapshot_tx.send_if_modified(|current| {
            if current.same_as(&snapshot) {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn next_frame(
    reader: &mut Option<WsSource>,
) -> Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>> {
    match reader.as_mut() {
        Some(reader) => reader.next().await,
        None => pending().await,
    }
}

async fn open_result(pending_open: &mut Option<OpenFuture>) -> Result<WsStream, FeedError> {
    match pending_open.as_mut() {
        Some(open) => open.await,
        None => pending().await,
    }
}

async fn reconnect_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat.as_mut() {
        Some(heartbeat) => {
            heartbeat.tick().await;
        }
        None => pending().await,
    }
}
