//! Bayeux client over a WebSocket transport.
//!
//! The client is an actor: one task owns the transport, the session state,
//! the retry budget and a single reconnect timer slot. Callers talk to it
//! through a cloneable [`BayeuxHandle`] and receive [`BayeuxEvent`]s on a
//! channel.
//!
//! Lifecycle:
//! - `connect` opens a transport and arms the reconnect timer
//! - transport opened: send `/meta/handshake`
//! - handshake accepted: store the client id, send `/meta/connect` and
//!   `/meta/subscribe`, clear the timer
//! - connection lost or reset while connected: emit `Disconnected` and start
//!   a reconnection cycle; each timer tick opens a new transport until the
//!   handshake succeeds or the attempts run out
//! - 401 during the upgrade: emit `AuthenticationFailed` and stop

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use convo_core::config::RealtimeConfig;
use convo_core::constants::bayeux::{
    META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};
use convo_core::constants::{DEFAULT_MAX_CONNECTION_ATTEMPTS, DEFAULT_RETRY_INTERVAL_SECS};
use convo_core::error::ConvoResult;

use crate::channel::ChannelPattern;
use crate::error::{FailureKind, TransportError};
use crate::events::{BayeuxEvent, ConnectionState, DisconnectReason};
use crate::handshake::WsUrl;
use crate::message::{decode_batch, encode_batch, unknown_client_error, BayeuxMessage, Extension};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connector, Transport, TransportEvent, TransportEventKind, TransportOptions};

/// Settings for one Bayeux session.
#[derive(Debug, Clone)]
pub struct BayeuxConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Channel (or `/**` pattern) to subscribe to after the handshake.
    pub subscription: String,
    /// Reconnection attempts before giving up.
    pub max_connection_attempts: u32,
    /// Time between reconnection attempts. Also the deadline for a freshly
    /// opened connection to complete its handshake.
    pub retry_interval: Duration,
    pub transport: TransportOptions,
}

impl BayeuxConfig {
    pub fn new(url: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscription: subscription.into(),
            max_connection_attempts: DEFAULT_MAX_CONNECTION_ATTEMPTS,
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
            transport: TransportOptions::default(),
        }
    }

    /// Build from the `[realtime]` config section.
    pub fn from_realtime(realtime: &RealtimeConfig, subscription: impl Into<String>) -> ConvoResult<Self> {
        Ok(Self {
            url: realtime.websocket_url()?,
            subscription: subscription.into(),
            max_connection_attempts: realtime.max_connection_attempts,
            retry_interval: realtime.retry_interval(),
            transport: TransportOptions {
                connect_timeout: realtime.connect_timeout(),
                max_frame_size: realtime.max_frame_size,
                fragment_size: realtime.fragment_size,
            },
        })
    }

    pub fn with_reconnect(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_connection_attempts = max_attempts;
        self.retry_interval = interval;
        self
    }
}

#[derive(Debug)]
enum Command {
    Connect(Option<Extension>),
    ReconnectWith(Option<Extension>),
    ResetConnection,
    Unsubscribe,
    Publish { channel: String, data: Value },
    Disconnect,
    Close,
}

/// Cloneable handle to a running Bayeux client.
#[derive(Clone)]
pub struct BayeuxHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl BayeuxHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("bayeux client already closed, command dropped");
        }
    }

    /// Start a new session with the given authentication extension.
    pub fn connect(&self, ext: Option<Extension>) {
        self.send(Command::Connect(ext));
    }

    /// Replace the extension and start a fresh reconnection cycle.
    pub fn reconnect_with(&self, ext: Option<Extension>) {
        self.send(Command::ReconnectWith(ext));
    }

    /// Drop the current socket and reconnect. Ignored while a reconnection
    /// cycle is already running.
    pub fn reset_connection(&self) {
        self.send(Command::ResetConnection);
    }

    pub fn unsubscribe(&self) {
        self.send(Command::Unsubscribe);
    }

    /// Publish `data` on `channel`. Dropped unless connected.
    pub fn publish(&self, channel: impl Into<String>, data: Value) {
        self.send(Command::Publish {
            channel: channel.into(),
            data,
        });
    }

    /// Send `/meta/disconnect` and close the socket. The session can be
    /// started again with [`BayeuxHandle::connect`].
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Disconnect and stop the client task.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Entry point for spawning a Bayeux client.
pub struct BayeuxClient;

impl BayeuxClient {
    /// Spawn the client task. Nothing connects until [`BayeuxHandle::connect`].
    pub fn spawn(
        config: BayeuxConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(BayeuxHandle, mpsc::UnboundedReceiver<BayeuxEvent>), TransportError> {
        let url = WsUrl::parse(&config.url)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = BayeuxActor {
            url,
            subscription: ChannelPattern::new(config.subscription),
            options: config.transport,
            connector,
            policy: ReconnectPolicy::new(config.max_connection_attempts, config.retry_interval),
            ext: None,
            client_id: None,
            transport: None,
            next_connection_id: 0,
            next_tick: None,
            state: ConnectionState::Disconnected,
            state_tx,
            events: event_tx,
            transport_tx,
        };
        tokio::spawn(actor.run(command_rx, transport_rx));

        Ok((
            BayeuxHandle {
                commands: command_tx,
                state: state_rx,
            },
            event_rx,
        ))
    }
}

struct BayeuxActor {
    url: WsUrl,
    subscription: ChannelPattern,
    options: TransportOptions,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    ext: Option<Extension>,
    client_id: Option<String>,
    transport: Option<Transport>,
    next_connection_id: u64,
    next_tick: Option<Instant>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<BayeuxEvent>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl BayeuxActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            let tick = self.next_tick;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close) | None => {
                        self.end_session(DisconnectReason::Requested);
                        debug!("bayeux client stopped");
                        return;
                    }
                    Some(command) => self.handle_command(command),
                },
                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                _ = tokio::time::sleep_until(tick.unwrap_or_else(Instant::now)), if tick.is_some() => {
                    self.next_tick = None;
                    self.on_tick();
                }
            }
        }
    }

    fn emit(&self, event: BayeuxEvent) {
        debug!("bayeux event: {}", event.name());
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state != new_state {
            info!("bayeux state: {} -> {}", self.state, new_state);
            self.state = new_state;
            self.state_tx.send_replace(new_state);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(ext) => {
                if self.state == ConnectionState::Connected {
                    debug!("already connected, ignoring connect");
                    return;
                }
                self.ext = ext;
                self.policy.reset();
                self.set_state(ConnectionState::Connecting);
                self.open_transport();
                self.arm_tick(self.policy.interval());
            }
            Command::ReconnectWith(ext) => {
                self.ext = ext;
                self.reset_connection(DisconnectReason::Reset);
            }
            Command::ResetConnection => self.reset_connection(DisconnectReason::Reset),
            Command::Unsubscribe => {
                if let Some(client_id) = self.client_id.clone() {
                    let msg = BayeuxMessage::unsubscribe(&client_id, self.subscription.as_str(), self.ext.as_ref());
                    self.send(msg);
                }
            }
            Command::Publish { channel, data } => {
                let Some(client_id) = self.client_id.clone().filter(|_| self.state == ConnectionState::Connected) else {
                    warn!("not connected, dropping publish to {channel}");
                    return;
                };
                let msg = BayeuxMessage::publish(&channel, &client_id, data, self.ext.as_ref());
                self.send(msg);
            }
            Command::Disconnect => self.end_session(DisconnectReason::Requested),
            Command::Close => {}
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let current = self.transport.as_ref().map(Transport::connection_id);
        if current != Some(event.connection_id) {
            debug!("ignoring event from stale connection {}", event.connection_id);
            return;
        }

        match event.kind {
            TransportEventKind::Opened => {
                debug!("transport open, sending handshake");
                self.send(BayeuxMessage::handshake());
            }
            TransportEventKind::Message(text) => self.handle_frame(&text),
            TransportEventKind::Closed { code, reason } => {
                self.transport = None;
                self.on_connection_lost(DisconnectReason::ServerClosed { code, reason });
            }
            TransportEventKind::Error(e) => {
                self.transport = None;
                match e.kind() {
                    FailureKind::Authentication => {
                        let (status, message) = match e {
                            TransportError::Unauthorized { status, message } => (status, message),
                            other => (401, other.to_string()),
                        };
                        warn!("realtime server rejected credentials ({status}), not reconnecting");
                        self.next_tick = None;
                        self.set_state(ConnectionState::Disconnected);
                        self.emit(BayeuxEvent::AuthenticationFailed { status, message });
                    }
                    FailureKind::Protocol | FailureKind::Transient => {
                        self.on_connection_lost(DisconnectReason::TransportError(e.to_string()));
                    }
                }
            }
        }
    }

    fn on_connection_lost(&mut self, reason: DisconnectReason) {
        match self.state {
            ConnectionState::Connected => {
                warn!("connection lost: {reason}");
                self.reset_connection(reason);
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                debug!("connection attempt failed: {reason}; waiting for next attempt");
            }
            ConnectionState::Disconnected => {}
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let batch = match decode_batch(text) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("could not parse bayeux frame: {e}");
                return;
            }
        };
        for message in batch {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, msg: BayeuxMessage) {
        let success = msg.is_successful();
        match msg.channel.as_str() {
            META_HANDSHAKE => {
                if !success {
                    warn!("handshake rejected: {:?}", msg.error);
                    self.close_transport();
                    self.emit(BayeuxEvent::HandshakeRejected { error: msg.error });
                    return;
                }
                let client_id = msg.client_id.unwrap_or_default();
                info!("handshake accepted, client id {client_id}");
                self.client_id = Some(client_id.clone());
                self.policy.reset();
                self.next_tick = None;
                self.set_state(ConnectionState::Connected);
                self.emit(BayeuxEvent::Connected {
                    client_id: client_id.clone(),
                });
                self.send(BayeuxMessage::connect(&client_id));
                let subscribe = BayeuxMessage::subscribe(&client_id, self.subscription.as_str(), self.ext.as_ref());
                self.send(subscribe);
            }
            META_CONNECT => {
                if success {
                    if let Some(client_id) = self.client_id.clone() {
                        self.send(BayeuxMessage::connect(&client_id));
                    }
                    return;
                }
                let client_id = self.client_id.clone().unwrap_or_default();
                if msg.error.as_deref() == Some(unknown_client_error(&client_id).as_str()) {
                    warn!("server no longer knows client {client_id}, reconnecting");
                    self.reset_connection(DisconnectReason::UnknownClient);
                } else {
                    debug!("connect failed: {:?}", msg.error);
                }
            }
            META_SUBSCRIBE => {
                let subscription = msg
                    .subscription
                    .unwrap_or_else(|| self.subscription.as_str().to_string());
                if success {
                    info!("subscribed to {subscription}");
                    self.emit(BayeuxEvent::Subscribed { subscription });
                } else {
                    warn!("subscription to {subscription} failed: {:?}", msg.error);
                    self.emit(BayeuxEvent::SubscriptionFailed {
                        subscription,
                        error: msg.error,
                    });
                }
            }
            META_UNSUBSCRIBE => {
                if success {
                    let subscription = msg
                        .subscription
                        .unwrap_or_else(|| self.subscription.as_str().to_string());
                    self.emit(BayeuxEvent::Unsubscribed { subscription });
                }
            }
            META_DISCONNECT => {
                if success {
                    self.client_id = None;
                    self.end_session(DisconnectReason::ServerAcknowledged);
                }
            }
            channel if ChannelPattern::is_meta(channel) => debug!("ignoring reply on {channel}"),
            channel if self.subscription.matches(channel) => match msg.data_object() {
                Some(data) => self.emit(BayeuxEvent::Message {
                    channel: msg.channel.clone(),
                    data: data.clone(),
                }),
                None => debug!("message on {channel} without object data"),
            },
            other => debug!("unhandled bayeux channel {other}"),
        }
    }

    fn on_tick(&mut self) {
        match self.state {
            ConnectionState::Connected => {
                self.policy.reset();
                return;
            }
            ConnectionState::Disconnected => return,
            ConnectionState::Connecting | ConnectionState::Reconnecting => {}
        }

        match self.policy.try_next_attempt() {
            Some(attempt) => {
                info!("reconnection attempt {attempt}/{}", self.policy.max_attempts());
                self.set_state(ConnectionState::Reconnecting);
                self.open_transport();
                self.arm_tick(self.policy.interval());
            }
            None => {
                error!("giving up after {} reconnection attempts", self.policy.attempts());
                self.close_transport();
                self.set_state(ConnectionState::Disconnected);
                self.emit(BayeuxEvent::ReconnectFailed {
                    attempts: self.policy.attempts(),
                });
            }
        }
    }

    /// Leaving `Connected` reports `Disconnected` with `reason` first.
    fn reset_connection(&mut self, reason: DisconnectReason) {
        if self.state == ConnectionState::Reconnecting {
            debug!("reconnection already in progress");
            return;
        }
        let was_connected = self.state == ConnectionState::Connected;
        self.set_state(ConnectionState::Reconnecting);
        if was_connected {
            self.emit(BayeuxEvent::Disconnected(reason));
        }
        self.policy.reset();
        self.close_transport();
        self.arm_tick(Duration::ZERO);
    }

    /// Send `/meta/disconnect` if connected, close the socket and stop the
    /// reconnect timer.
    fn end_session(&mut self, reason: DisconnectReason) {
        let was_connected = self.state == ConnectionState::Connected;
        if was_connected {
            if let Some(client_id) = self.client_id.clone() {
                self.send(BayeuxMessage::disconnect(&client_id));
            }
        }
        self.close_transport();
        self.next_tick = None;
        self.client_id = None;
        self.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.emit(BayeuxEvent::Disconnected(reason));
        }
    }

    fn arm_tick(&mut self, after: Duration) {
        self.next_tick = Some(Instant::now() + after);
    }

    fn open_transport(&mut self) {
        self.close_transport();
        self.next_connection_id += 1;
        debug!("opening connection {} to {}", self.next_connection_id, self.url.authority());
        self.transport = Some(Transport::open(
            self.next_connection_id,
            self.url.clone(),
            self.options.clone(),
            Arc::clone(&self.connector),
            self.transport_tx.clone(),
        ));
    }

    fn close_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.disconnect();
        }
    }

    fn send(&self, message: BayeuxMessage) {
        let Some(transport) = &self.transport else {
            debug!("no transport, dropping {}", message.channel);
            return;
        };
        match encode_batch(std::slice::from_ref(&message)) {
            Ok(text) => transport.send_text(text),
            Err(e) => error!("failed to encode {} message: {e}", message.channel),
        }
    }
}
