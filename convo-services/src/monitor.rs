//! Conversation monitor: owns the realtime session for one app user.
//!
//! The monitor drives a [`BayeuxClient`] subscribed to the user's channel,
//! turns channel payloads into [`MonitorEvent`]s on an [`EventBus`], and
//! routes credential rejections to the application's
//! [`AuthenticationDelegate`]. A background task consumes the Bayeux events;
//! the public methods only send commands, so they never block.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use convo_core::config::{AppConfig, RealtimeConfig};
use convo_core::constants::{user_channel, DEFAULT_EVENT_CAPACITY};
use convo_core::error::{ConvoError, ConvoResult};
use convo_socket::{
    BayeuxClient, BayeuxConfig, BayeuxEvent, BayeuxHandle, ConnectionState, Connector, Extension,
    TcpConnector,
};

use crate::auth::{
    AuthCommand, AuthenticationCallback, AuthenticationDelegate, AuthenticationError,
    MemoryTokenStore, TokenStore,
};
use crate::event_bus::{EventBus, MonitorEvent};
use crate::mapper::EventMapper;

/// Coarse connection status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// `resume()` has never been called.
    NotYetInitiated,
    Connected,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotYetInitiated => write!(f, "not_yet_initiated"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// State shared between the monitor and its task.
#[derive(Debug, Default)]
struct SharedState {
    connected: AtomicBool,
    initiated: AtomicBool,
    closed: AtomicBool,
    /// Bumped by pause/close to invalidate pending auth callbacks.
    epoch: Arc<AtomicU64>,
}

/// Identity and credentials used to build the subscribe extension.
#[derive(Clone)]
struct Credentials {
    app_id: String,
    app_user_id: String,
    session_token: Option<String>,
    tokens: Arc<dyn TokenStore>,
}

impl Credentials {
    /// `{appId, appUserId}` plus `jwt` if one is stored, otherwise the
    /// session token if any.
    fn extension(&self) -> Extension {
        let mut ext = Extension::new();
        ext.insert("appId".into(), Value::String(self.app_id.clone()));
        ext.insert("appUserId".into(), Value::String(self.app_user_id.clone()));
        if let Some(jwt) = self.tokens.jwt().filter(|t| !t.is_empty()) {
            ext.insert("jwt".into(), Value::String(jwt));
        } else if let Some(token) = self
            .session_token
            .clone()
            .or_else(|| self.tokens.session_token())
            .filter(|t| !t.is_empty())
        {
            ext.insert("sessionToken".into(), Value::String(token));
        }
        ext
    }
}

/// Realtime session for one app user.
pub struct ConversationMonitor {
    credentials: Credentials,
    bayeux: BayeuxHandle,
    bus: EventBus,
    shared: Arc<SharedState>,
}

impl ConversationMonitor {
    pub fn builder() -> ConversationMonitorBuilder {
        ConversationMonitorBuilder::default()
    }

    pub fn app_id(&self) -> &str {
        &self.credentials.app_id
    }

    pub fn app_user_id(&self) -> &str {
        &self.credentials.app_user_id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        if !self.shared.initiated.load(Ordering::SeqCst) {
            ConnectionStatus::NotYetInitiated
        } else if self.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Follow the underlying Bayeux connection state, including the
    /// intermediate `Connecting` and `Reconnecting` phases.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.bayeux.state_receiver()
    }

    /// Receive the monitor's events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MonitorEvent> {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Connect if not already connected.
    pub fn resume(&self) {
        if self.shared.closed.load(Ordering::SeqCst) {
            warn!("resume called on a closed monitor");
            return;
        }
        if self.is_connected() {
            debug!("already connected, resume ignored");
            return;
        }
        self.shared.initiated.store(true, Ordering::SeqCst);
        info!("resuming realtime session for {}", self.credentials.app_user_id);
        self.bayeux.connect(Some(self.credentials.extension()));
    }

    /// Disconnect. The session can be resumed later.
    pub fn pause(&self) {
        info!("pausing realtime session");
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.bayeux.disconnect();
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    /// Disconnect and release the connection for good.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing realtime session");
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.bayeux.close();
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    /// Start a fresh handshake cycle. No-op unless connected.
    pub fn reset(&self) {
        if !self.is_connected() {
            debug!("not connected, reset ignored");
            return;
        }
        self.bayeux.reset_connection();
    }
}

impl Drop for ConversationMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for [`ConversationMonitor`].
///
/// `app_id`, `app_user_id`, `client_id` and `host` are required.
pub struct ConversationMonitorBuilder {
    app_id: String,
    app_user_id: String,
    client_id: String,
    jwt: Option<String>,
    session_token: Option<String>,
    realtime: RealtimeConfig,
    /// Sub-second overrides of the `realtime` durations.
    retry_interval: Option<Duration>,
    connect_timeout: Option<Duration>,
    tokens: Option<Arc<dyn TokenStore>>,
    auth_delegate: Option<Arc<dyn AuthenticationDelegate>>,
    connector: Option<Arc<dyn Connector>>,
    event_capacity: usize,
}

impl Default for ConversationMonitorBuilder {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_user_id: String::new(),
            client_id: String::new(),
            jwt: None,
            session_token: None,
            realtime: RealtimeConfig::default(),
            retry_interval: None,
            connect_timeout: None,
            tokens: None,
            auth_delegate: None,
            connector: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConversationMonitorBuilder {
    /// Prefill identity, credentials and realtime settings from the config file.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            app_id: config.sdk.app_id.clone(),
            app_user_id: config.sdk.app_user_id.clone(),
            client_id: config.sdk.client_id.clone(),
            jwt: Some(config.sdk.jwt.clone()).filter(|t| !t.is_empty()),
            session_token: Some(config.sdk.session_token.clone()).filter(|t| !t.is_empty()),
            realtime: config.realtime.clone(),
            ..Self::default()
        }
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn app_user_id(mut self, app_user_id: impl Into<String>) -> Self {
        self.app_user_id = app_user_id.into();
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Realtime base URL (`https://`, `http://`, `wss://` or `ws://`).
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.realtime.base_url = host.into();
        self
    }

    /// Initial JWT, used when no token store is supplied.
    pub fn jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    pub fn session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn max_connection_attempts(mut self, attempts: u32) -> Self {
        self.realtime.max_connection_attempts = attempts;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn authentication_delegate(mut self, delegate: Arc<dyn AuthenticationDelegate>) -> Self {
        self.auth_delegate = Some(delegate);
        self
    }

    /// Replace the TCP/TLS connector (tests use an in-memory one).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Validate and start the monitor. Must be called inside a tokio runtime.
    pub fn build(self) -> ConvoResult<ConversationMonitor> {
        let missing: Vec<&str> = [
            ("app_id", &self.app_id),
            ("app_user_id", &self.app_user_id),
            ("client_id", &self.client_id),
            ("host", &self.realtime.base_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            error!("cannot build conversation monitor, missing: {}", missing.join(", "));
            return Err(ConvoError::MissingConfig(missing.join(", ")));
        }

        let channel = user_channel(&self.app_id, &self.app_user_id);
        let mut config = BayeuxConfig::from_realtime(&self.realtime, channel)?;
        if let Some(interval) = self.retry_interval {
            config.retry_interval = interval;
        }
        if let Some(timeout) = self.connect_timeout {
            config.transport.connect_timeout = timeout;
        }

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new()));
        let (bayeux, bayeux_events) = BayeuxClient::spawn(config, connector)?;

        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new(self.jwt.clone(), self.session_token.clone())));
        let credentials = Credentials {
            app_id: self.app_id,
            app_user_id: self.app_user_id,
            session_token: self.session_token,
            tokens,
        };

        let bus = EventBus::new(self.event_capacity);
        let shared = Arc::new(SharedState::default());
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();

        let task = MonitorTask {
            mapper: EventMapper::new(self.client_id),
            credentials: credentials.clone(),
            bayeux: bayeux.clone(),
            bus: bus.clone(),
            shared: Arc::clone(&shared),
            auth_delegate: self.auth_delegate,
            auth_tx,
        };
        tokio::spawn(task.run(bayeux_events, auth_rx));

        Ok(ConversationMonitor {
            credentials,
            bayeux,
            bus,
            shared,
        })
    }
}

struct MonitorTask {
    mapper: EventMapper,
    credentials: Credentials,
    bayeux: BayeuxHandle,
    bus: EventBus,
    shared: Arc<SharedState>,
    auth_delegate: Option<Arc<dyn AuthenticationDelegate>>,
    auth_tx: mpsc::UnboundedSender<AuthCommand>,
}

impl MonitorTask {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<BayeuxEvent>,
        mut auth_commands: mpsc::UnboundedReceiver<AuthCommand>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_bayeux_event(event),
                    None => break,
                },
                Some(command) = auth_commands.recv() => self.handle_auth_command(command),
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        debug!("conversation monitor task stopped");
    }

    fn handle_bayeux_event(&self, event: BayeuxEvent) {
        match event {
            BayeuxEvent::Connected { client_id } => {
                info!("realtime session connected (bayeux client {client_id})");
                self.shared.connected.store(true, Ordering::SeqCst);
                self.bus.emit(MonitorEvent::Connected);
            }
            BayeuxEvent::Disconnected(reason) => {
                match reason.to_error() {
                    Some(e) => warn!("realtime session lost: {e}"),
                    None => info!("realtime session disconnected: {reason}"),
                }
                self.shared.connected.store(false, Ordering::SeqCst);
                self.bus.emit(MonitorEvent::Disconnected);
            }
            BayeuxEvent::Message { channel, data } => {
                debug!("payload on {channel}");
                for event in self.mapper.map_payload(&data) {
                    self.bus.emit(event);
                }
            }
            BayeuxEvent::Subscribed { subscription } => debug!("subscribed to {subscription}"),
            BayeuxEvent::SubscriptionFailed { subscription, error } => {
                warn!("subscription to {subscription} failed: {error:?}");
            }
            BayeuxEvent::Unsubscribed { subscription } => debug!("unsubscribed from {subscription}"),
            BayeuxEvent::HandshakeRejected { error } => {
                let reason = error.unwrap_or_else(|| "handshake rejected".into());
                warn!("{}", ConvoError::BayeuxProtocol(reason));
            }
            BayeuxEvent::ReconnectFailed { attempts } => {
                error!("realtime server unreachable after {attempts} attempts");
                if self.shared.connected.swap(false, Ordering::SeqCst) {
                    self.bus.emit(MonitorEvent::Disconnected);
                }
            }
            BayeuxEvent::AuthenticationFailed { status, message } => {
                self.shared.connected.store(false, Ordering::SeqCst);
                self.on_authentication_failed(AuthenticationError { status, data: message });
            }
        }
    }

    fn on_authentication_failed(&self, error: AuthenticationError) {
        warn!("{error}");
        let Some(delegate) = &self.auth_delegate else {
            warn!("no authentication delegate, staying disconnected");
            return;
        };
        let callback = AuthenticationCallback::new(
            Arc::clone(&self.shared.epoch),
            Arc::clone(&self.credentials.tokens),
            self.auth_tx.clone(),
        );
        delegate.on_invalid_auth(error, callback);
    }

    fn handle_auth_command(&self, command: AuthCommand) {
        match command {
            AuthCommand::TokenUpdated { epoch } => {
                if epoch != self.shared.epoch.load(Ordering::SeqCst) {
                    debug!("token refresh for an ended session, ignoring");
                    return;
                }
                info!("token refreshed, reconnecting");
                self.bayeux.reconnect_with(Some(self.credentials.extension()));
            }
        }
    }
}
