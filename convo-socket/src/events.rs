//! Connection state and the events the Bayeux client reports upward.

use serde_json::{Map, Value};

use convo_core::error::ConvoError;

/// Connection state of the Bayeux session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// First connection of a session in progress.
    Connecting,
    /// Handshake accepted; receiving events.
    Connected,
    /// Connection lost, the reconnection monitor is running.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Why a connected session stopped being connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The owner asked to disconnect.
    Requested,
    /// The server acknowledged `/meta/disconnect`.
    ServerAcknowledged,
    /// The server closed the socket or the stream ended.
    ServerClosed { code: Option<u16>, reason: String },
    /// Socket I/O or protocol failure.
    TransportError(String),
    /// `/meta/connect` reported our client id as unknown.
    UnknownClient,
    /// The owner forced a fresh handshake.
    Reset,
}

impl DisconnectReason {
    /// The failure behind the disconnect. `None` when it was asked for.
    pub fn to_error(&self) -> Option<ConvoError> {
        match self {
            Self::Requested | Self::ServerAcknowledged | Self::Reset => None,
            Self::ServerClosed { .. } | Self::TransportError(_) => {
                Some(ConvoError::TransientNetwork(self.to_string()))
            }
            Self::UnknownClient => Some(ConvoError::BayeuxProtocol(self.to_string())),
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::ServerAcknowledged => write!(f, "server acknowledged disconnect"),
            Self::ServerClosed { code: Some(code), reason } => {
                write!(f, "server closed ({code}): {reason}")
            }
            Self::ServerClosed { code: None, reason } => write!(f, "server closed: {reason}"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::UnknownClient => write!(f, "unknown client"),
            Self::Reset => write!(f, "connection reset"),
        }
    }
}

/// Events delivered by [`crate::BayeuxClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum BayeuxEvent {
    /// Handshake accepted; connect and subscribe have been sent.
    Connected { client_id: String },
    /// A connected session was lost.
    Disconnected(DisconnectReason),
    /// Application data on a channel matching the subscription.
    Message { channel: String, data: Map<String, Value> },
    Subscribed { subscription: String },
    SubscriptionFailed { subscription: String, error: Option<String> },
    Unsubscribed { subscription: String },
    /// The server answered `/meta/handshake` with `successful=false`.
    HandshakeRejected { error: Option<String> },
    /// The Upgrade was refused with 401. No reconnection is scheduled.
    AuthenticationFailed { status: u16, message: String },
    /// The reconnection monitor used up its attempts.
    ReconnectFailed { attempts: u32 },
}

impl BayeuxEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::Message { .. } => "message",
            Self::Subscribed { .. } => "subscribed",
            Self::SubscriptionFailed { .. } => "subscription-failed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::HandshakeRejected { .. } => "handshake-rejected",
            Self::AuthenticationFailed { .. } => "authentication-failed",
            Self::ReconnectFailed { .. } => "reconnect-failed",
        }
    }
}
