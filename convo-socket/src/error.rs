//! Error types for the WebSocket and Bayeux layers.

use convo_core::error::ConvoError;
use thiserror::Error;

/// A malformed or disallowed WebSocket frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("reserved bits set in frame header: {0:#04x}")]
    ReservedBits(u8),

    #[error("unknown opcode {0:#x}")]
    BadOpcode(u8),

    #[error("control frame must not be fragmented")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(u64),

    #[error("64-bit frame length has its most significant bit set")]
    LengthOverflow,

    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: u64, limit: usize },

    #[error("continuation frame without an open message")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is still open")]
    InterleavedFragment,

    #[error("close frame payload of 1 byte")]
    InvalidClosePayload,

    #[error("text payload is not valid utf-8")]
    InvalidUtf8,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a connection failure should be handled by the layers above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credentials were rejected. Never retried automatically.
    Authentication,
    /// Malformed frame or failed upgrade. Fatal to this connection.
    Protocol,
    /// I/O failure or timeout. Retried by the reconnection monitor.
    Transient,
}

/// Failure of a single transport connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("server rejected credentials (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("frame error: {0}")]
    Protocol(#[from] FrameError),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Unauthorized { .. } => FailureKind::Authentication,
            TransportError::Protocol(FrameError::Io(_)) => FailureKind::Transient,
            TransportError::Protocol(_)
            | TransportError::Handshake(_)
            | TransportError::InvalidUrl(_) => FailureKind::Protocol,
            TransportError::Timeout(_) | TransportError::Io(_) => FailureKind::Transient,
        }
    }
}

impl From<TransportError> for ConvoError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unauthorized { status, message } => {
                ConvoError::Authentication { status, message }
            }
            other => match other.kind() {
                FailureKind::Transient => ConvoError::TransientNetwork(other.to_string()),
                _ => ConvoError::Protocol(other.to_string()),
            },
        }
    }
}
