//! Global error types for the Convo realtime stack.
//!
//! All error categories are unified into a single `ConvoError` enum with
//! conversions from underlying library errors. Lower-level crates keep their
//! own narrower error types and convert into this one at their boundary.

use thiserror::Error;

/// Convenience type alias for Results using ConvoError.
pub type ConvoResult<T> = Result<T, ConvoError>;

/// Unified error type covering all error categories in Convo.
#[derive(Error, Debug)]
pub enum ConvoError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Connection errors --
    /// Malformed frame or failed WebSocket upgrade. Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected our credentials during the upgrade.
    #[error("authentication failed (status {status}): {message}")]
    Authentication {
        /// HTTP status code returned by the server.
        status: u16,
        /// Status line message or body excerpt.
        message: String,
    },

    /// Socket I/O failure or timeout. Recoverable by reconnecting.
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// The Bayeux server reported a session-level failure.
    #[error("bayeux error: {0}")]
    BayeuxProtocol(String),

    // -- Application errors --
    /// A business-level rejection delivered as payload data.
    #[error("application error (status {status}): {code}")]
    Application {
        /// Status reported by the server.
        status: u16,
        /// Machine-readable rejection code.
        code: String,
    },

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConvoError {
    /// Whether this error should be routed to the authentication delegate
    /// instead of the reconnection monitor.
    pub fn is_authentication(&self) -> bool {
        matches!(self, ConvoError::Authentication { .. })
    }

    /// Whether reconnecting may resolve this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConvoError::TransientNetwork(_)
                | ConvoError::Protocol(_)
                | ConvoError::BayeuxProtocol(_)
                | ConvoError::Io(_)
        )
    }
}

impl From<serde_json::Error> for ConvoError {
    fn from(e: serde_json::Error) -> Self {
        ConvoError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ConvoError {
    fn from(e: toml::de::Error) -> Self {
        ConvoError::Config(e.to_string())
    }
}
