//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Convo";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rolling log file prefix.
pub const LOG_FILE_NAME: &str = "convo.log";

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Filter used when neither `RUST_LOG` nor a level is configured.
pub const DEFAULT_LOG_FILTER: &str = "info,rustls=warn";

/// Default seconds between reconnection attempts.
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;

/// Default number of reconnection attempts before giving up.
pub const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 3;

/// Default bound on TCP connect + TLS + HTTP upgrade, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Largest single frame payload accepted from the server.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Capacity of the monitor's broadcast event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Bayeux protocol constants.
pub mod bayeux {
    pub const VERSION: &str = "1.0";
    pub const MINIMUM_VERSION: &str = "1.0beta";
    pub const CONNECTION_TYPE: &str = "websocket";

    /// Transports advertised in the handshake.
    pub const SUPPORTED_CONNECTION_TYPES: &[&str] =
        &["long-polling", "callback-polling", "iframe", "websocket"];

    pub const META_HANDSHAKE: &str = "/meta/handshake";
    pub const META_CONNECT: &str = "/meta/connect";
    pub const META_SUBSCRIBE: &str = "/meta/subscribe";
    pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
    pub const META_DISCONNECT: &str = "/meta/disconnect";
}

/// Build the per-user realtime channel.
pub fn user_channel(app_id: &str, app_user_id: &str) -> String {
    format!("/sdk/apps/{app_id}/appusers/{app_user_id}")
}
