//! Application configuration management.
//!
//! Handles loading, saving, and accessing configuration for the SDK identity,
//! the realtime connection and logging. Configuration is persisted as TOML on
//! disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_CONNECTION_ATTEMPTS, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_RETRY_INTERVAL_SECS,
};
use crate::error::{ConvoError, ConvoResult};
use crate::paths;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Identity and credentials of this SDK user.
    #[serde(default)]
    pub sdk: SdkConfig,

    /// Realtime connection settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SDK identity and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Application id issued by the platform.
    #[serde(default)]
    pub app_id: String,

    /// Id of the signed-in app user.
    #[serde(default)]
    pub app_user_id: String,

    /// Per-install client id. Generated on first load when empty.
    #[serde(default)]
    pub client_id: String,

    /// JWT used for authenticated users.
    #[serde(default)]
    pub jwt: String,

    /// Session token used for anonymous users.
    #[serde(default)]
    pub session_token: String,
}

/// Realtime connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Whether the realtime connection should be opened at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the realtime server, e.g. "https://realtime.example.com/faye".
    #[serde(default)]
    pub base_url: String,

    /// Seconds between reconnection attempts.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Attempts made before the reconnection monitor gives up.
    #[serde(default = "default_max_attempts")]
    pub max_connection_attempts: u32,

    /// Seconds to wait before the first connection.
    #[serde(default)]
    pub connection_delay_secs: u64,

    /// Bound on TCP connect, TLS and HTTP upgrade, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Largest frame payload accepted from the server.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Split outgoing messages into frames of at most this many bytes.
    /// Unset sends every message as a single frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_size: Option<usize>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_true() -> bool {
    true
}

fn default_retry_interval() -> u64 {
    DEFAULT_RETRY_INTERVAL_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_CONNECTION_ATTEMPTS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            retry_interval_secs: default_retry_interval(),
            max_connection_attempts: default_max_attempts(),
            connection_delay_secs: 0,
            connect_timeout_ms: default_connect_timeout(),
            max_frame_size: default_max_frame_size(),
            fragment_size: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl LoggingConfig {
    /// Configured log directory, or the platform default when unset.
    pub fn log_dir(&self) -> ConvoResult<PathBuf> {
        if self.directory.trim().is_empty() {
            paths::default_log_dir()
        } else {
            Ok(PathBuf::from(&self.directory))
        }
    }
}

impl RealtimeConfig {
    /// Map the configured base URL onto the WebSocket scheme.
    ///
    /// `https://` becomes `wss://` and `http://` becomes `ws://`; URLs that
    /// already carry a WebSocket scheme are returned unchanged.
    pub fn websocket_url(&self) -> ConvoResult<String> {
        let base = self.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(ConvoError::MissingConfig("realtime.base_url".into()));
        }
        if let Some(rest) = base.strip_prefix("https://") {
            Ok(format!("wss://{rest}"))
        } else if let Some(rest) = base.strip_prefix("http://") {
            Ok(format!("ws://{rest}"))
        } else if base.starts_with("wss://") || base.starts_with("ws://") {
            Ok(base.to_string())
        } else {
            Err(ConvoError::Config(format!("unsupported realtime url scheme: {base}")))
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn connection_delay(&self) -> Duration {
        Duration::from_secs(self.connection_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> ConvoResult<Self> {
        Self::load_or_default(&Self::default_config_path()?)
    }

    /// Load `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> ConvoResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default().with_client_id())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> ConvoResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config.with_client_id())
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> ConvoResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> ConvoResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConvoError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> ConvoResult<PathBuf> {
        paths::config_file()
    }

    /// Check whether enough is configured to open a realtime session.
    pub fn is_realtime_configured(&self) -> bool {
        !self.realtime.base_url.is_empty()
            && !self.sdk.app_id.is_empty()
            && !self.sdk.app_user_id.is_empty()
    }

    fn with_client_id(mut self) -> Self {
        if self.sdk.client_id.is_empty() {
            self.sdk.client_id = uuid::Uuid::new_v4().simple().to_string();
        }
        self
    }
}

/// Thread-safe configuration holder for shared access across services.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    /// Create a new configuration handle saved to the default path.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: None,
        }
    }

    /// Create a handle bound to an explicit config file.
    pub fn with_path(config: AppConfig, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path: Some(path),
        }
    }

    /// Explicit file this handle saves to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Save the current configuration to disk.
    pub async fn save(&self) -> ConvoResult<()> {
        let config = self.inner.read().await;
        match &self.path {
            Some(path) => config.save_to_file(path),
            None => config.save_default(),
        }
    }
}
