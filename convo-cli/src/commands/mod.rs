//! CLI command implementations.

pub mod config;
pub mod listen;
pub mod probe;

use convo_core::config::{AppConfig, ConfigHandle};

/// Snapshot the config with a command-line host override applied.
pub async fn effective_config(config: &ConfigHandle, host: Option<String>) -> AppConfig {
    let mut cfg = config.read().await.clone();
    if let Some(host) = host {
        cfg.realtime.base_url = host;
    }
    cfg
}

/// Render a server timestamp (seconds since the epoch, fractional) as local time.
pub fn format_timestamp(seconds: f64) -> String {
    let millis = (seconds * 1000.0) as i64;
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| seconds.to_string())
}

/// Truncate a string to a maximum number of characters, appending an ellipsis if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}

/// Mask a secret for display, keeping only its length visible.
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "*".repeat(secret.len().min(8))
    }
}
