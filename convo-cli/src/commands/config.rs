//! Config commands - inspect and create the configuration file.

use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;
use dialoguer::{Input, Password};

use convo_core::config::{AppConfig, ConfigHandle};
use convo_core::error::{ConvoError, ConvoResult};

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Interactively create or update the configuration file.
    Init,
    /// Print the configuration file path.
    Path,
}

/// Flatten the config into `(key, value)` rows. Secrets are masked.
fn config_rows(cfg: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("sdk.app_id", cfg.sdk.app_id.clone()),
        ("sdk.app_user_id", cfg.sdk.app_user_id.clone()),
        ("sdk.client_id", cfg.sdk.client_id.clone()),
        ("sdk.jwt", super::mask_secret(&cfg.sdk.jwt)),
        ("sdk.session_token", super::mask_secret(&cfg.sdk.session_token)),
        ("realtime.enabled", cfg.realtime.enabled.to_string()),
        ("realtime.base_url", cfg.realtime.base_url.clone()),
        ("realtime.retry_interval_secs", cfg.realtime.retry_interval_secs.to_string()),
        (
            "realtime.max_connection_attempts",
            cfg.realtime.max_connection_attempts.to_string(),
        ),
        ("realtime.connection_delay_secs", cfg.realtime.connection_delay_secs.to_string()),
        ("realtime.connect_timeout_ms", cfg.realtime.connect_timeout_ms.to_string()),
        ("realtime.max_frame_size", cfg.realtime.max_frame_size.to_string()),
        ("logging.level", cfg.logging.level.clone()),
        ("logging.directory", cfg.logging.directory.clone()),
        ("logging.json_output", cfg.logging.json_output.to_string()),
    ]
}

pub async fn run(config: ConfigHandle, action: ConfigAction, format: OutputFormat) -> ConvoResult<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config.read().await;
            let rows = config_rows(&cfg);
            match format {
                OutputFormat::Json => {
                    let map: serde_json::Map<String, serde_json::Value> = rows
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&map).unwrap_or_default());
                }
                OutputFormat::Text => {
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["Key", "Value"]);
                    for (key, value) in rows {
                        table.add_row(vec![key.to_string(), value]);
                    }
                    println!("{table}");
                    if !cfg.is_realtime_configured() {
                        println!(
                            "{} realtime is not fully configured. Run `convo config init`.",
                            style("WARN").yellow()
                        );
                    }
                }
            }
        }
        ConfigAction::Init => {
            {
                let mut cfg = config.write().await;
                cfg.sdk.app_id = prompt("App id", &cfg.sdk.app_id)?;
                cfg.sdk.app_user_id = prompt("App user id", &cfg.sdk.app_user_id)?;
                cfg.realtime.base_url = prompt("Realtime server URL", &cfg.realtime.base_url)?;
                let jwt = Password::new()
                    .with_prompt("JWT (empty to keep current)")
                    .allow_empty_password(true)
                    .interact()
                    .map_err(|e| ConvoError::Internal(e.to_string()))?;
                if !jwt.is_empty() {
                    cfg.sdk.jwt = jwt;
                }
                cfg.realtime.websocket_url()?;
            }
            config.save().await?;
            println!("  {} Config saved to {}", style("OK").green(), config_path(&config));
        }
        ConfigAction::Path => {
            let path = config_path(&config);
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "path": path })),
                OutputFormat::Text => println!("{path}"),
            }
        }
    }
    Ok(())
}

fn config_path(config: &ConfigHandle) -> String {
    match config.path() {
        Some(path) => path.display().to_string(),
        None => AppConfig::default_config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|e| format!("<{e}>")),
    }
}

fn prompt(label: &str, current: &str) -> ConvoResult<String> {
    let mut input = Input::<String>::new().with_prompt(label);
    if !current.is_empty() {
        input = input.default(current.to_string());
    }
    input
        .interact_text()
        .map_err(|e| ConvoError::Internal(e.to_string()))
}
