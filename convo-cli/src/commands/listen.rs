//! Listen command - follow a user's conversations in real time.

use std::sync::Arc;

use console::style;
use dialoguer::Password;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use convo_core::config::ConfigHandle;
use convo_core::error::{ConvoError, ConvoResult};
use convo_services::{
    AuthenticationCallback, AuthenticationDelegate, AuthenticationError, ConversationMonitorBuilder,
    MemoryTokenStore, MonitorEvent,
};
use convo_socket::ConnectionState;

use crate::OutputFormat;

type AuthRequest = (AuthenticationError, AuthenticationCallback);

/// Forwards invalid-auth notifications to the command loop, where the
/// user is prompted for a new token.
struct PromptDelegate {
    requests: mpsc::UnboundedSender<AuthRequest>,
}

impl AuthenticationDelegate for PromptDelegate {
    fn on_invalid_auth(&self, error: AuthenticationError, callback: AuthenticationCallback) {
        let _ = self.requests.send((error, callback));
    }
}

/// Run the listen command.
pub async fn run(
    config: ConfigHandle,
    host: Option<String>,
    jwt: Option<String>,
    format: OutputFormat,
) -> ConvoResult<()> {
    let mut cfg = super::effective_config(&config, host).await;
    if let Some(jwt) = jwt {
        cfg.sdk.jwt = jwt;
    }
    if !cfg.realtime.enabled {
        println!(
            "  {} Realtime is disabled in the configuration (realtime.enabled = false).",
            style("WARN").yellow()
        );
        return Ok(());
    }

    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel();
    let tokens = Arc::new(MemoryTokenStore::new(
        Some(cfg.sdk.jwt.clone()),
        Some(cfg.sdk.session_token.clone()),
    ));
    let monitor = ConversationMonitorBuilder::from_config(&cfg)
        .token_store(tokens)
        .authentication_delegate(Arc::new(PromptDelegate { requests: auth_tx }))
        .build()?;
    let mut events = monitor.subscribe();
    let mut states = monitor.state_changes();

    if matches!(format, OutputFormat::Text) {
        println!(
            "{} Listening on {} as {}...",
            style("[1/2]").bold().dim(),
            cfg.realtime.base_url,
            style(monitor.app_user_id()).cyan()
        );
    }

    let delay = cfg.realtime.connection_delay();
    if !delay.is_zero() {
        info!("delaying realtime connection by {delay:?}");
        tokio::time::sleep(delay).await;
    }
    monitor.resume();

    // The prompt runs on a blocking thread; its answer comes back here so
    // events and Ctrl+C stay live while the user types.
    let (answer_tx, mut answer_rx) = mpsc::unbounded_channel();
    let mut pending: Option<AuthenticationCallback> = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ev) => print_event(&ev, format),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        println!(
                            "  {} Missed {n} events (slow consumer)",
                            style("WARN").yellow()
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                if state == ConnectionState::Reconnecting && matches!(format, OutputFormat::Text) {
                    println!("  {} Reconnecting...", style("WAIT").yellow());
                }
            }
            Some((error, callback)) = auth_rx.recv() => {
                println!(
                    "  {} Server rejected credentials: {error}",
                    style("AUTH").red().bold()
                );
                // A newer callback supersedes the one the open prompt was for.
                if pending.replace(callback).is_none() {
                    spawn_token_prompt(ask_for_token, answer_tx.clone());
                }
            }
            Some(answer) = answer_rx.recv() => {
                let Some(callback) = pending.take() else {
                    continue;
                };
                let token = answer?;
                if token.is_empty() {
                    warn!("no token entered, staying disconnected");
                    println!("  Staying disconnected. Press Ctrl+C to exit.");
                    continue;
                }
                callback.update_token(&token);
                config.write().await.sdk.jwt = token;
                if let Err(e) = config.save().await {
                    warn!("failed to persist refreshed token: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Disconnecting...");
                monitor.close();
                if pending.is_some() {
                    println!("  Press Enter to dismiss the token prompt.");
                }
                break;
            }
        }
    }

    Ok(())
}

/// Run `ask` on a blocking thread and send the answer back.
fn spawn_token_prompt<F>(ask: F, answers: mpsc::UnboundedSender<ConvoResult<String>>)
where
    F: FnOnce() -> std::io::Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let answer = ask().map_err(|e| ConvoError::Internal(e.to_string()));
        let _ = answers.send(answer);
    });
}

fn ask_for_token() -> std::io::Result<String> {
    Password::new()
        .with_prompt("New JWT (empty to skip)")
        .allow_empty_password(true)
        .interact()
        .map_err(std::io::Error::other)
}

fn print_event(event: &MonitorEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(event).unwrap_or_default());
        }
        OutputFormat::Text => println!("{}", describe_event(event)),
    }
}

fn describe_event(event: &MonitorEvent) -> String {
    match event {
        MonitorEvent::Connected => format!(
            "{} {} Connected. Listening for events... (Ctrl+C to stop)",
            style("[2/2]").bold().dim(),
            style("OK").green().bold()
        ),
        MonitorEvent::Disconnected => format!("  {} Disconnected", style("DOWN").red().bold()),
        MonitorEvent::MessageReceived {
            conversation_id,
            message,
        } => {
            let when = message
                .received
                .map(super::format_timestamp)
                .unwrap_or_default();
            let author = message
                .name
                .as_deref()
                .or(message.role.as_deref())
                .unwrap_or("unknown");
            let body = message
                .text
                .as_deref()
                .filter(|t| !t.is_empty())
                .or(message.media_url.as_deref())
                .unwrap_or("");
            format!(
                "  {} {} {} {}: {}",
                style("[message]").cyan(),
                style(when).dim(),
                conversation_id,
                style(author).bold(),
                super::truncate(body, 120)
            )
        }
        MonitorEvent::MessageRejected { message_id, .. } => {
            let reason = event.error().map(|e| e.to_string()).unwrap_or_default();
            format!("  {} {message_id}: {reason}", style("[rejected]").red())
        }
        MonitorEvent::ConversationActivity(activity) => {
            let who = activity
                .name
                .as_deref()
                .or(activity.user_id.as_deref())
                .unwrap_or("");
            format!(
                "  {} {} {}",
                style(format!("[{}]", activity.event_type)).yellow(),
                activity.conversation_id,
                who
            )
        }
        MonitorEvent::UploadComplete(message) => format!(
            "  {} {} {}",
            style("[upload]").green(),
            message.id.as_deref().unwrap_or("?"),
            message.media_url.as_deref().unwrap_or("")
        ),
    }
}
