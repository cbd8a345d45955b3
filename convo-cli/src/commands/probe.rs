//! Probe command - perform the WebSocket upgrade and report the outcome.

use std::sync::Arc;
use std::time::Instant;

use console::style;
use tokio::sync::mpsc;

use convo_core::config::ConfigHandle;
use convo_core::error::{ConvoError, ConvoResult};
use convo_socket::handshake::WsUrl;
use convo_socket::{FailureKind, TcpConnector, Transport, TransportEventKind, TransportOptions};

use crate::OutputFormat;

/// Outcome of a single upgrade attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeOutcome {
    Open,
    Failed { kind: FailureKind, detail: String },
    Closed { code: Option<u16>, reason: String },
}

impl ProbeOutcome {
    fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Open => "open",
            ProbeOutcome::Failed { kind, .. } => match kind {
                FailureKind::Authentication => "unauthorized",
                FailureKind::Protocol => "protocol_error",
                FailureKind::Transient => "unreachable",
            },
            ProbeOutcome::Closed { .. } => "closed",
        }
    }
}

/// Run the probe command.
pub async fn run(config: ConfigHandle, host: Option<String>, format: OutputFormat) -> ConvoResult<()> {
    let cfg = super::effective_config(&config, host).await;
    let url = cfg.realtime.websocket_url()?;
    let ws_url = WsUrl::parse(&url).map_err(ConvoError::from)?;

    if matches!(format, OutputFormat::Text) {
        println!("{} Upgrading {}...", style("[1/1]").bold().dim(), url);
    }

    let options = TransportOptions {
        connect_timeout: cfg.realtime.connect_timeout(),
        max_frame_size: cfg.realtime.max_frame_size,
        fragment_size: cfg.realtime.fragment_size,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let start = Instant::now();
    let transport = Transport::open(1, ws_url, options, Arc::new(TcpConnector::new()), tx);

    let outcome = match rx.recv().await.map(|event| event.kind) {
        Some(TransportEventKind::Opened) => ProbeOutcome::Open,
        Some(TransportEventKind::Error(e)) => ProbeOutcome::Failed {
            kind: e.kind(),
            detail: e.to_string(),
        },
        Some(TransportEventKind::Closed { code, reason }) => ProbeOutcome::Closed { code, reason },
        Some(TransportEventKind::Message(_)) | None => ProbeOutcome::Closed {
            code: None,
            reason: "connection task ended".into(),
        },
    };
    let latency_ms = start.elapsed().as_millis();
    transport.disconnect();

    match format {
        OutputFormat::Json => {
            let mut json = serde_json::json!({
                "url": url,
                "status": outcome.label(),
                "latency_ms": latency_ms,
            });
            match &outcome {
                ProbeOutcome::Failed { detail, .. } => json["error"] = serde_json::json!(detail),
                ProbeOutcome::Closed { code, reason } => {
                    json["close_code"] = serde_json::json!(code);
                    json["close_reason"] = serde_json::json!(reason);
                }
                ProbeOutcome::Open => {}
            }
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputFormat::Text => match &outcome {
            ProbeOutcome::Open => println!(
                "  {} WebSocket upgrade accepted in {latency_ms} ms.",
                style("OK").green().bold()
            ),
            ProbeOutcome::Failed { kind, detail } => {
                let hint = match kind {
                    FailureKind::Authentication => "check sdk.jwt / sdk.session_token",
                    FailureKind::Protocol => "the endpoint does not speak WebSocket",
                    FailureKind::Transient => "server unreachable or too slow",
                };
                println!("  {} {detail}", style("FAIL").red().bold());
                println!("  {}", style(hint).dim());
            }
            ProbeOutcome::Closed { code, reason } => println!(
                "  {} Connection closed during upgrade (code {}): {reason}",
                style("FAIL").red().bold(),
                code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
            ),
        },
    }

    Ok(())
}
