//! Typed event bus for monitor output.
//!
//! Uses a tokio broadcast channel so any number of consumers (UI, storage,
//! the CLI printer) can follow the same realtime stream independently.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use convo_core::error::ConvoError;
use convo_models::{ConversationEvent, Message};

/// Everything the conversation monitor reports to the application.
///
/// These are processed, domain-level events. Raw Bayeux traffic never
/// reaches this layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// The realtime session is established.
    Connected,
    /// The realtime session was lost or ended.
    Disconnected,
    /// A message arrived in a conversation.
    MessageReceived {
        conversation_id: String,
        message: Message,
    },
    /// The server rejected one of this client's uploads.
    MessageRejected {
        message_id: String,
        status: u16,
        code: String,
    },
    /// Typing, read receipt or membership change.
    ConversationActivity(ConversationEvent),
    /// An upload sent by this client finished processing.
    UploadComplete(Message),
}

impl MonitorEvent {
    /// The application-level failure this event reports, if any.
    pub fn error(&self) -> Option<ConvoError> {
        match self {
            Self::MessageRejected { status, code, .. } => Some(ConvoError::Application {
                status: *status,
                code: code.clone(),
            }),
            _ => None,
        }
    }

    /// Human-readable label (for logging).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::MessageReceived { .. } => "MessageReceived",
            Self::MessageRejected { .. } => "MessageRejected",
            Self::ConversationActivity(_) => "ConversationActivity",
            Self::UploadComplete(_) => "UploadComplete",
        }
    }
}

/// Fan-out channel of [`MonitorEvent`]s.
///
/// Every subscriber gets every event. A subscriber that falls more than
/// `capacity` events behind receives `Lagged` and skips ahead.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<MonitorEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: MonitorEvent) {
        let label = event.label();
        match self.sender.send(event) {
            Ok(count) => debug!("event_bus: emitted {label} to {count} subscriber(s)"),
            Err(_) => debug!("event_bus: no subscribers for {label}"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(convo_core::constants::DEFAULT_EVENT_CAPACITY)
    }
}
