//! Wire DTOs for the application payload published on a user's realtime channel.
//!
//! The payload is `{"events": [...]}`. Each event is parsed on its own so one
//! malformed entry does not discard the rest of the batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::message::Message;

/// Discriminator of a realtime event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEventType {
    Message,
    UploadFailed,
    Activity,
    ConversationAdded,
    ConversationRemoved,
    ParticipantAdded,
    ParticipantRemoved,
    Unknown(String),
}

impl WsEventType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "message" => Self::Message,
            "upload:failed" => Self::UploadFailed,
            "activity" => Self::Activity,
            "conversation:added" => Self::ConversationAdded,
            "conversation:removed" => Self::ConversationRemoved,
            "participant:added" => Self::ParticipantAdded,
            "participant:removed" => Self::ParticipantRemoved,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::UploadFailed => "upload:failed",
            Self::Activity => "activity",
            Self::ConversationAdded => "conversation:added",
            Self::ConversationRemoved => "conversation:removed",
            Self::ParticipantAdded => "participant:added",
            Self::ParticipantRemoved => "participant:removed",
            Self::Unknown(s) => s.as_str(),
        }
    }
}

/// Top-level payload: a batch of events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(default)]
    pub events: Vec<Value>,
}

impl WsEnvelope {
    /// Parse every event in the batch, skipping entries that fail to decode.
    pub fn parse_events(&self) -> Vec<WsEvent> {
        self.events
            .iter()
            .filter_map(|raw| match serde_json::from_value::<WsEvent>(raw.clone()) {
                Ok(event) => Some(event),
                Err(e) => {
                    debug!("skipping malformed realtime event: {e}");
                    None
                }
            })
            .collect()
    }
}

/// One realtime event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<WsConversation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<WsActivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<WsParticipant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<WsClient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<WsError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<WsErrorData>,
}

impl WsEvent {
    pub fn kind(&self) -> WsEventType {
        WsEventType::from_str(&self.event_type)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().and_then(|c| c.id.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsConversation {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    /// When the business side last read the conversation.
    #[serde(default)]
    pub app_maker_last_read: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsActivity {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(rename = "type", default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub app_user_id: Option<String>,
    #[serde(default)]
    pub data: Option<WsActivityData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsActivityData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub last_read: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParticipant {
    #[serde(default)]
    pub app_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsClient {
    #[serde(default)]
    pub id: Option<String>,
}

/// Rejection details attached to `upload:failed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsError {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsErrorData {
    #[serde(default)]
    pub message_id: Option<String>,
}
