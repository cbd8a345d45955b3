//! Typed conversation events surfaced to the application.

use serde::{Deserialize, Serialize};

/// Kind of conversation-level activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationEventType {
    #[serde(rename = "typing:start")]
    TypingStart,
    #[serde(rename = "typing:stop")]
    TypingStop,
    #[serde(rename = "conversation:read")]
    ConversationRead,
    #[serde(rename = "conversation:added")]
    ConversationAdded,
    #[serde(rename = "conversation:removed")]
    ConversationRemoved,
    #[serde(rename = "participant:added")]
    ParticipantAdded,
    #[serde(rename = "participant:removed")]
    ParticipantRemoved,
}

impl ConversationEventType {
    /// Parse a wire value. Unrecognized values yield `None` and are dropped
    /// by the caller.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "typing:start" => Some(Self::TypingStart),
            "typing:stop" => Some(Self::TypingStop),
            "conversation:read" => Some(Self::ConversationRead),
            "conversation:added" => Some(Self::ConversationAdded),
            "conversation:removed" => Some(Self::ConversationRemoved),
            "participant:added" => Some(Self::ParticipantAdded),
            "participant:removed" => Some(Self::ParticipantRemoved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TypingStart => "typing:start",
            Self::TypingStop => "typing:stop",
            Self::ConversationRead => "conversation:read",
            Self::ConversationAdded => "conversation:added",
            Self::ConversationRemoved => "conversation:removed",
            Self::ParticipantAdded => "participant:added",
            Self::ParticipantRemoved => "participant:removed",
        }
    }
}

impl std::fmt::Display for ConversationEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the conversation performed an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationEventRole {
    /// The business side of the conversation.
    #[serde(rename = "appMaker", alias = "business")]
    AppMaker,
    /// The end user running this SDK.
    #[serde(rename = "appUser")]
    AppUser,
}

impl ConversationEventRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "appMaker" | "business" => Some(Self::AppMaker),
            "appUser" => Some(Self::AppUser),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppMaker => "appMaker",
            Self::AppUser => "appUser",
        }
    }
}

/// A conversation-level event: typing, read receipts, membership changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub event_type: ConversationEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ConversationEventRole>,
    /// App user who performed the activity or joined/left the conversation.
    #[serde(rename = "appUserId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Seconds since the epoch, fractional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read: Option<f64>,
}

impl ConversationEvent {
    /// Create an event with only the conversation and type set.
    pub fn new(conversation_id: impl Into<String>, event_type: ConversationEventType) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            event_type,
            role: None,
            user_id: None,
            name: None,
            avatar_url: None,
            last_read: None,
        }
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}
