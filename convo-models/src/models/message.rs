//! Chat message model as delivered by the realtime server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Image,
    File,
    Carousel,
    List,
    Location,
    Unknown(String),
}

impl MessageType {
    /// Parse a wire type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "image" => Self::Image,
            "file" => Self::File,
            "carousel" => Self::Carousel,
            "list" => Self::List,
            "location" => Self::Location,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Get the wire type string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Carousel => "carousel",
            Self::List => "list",
            Self::Location => "location",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Whether this type carries an uploaded attachment.
    pub fn is_upload(&self) -> bool {
        matches!(self, Self::Image | Self::File)
    }
}

/// Origin of a message: which integration and which client sent it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSource {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_timestamp: Option<f64>,
}

/// Geographic point attached to a location message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub long: f64,
}

/// A single conversation message.
///
/// Unknown fields are ignored so newer server payloads still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_fallback: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Seconds since the epoch, fractional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<MessageSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<f64>,
}

impl Message {
    /// Typed view of the `type` field. Missing types read as text.
    pub fn kind(&self) -> MessageType {
        self.message_type
            .as_deref()
            .map(MessageType::from_str)
            .unwrap_or(MessageType::Text)
    }

    /// Id of the client that sent this message, if the server echoed it.
    pub fn source_client_id(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.id.as_deref())
    }
}
