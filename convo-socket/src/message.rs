//! Bayeux message model and builders for the meta channels.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use convo_core::constants::bayeux::{
    CONNECTION_TYPE, META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE,
    META_UNSUBSCRIBE, MINIMUM_VERSION, SUPPORTED_CONNECTION_TYPES, VERSION,
};

/// Authentication extension attached to subscribe requests.
pub type Extension = Map<String, Value>;

/// One Bayeux message. Fields the client does not model are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BayeuxMessage {
    #[serde(default)]
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Extension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

static PUBLISH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl BayeuxMessage {
    fn on(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ..Default::default()
        }
    }

    pub fn handshake() -> Self {
        Self {
            version: Some(VERSION.to_string()),
            minimum_version: Some(MINIMUM_VERSION.to_string()),
            supported_connection_types: Some(
                SUPPORTED_CONNECTION_TYPES.iter().map(|s| s.to_string()).collect(),
            ),
            ..Self::on(META_HANDSHAKE)
        }
    }

    pub fn connect(client_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            connection_type: Some(CONNECTION_TYPE.to_string()),
            ..Self::on(META_CONNECT)
        }
    }

    /// Subscribe request. Extension fields are sent both at the top level
    /// and under `ext`; the realtime server reads them from either place.
    pub fn subscribe(client_id: &str, subscription: &str, ext: Option<&Extension>) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::on(META_SUBSCRIBE)
        }
        .with_merged_ext(ext)
    }

    /// Unsubscribe request, carrying the extension the same way as subscribe.
    pub fn unsubscribe(client_id: &str, subscription: &str, ext: Option<&Extension>) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::on(META_UNSUBSCRIBE)
        }
        .with_merged_ext(ext)
    }

    pub fn disconnect(client_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            ..Self::on(META_DISCONNECT)
        }
    }

    /// Application publish with a generated `msg_{millis}_{sequence}` id.
    pub fn publish(channel: &str, client_id: &str, data: Value, ext: Option<&Extension>) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            data: Some(data),
            id: Some(next_message_id()),
            ext: ext.cloned(),
            ..Self::on(channel)
        }
    }

    fn with_merged_ext(mut self, ext: Option<&Extension>) -> Self {
        if let Some(ext) = ext {
            for (key, value) in ext {
                self.extra.insert(key.clone(), value.clone());
            }
            self.ext = Some(ext.clone());
        }
        self
    }

    pub fn is_successful(&self) -> bool {
        self.successful.unwrap_or(false)
    }

    /// `data` when it is a JSON object.
    pub fn data_object(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref().and_then(Value::as_object)
    }
}

/// Unique id for a published message.
pub fn next_message_id() -> String {
    let seq = PUBLISH_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1;
    format!("msg_{}_{}", chrono::Utc::now().timestamp_millis(), seq)
}

/// Error string the server uses when it no longer knows our client id.
pub fn unknown_client_error(client_id: &str) -> String {
    format!("401:{client_id}:Unknown client")
}

/// Serialize a batch as the JSON array sent in one text frame.
pub fn encode_batch(messages: &[BayeuxMessage]) -> Result<String, serde_json::Error> {
    serde_json::to_string(messages)
}

/// Parse one inbound text frame. The server sends an array; a bare object is
/// accepted too. Entries that are not Bayeux messages are skipped.
pub fn decode_batch(text: &str) -> Result<Vec<BayeuxMessage>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            debug!("ignoring non-object bayeux frame: {other}");
            Vec::new()
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<BayeuxMessage>(item) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!("skipping malformed bayeux message: {e}");
                None
            }
        })
        .collect())
}
