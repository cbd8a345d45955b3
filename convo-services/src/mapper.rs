//! Translation of realtime channel payloads into [`MonitorEvent`]s.
//!
//! Routing by event `type`:
//! - `message`: an image or file whose source is this client is an upload
//!   completion; anything else is a received message
//! - `activity`: typing and read receipts; the conversation's
//!   `appMakerLastRead` wins over the payload's own `lastRead` for business
//!   activity
//! - `upload:failed`: reported only when it concerns this client
//! - `conversation:*` / `participant:*`: membership changes
//!
//! Unknown types and events missing the fields they need are dropped.

use serde_json::{Map, Value};
use tracing::debug;

use convo_models::models::realtime::{WsActivity, WsClient, WsError, WsErrorData, WsParticipant};
use convo_models::{
    ConversationEvent, ConversationEventRole, ConversationEventType, Message, WsEnvelope, WsEvent,
    WsEventType,
};

use crate::event_bus::MonitorEvent;

/// Maps channel payloads for one client id.
#[derive(Debug, Clone)]
pub struct EventMapper {
    client_id: String,
}

impl EventMapper {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    /// Map a `{"events": [...]}` payload. Entries are handled in order.
    pub fn map_payload(&self, data: &Map<String, Value>) -> Vec<MonitorEvent> {
        let envelope: WsEnvelope = match serde_json::from_value(Value::Object(data.clone())) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("payload is not an event envelope: {e}");
                return Vec::new();
            }
        };
        envelope
            .parse_events()
            .iter()
            .filter_map(|event| self.map_event(event))
            .collect()
    }

    pub fn map_event(&self, event: &WsEvent) -> Option<MonitorEvent> {
        let kind = event.kind();
        let conversation_id = event.conversation_id().unwrap_or_default();

        match kind {
            WsEventType::Message => self.message_event(conversation_id, event.message.as_ref()?),
            WsEventType::Activity => activity_event(
                conversation_id,
                event.activity.as_ref()?,
                event.conversation.as_ref().and_then(|c| c.app_maker_last_read),
            ),
            WsEventType::UploadFailed => {
                self.rejection_event(event.client.as_ref()?, event.data.as_ref()?, event.err.as_ref()?)
            }
            WsEventType::ConversationAdded | WsEventType::ConversationRemoved => {
                let event_type = ConversationEventType::from_str(kind.as_str())?;
                Some(MonitorEvent::ConversationActivity(ConversationEvent::new(
                    conversation_id,
                    event_type,
                )))
            }
            WsEventType::ParticipantAdded | WsEventType::ParticipantRemoved => {
                participant_event(conversation_id, kind.as_str(), event.participant.as_ref()?)
            }
            WsEventType::Unknown(other) => {
                debug!("dropping realtime event of unknown type '{other}'");
                None
            }
        }
    }

    fn message_event(&self, conversation_id: &str, message: &Message) -> Option<MonitorEvent> {
        let own_upload =
            message.source_client_id() == Some(self.client_id.as_str()) && message.kind().is_upload();
        if own_upload {
            return Some(MonitorEvent::UploadComplete(message.clone()));
        }
        Some(MonitorEvent::MessageReceived {
            conversation_id: conversation_id.to_string(),
            message: message.clone(),
        })
    }

    fn rejection_event(&self, client: &WsClient, data: &WsErrorData, err: &WsError) -> Option<MonitorEvent> {
        if client.id.as_deref() != Some(self.client_id.as_str()) {
            debug!("upload failure for another client, ignoring");
            return None;
        }
        Some(MonitorEvent::MessageRejected {
            message_id: data.message_id.clone().unwrap_or_default(),
            status: err.status,
            code: err.code.clone().unwrap_or_default(),
        })
    }
}

fn activity_event(
    conversation_id: &str,
    activity: &WsActivity,
    app_maker_last_read: Option<f64>,
) -> Option<MonitorEvent> {
    let Some(event_type) = activity.activity_type.as_deref().and_then(ConversationEventType::from_str) else {
        debug!("dropping activity of unknown type {:?}", activity.activity_type);
        return None;
    };

    let role = activity.role.as_deref().and_then(ConversationEventRole::from_str);
    let mut event = ConversationEvent::new(conversation_id, event_type);
    event.role = role;
    event.user_id = activity.app_user_id.clone();
    if let Some(data) = &activity.data {
        event.name = data.name.clone();
        event.avatar_url = data.avatar_url.clone();
        event.last_read = data.last_read;
    }
    if role == Some(ConversationEventRole::AppMaker) && app_maker_last_read.is_some() {
        event.last_read = app_maker_last_read;
    }
    Some(MonitorEvent::ConversationActivity(event))
}

fn participant_event(conversation_id: &str, kind: &str, participant: &WsParticipant) -> Option<MonitorEvent> {
    let event_type = ConversationEventType::from_str(kind)?;
    let event = ConversationEvent::new(conversation_id, event_type)
        .with_user_id(participant.app_user_id.clone());
    Some(MonitorEvent::ConversationActivity(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper() -> EventMapper {
        EventMapper::new("client-1")
    }

    fn map_one(event: Value) -> Option<MonitorEvent> {
        let data = json!({ "events": [event] });
        mapper().map_payload(data.as_object().unwrap()).into_iter().next()
    }

    #[test]
    fn test_message_received() {
        let event = map_one(json!({
            "type": "message",
            "conversation": {"_id": "conv-1"},
            "message": {"_id": "m1", "type": "text", "text": "hello", "role": "appMaker"}
        }));
        match event {
            Some(MonitorEvent::MessageReceived { conversation_id, message }) => {
                assert_eq!(conversation_id, "conv-1");
                assert_eq!(message.text.as_deref(), Some("hello"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_own_upload_completes() {
        let event = map_one(json!({
            "type": "message",
            "conversation": {"_id": "conv-1"},
            "message": {"_id": "m2", "type": "image", "source": {"type": "android", "id": "client-1"}}
        }));
        assert!(matches!(event, Some(MonitorEvent::UploadComplete(ref m)) if m.id.as_deref() == Some("m2")));
    }

    #[test]
    fn test_upload_from_other_client_or_text_is_a_message() {
        let other_client = map_one(json!({
            "type": "message",
            "conversation": {"_id": "c"},
            "message": {"type": "file", "source": {"id": "client-2"}}
        }));
        assert!(matches!(other_client, Some(MonitorEvent::MessageReceived { .. })));

        let own_text = map_one(json!({
            "type": "message",
            "conversation": {"_id": "c"},
            "message": {"type": "text", "source": {"id": "client-1"}}
        }));
        assert!(matches!(own_text, Some(MonitorEvent::MessageReceived { .. })));
    }

    #[test]
    fn test_activity_uses_app_maker_last_read() {
        let event = map_one(json!({
            "type": "activity",
            "conversation": {"_id": "conv-1", "appMakerLastRead": 200.5},
            "activity": {
                "role": "appMaker",
                "type": "conversation:read",
                "data": {"name": "Support", "avatarUrl": "https://a/b.png", "lastRead": 100.0}
            }
        }));
        match event {
            Some(MonitorEvent::ConversationActivity(e)) => {
                assert_eq!(e.event_type, ConversationEventType::ConversationRead);
                assert_eq!(e.role, Some(ConversationEventRole::AppMaker));
                assert_eq!(e.name.as_deref(), Some("Support"));
                assert_eq!(e.avatar_url.as_deref(), Some("https://a/b.png"));
                assert_eq!(e.last_read, Some(200.5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_app_user_activity_keeps_own_last_read() {
        let event = map_one(json!({
            "type": "activity",
            "conversation": {"_id": "conv-1", "appMakerLastRead": 200.5},
            "activity": {
                "role": "appUser",
                "type": "typing:start",
                "appUserId": "u9",
                "data": {"lastRead": 100.0}
            }
        }));
        match event {
            Some(MonitorEvent::ConversationActivity(e)) => {
                assert_eq!(e.event_type, ConversationEventType::TypingStart);
                assert_eq!(e.user_id.as_deref(), Some("u9"));
                assert_eq!(e.last_read, Some(100.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_activity_dropped() {
        let event = map_one(json!({
            "type": "activity",
            "conversation": {"_id": "conv-1"},
            "activity": {"role": "appUser", "type": "dancing"}
        }));
        assert!(event.is_none());
    }

    #[test]
    fn test_upload_failed_only_for_own_client() {
        let own = map_one(json!({
            "type": "upload:failed",
            "conversation": {"_id": "c"},
            "client": {"id": "client-1"},
            "data": {"messageId": "m5"},
            "err": {"status": 413, "code": "file_too_large"}
        }));
        assert_eq!(
            own,
            Some(MonitorEvent::MessageRejected {
                message_id: "m5".into(),
                status: 413,
                code: "file_too_large".into()
            })
        );

        let other = map_one(json!({
            "type": "upload:failed",
            "client": {"id": "client-2"},
            "data": {"messageId": "m5"},
            "err": {"status": 413, "code": "file_too_large"}
        }));
        assert!(other.is_none());

        let incomplete = map_one(json!({"type": "upload:failed", "client": {"id": "client-1"}}));
        assert!(incomplete.is_none());
    }

    #[test]
    fn test_conversation_and_participant_events() {
        let added = map_one(json!({"type": "conversation:added", "conversation": {"_id": "c7"}}));
        assert_eq!(
            added,
            Some(MonitorEvent::ConversationActivity(ConversationEvent::new(
                "c7",
                ConversationEventType::ConversationAdded
            )))
        );

        let removed = map_one(json!({
            "type": "participant:removed",
            "conversation": {"_id": "c7"},
            "participant": {"appUserId": "u3"}
        }));
        match removed {
            Some(MonitorEvent::ConversationActivity(e)) => {
                assert_eq!(e.event_type, ConversationEventType::ParticipantRemoved);
                assert_eq!(e.user_id.as_deref(), Some("u3"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let no_participant = map_one(json!({"type": "participant:added", "conversation": {"_id": "c7"}}));
        assert!(no_participant.is_none());
    }

    #[test]
    fn test_payload_order_and_unknown_types() {
        let data = json!({"events": [
            {"type": "conversation:removed", "conversation": {"_id": "a"}},
            {"type": "presence:changed", "conversation": {"_id": "b"}},
            42,
            {"type": "conversation:added", "conversation": {"_id": "c"}}
        ]});
        let events = mapper().map_payload(data.as_object().unwrap());
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], MonitorEvent::ConversationActivity(e) if e.conversation_id == "a"));
        assert!(matches!(&events[1], MonitorEvent::ConversationActivity(e) if e.conversation_id == "c"));

        let not_envelope = json!({"events": "nope"});
        assert!(mapper().map_payload(not_envelope.as_object().unwrap()).is_empty());
    }
}
