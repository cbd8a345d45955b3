//! Convo Models - Domain and wire types for realtime conversation events.
//!
//! This crate owns the serde models shared by the socket and service layers:
//! chat messages, typed conversation events, and the envelope DTOs the
//! realtime server publishes on a user's channel.

pub mod models;

// Re-export key types
pub use models::conversation_event::{ConversationEvent, ConversationEventRole, ConversationEventType};
pub use models::message::{Message, MessageSource, MessageType};
pub use models::realtime::{WsEnvelope, WsEvent, WsEventType};
