pub mod conversation_event;
pub mod message;
pub mod realtime;
