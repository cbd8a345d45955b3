//! Convo Services - Conversation-level realtime orchestration.
//!
//! This crate sits on top of the Bayeux client and provides:
//! - The conversation monitor (resume/pause/close/reset lifecycle)
//! - Mapping of channel payloads to typed conversation events
//! - Authentication collaborators (token store, invalid-auth delegate)
//! - Event bus (broadcast delivery of monitor events)

pub mod auth;
pub mod event_bus;
pub mod mapper;
pub mod monitor;

// Re-export key types
pub use auth::{
    AuthenticationCallback, AuthenticationDelegate, AuthenticationError, MemoryTokenStore,
    TokenStore,
};
pub use event_bus::{EventBus, MonitorEvent};
pub use mapper::EventMapper;
pub use monitor::{ConnectionStatus, ConversationMonitor, ConversationMonitorBuilder};
