//! Convo Socket - WebSocket transport and Bayeux client for realtime events.
//!
//! This crate provides the protocol stack below the conversation monitor:
//! - RFC 6455 frame codec with fragmentation and masking
//! - HTTP Upgrade handshake over TCP or TLS
//! - Transport task with serialized writes and a pluggable connector
//! - Bayeux client actor with bounded, fixed-interval reconnection
//! - Channel pattern matching for the active subscription

pub mod channel;
pub mod client;
pub mod error;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod reconnect;
pub mod transport;

// Re-export key types
pub use channel::ChannelPattern;
pub use client::{BayeuxClient, BayeuxConfig, BayeuxHandle};
pub use error::{FailureKind, FrameError, TransportError};
pub use events::{BayeuxEvent, ConnectionState, DisconnectReason};
pub use frame::{Frame, FrameCodec, Message, MessageCodec, Opcode, Role};
pub use message::{BayeuxMessage, Extension};
pub use reconnect::ReconnectPolicy;
pub use transport::{
    BoxedStream, Connector, TcpConnector, Transport, TransportEvent, TransportEventKind,
    TransportOptions,
};
