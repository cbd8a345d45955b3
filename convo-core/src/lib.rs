//! Convo Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other Convo crates:
//! - Application configuration (SDK identity, realtime settings, logging)
//! - Global error types covering all error categories
//! - Structured logging with tracing
//! - Config and log directory resolution
//! - Common constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod paths;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{ConvoError, ConvoResult};
pub use logging::init_logging;
