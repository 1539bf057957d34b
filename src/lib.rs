//! Resilient WebSocket client
//!
//! One connection, kept alive with a periodic heartbeat and re-established
//! on a fixed interval up to a bounded number of attempts. Calling code
//! observes it through message/open/close/error subscriptions.

pub mod infrastructure;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::{ClientConfig, Config, LoggingConfig};
pub use ws::{
    ClientStatus, CloseEvent, ErrorEvent, ErrorSource, InboundMessage, LifecyclePhase, OpenEvent,
    Payload, ReadyState, SocketClient, Subscription,
};

use thiserror::Error;

/// Main error type for the socket client
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Handshake request error: {0}")]
    Request(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No tokio runtime: {0}")]
    Runtime(String),

    #[error("Transport closed")]
    TransportClosed,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SocketError>;
