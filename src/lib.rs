//! Realtime connection and conversation-sync layer for the CarLink client
//!
//! Owns the single persistent WebSocket to the CarLink backend and everything
//! built on top of it: reconnection with exponential backoff, the typed
//! publish/subscribe frame router, per-conversation session state (join/leave,
//! typing indicators, message reconciliation) and the simplified connectivity
//! signal consumed by the screens.

pub mod client;
pub mod config;
pub mod frame;
pub mod logging;
pub mod manager;
pub mod observer;
pub mod router;
pub mod session;
pub mod socket;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use client::RealtimeClient;
pub use config::RealtimeConfig;
pub use frame::{kind, ChatMessage, Frame};
pub use manager::{ChangeGuard, ConnectionInfo, ConnectionManager, LinkState};
pub use observer::ConnectionStateObserver;
pub use router::{EventRouter, Subscription};
pub use session::{ConversationSession, FrameSender};
pub use socket::{SocketConnector, SocketError, WsConnector};

use thiserror::Error;

/// Main error type for the realtime layer
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Socket error: {0}")]
    Socket(#[from] socket::SocketError),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RealtimeError>;
