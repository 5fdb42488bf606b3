//! Bridge error types.

use std::net::SocketAddr;

use tokio_tungstenite::tungstenite;
use wsbridge_core::{
    ERROR_BIND, ERROR_CONFIG, ERROR_IO, ERROR_REGISTRY, ERROR_TARGET, ERROR_TIMEOUT,
    ERROR_WEBSOCKET,
};

use crate::registry::SessionId;

/// Bridge error type.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("invalid websocket target {url}: {reason}")]
    InvalidTarget { url: String, reason: String },
    #[error("websocket connect to {0} timed out")]
    ConnectTimeout(String),
    #[error("config: {0}")]
    Config(String),
    #[error("session {0} already registered")]
    DuplicateSession(SessionId),
}

impl BridgeError {
    /// Get the error type string for log fields.
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::Bind { .. } => ERROR_BIND,
            BridgeError::Io(_) => ERROR_IO,
            BridgeError::WebSocket(_) => ERROR_WEBSOCKET,
            BridgeError::InvalidTarget { .. } => ERROR_TARGET,
            BridgeError::ConnectTimeout(_) => ERROR_TIMEOUT,
            BridgeError::Config(_) => ERROR_CONFIG,
            BridgeError::DuplicateSession(_) => ERROR_REGISTRY,
        }
    }
}
