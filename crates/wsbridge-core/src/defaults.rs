//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Listener Defaults
// ============================================================================

/// Default listen address (all interfaces).
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";
/// Default TCP port accepting stream clients.
pub const DEFAULT_TCP_PORT: u16 = 25565;
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Default TCP_NODELAY (disable Nagle's algorithm for lower latency).
pub const DEFAULT_TCP_NO_DELAY: bool = true;

// ============================================================================
// Message Leg Defaults
// ============================================================================

/// Default WebSocket server every session connects to.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080";
/// Default timeout for the WebSocket handshake in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default max WebSocket message/frame size (0 = tungstenite default).
pub const DEFAULT_WS_MAX_FRAME_BYTES: usize = 0;

// ============================================================================
// Session Defaults
// ============================================================================

/// Default read buffer size per stream leg (16 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 16384;
/// Default depth of a session's event queue.
pub const DEFAULT_SESSION_QUEUE_DEPTH: usize = 64;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Logging Defaults
// ============================================================================

/// Default base log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default log format: "pretty", "compact" or "json".
pub const DEFAULT_LOG_FORMAT: &str = "pretty";
