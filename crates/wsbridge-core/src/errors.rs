//! Error type constants for logging.
//!
//! These constants give every crate the same error classification, so log
//! lines can be filtered on a stable `error_type` field.

/// Listener could not claim its address.
pub const ERROR_BIND: &str = "bind";
/// I/O error on the stream leg.
pub const ERROR_IO: &str = "io";
/// WebSocket protocol or transport error on the message leg.
pub const ERROR_WEBSOCKET: &str = "websocket";
/// Message leg target could not be turned into a connect request.
pub const ERROR_TARGET: &str = "target";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
/// Session registry invariant violated.
pub const ERROR_REGISTRY: &str = "registry";
