//! # wsbridge
//!
//! Bridges TCP clients to a WebSocket server without either side knowing.
//!
//! ## Crates
//!
//! - [`wsbridge_core`] - Default configuration values and error classification
//! - [`wsbridge_server`] - Legs, sessions, registry, listener and shutdown

pub use wsbridge_core as core;
pub use wsbridge_server as server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use wsbridge_server::config::{apply_overrides, load_config, validate_config};
    pub use wsbridge_server::{
        BridgeConfig, BridgeError, CancellationToken, Server, SessionRegistry, run,
        run_with_shutdown,
    };
}
