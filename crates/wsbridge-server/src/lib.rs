//! TCP to WebSocket session bridge.
//!
//! Every accepted TCP connection gets its own outbound WebSocket. Bytes read
//! from the TCP side go out as binary frames; frames received from the
//! WebSocket are written back to the TCP side as-is. When either side closes
//! or fails, the other is closed too and the session is forgotten.
//!
//! # Architecture
//!
//! - [`leg`]: the two transport legs behind one [`leg::Leg`] trait.
//! - [`session`]: per-connection state machine, one task per session.
//! - [`registry`]: live sessions by id, shared with shutdown.
//! - [`server`]: listener and dispatch.
//! - [`shutdown`]: closes every session before the listener goes away.

pub mod cli;
pub mod config;
mod error;
pub mod leg;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
mod util;

pub use cli::BridgeArgs;
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use registry::{SessionHandle, SessionId, SessionRegistry, SessionState};
pub use server::{Server, run, run_with_shutdown};
pub use shutdown::ShutdownCoordinator;
pub use tokio_util::sync::CancellationToken;
