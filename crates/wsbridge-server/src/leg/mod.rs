//! Transport legs.
//!
//! A leg wraps one side of a bridged session behind the same capability set,
//! whichever transport carries it:
//!
//! - [`StreamLeg`]: the accepted TCP connection. Ready on construction, no
//!   message boundaries.
//! - [`MessageLeg`]: the outbound WebSocket. Ready once the handshake
//!   completes, one event per data frame.
//!
//! Inbound traffic is never delivered by callback. Each leg runs a reader task
//! that turns transport activity into [`SessionEvent`]s on the owning
//! session's queue, so the session task is the only code that reacts to them.

mod message;
mod stream;

pub use message::{MessageLeg, MessageLegOptions};
pub use stream::StreamLeg;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::BridgeError;

/// Which side of the session a leg (or an event) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegSide {
    Stream,
    Message,
}

impl LegSide {
    pub fn other(self) -> Self {
        match self {
            LegSide::Stream => LegSide::Message,
            LegSide::Message => LegSide::Stream,
        }
    }
}

impl fmt::Display for LegSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegSide::Stream => f.write_str("stream"),
            LegSide::Message => f.write_str("message"),
        }
    }
}

/// Something that happened on a leg.
#[derive(Debug)]
pub enum LegEvent {
    /// The leg can accept `send` calls.
    Ready,
    /// One TCP read or one WebSocket data frame, byte for byte.
    Data(Bytes),
    /// Transport error. Zero or more precede `Closed`; does not close the leg.
    Error(BridgeError),
    /// The connection is finished. Delivered at most once per leg.
    Closed,
}

/// A leg event tagged with its origin.
#[derive(Debug)]
pub struct SessionEvent {
    pub side: LegSide,
    pub event: LegEvent,
}

/// Sender half of a session's event queue.
pub type EventSender = mpsc::Sender<SessionEvent>;

/// Boxed future returned by [`Leg`] operations.
pub type LegFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Uniform capability set of one side of a session.
pub trait Leg: Send + 'static {
    fn side(&self) -> LegSide;

    /// True once `send` will reach the transport.
    fn is_ready(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Called by the session when this leg's `Ready` event is processed.
    fn activate(&mut self) {}

    /// Write one payload. Dropped without error if the leg is not ready or
    /// already closed.
    fn send(&mut self, payload: Bytes) -> LegFuture<'_, Result<(), BridgeError>>;

    /// Close the connection and stop the reader task. Idempotent.
    fn close(&mut self) -> LegFuture<'_, ()>;
}

/// Reader-task side of the event queue, tagged with the leg it reports for.
#[derive(Clone)]
pub(crate) struct LegEvents {
    side: LegSide,
    tx: EventSender,
}

impl LegEvents {
    pub(crate) fn new(side: LegSide, tx: EventSender) -> Self {
        Self { side, tx }
    }

    /// Queue an event. Returns false once the session has gone away.
    pub(crate) async fn emit(&self, event: LegEvent) -> bool {
        self.tx
            .send(SessionEvent {
                side: self.side,
                event,
            })
            .await
            .is_ok()
    }

    /// Report a fatal transport error followed by the close.
    pub(crate) async fn fail(&self, err: BridgeError) {
        if self.emit(LegEvent::Error(err)).await {
            self.emit(LegEvent::Closed).await;
        }
    }
}
