//! Per-connection bridging state machine.
//!
//! A session owns one stream leg and one message leg and is driven by a
//! single task consuming its event queue, which makes that task the only
//! writer of the session's state:
//!
//! ```text
//! Connecting --message ready--> Relaying
//! Connecting | Relaying --close/error on either leg--> Closing --> Closed
//! ```
//!
//! Teardown runs in a fixed order: mark `Closing` so nothing else is relayed,
//! close the leg that did not report the event, mark `Closed`, then remove the
//! session from the registry.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::leg::{Leg, LegEvent, LegSide, SessionEvent};
use crate::registry::{SessionId, SessionRegistry, SessionState, StateCell};

/// Byte counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes relayed from the stream leg to the message leg.
    pub stream_to_message: u64,
    /// Bytes relayed from the message leg to the stream leg.
    pub message_to_stream: u64,
    /// Bytes dropped because they arrived before the message leg was ready.
    pub dropped: u64,
}

pub struct Session<S, M> {
    id: SessionId,
    stream: S,
    message: M,
    state: StateCell,
    close: CancellationToken,
    registry: SessionRegistry,
    stats: SessionStats,
}

impl<S, M> Session<S, M>
where
    S: Leg,
    M: Leg,
{
    /// Build a session in `Connecting`. `state` and `close` are shared with
    /// the registry handle; cancelling `close` asks the session to close both
    /// legs.
    pub fn new(
        id: SessionId,
        stream: S,
        message: M,
        state: StateCell,
        close: CancellationToken,
        registry: SessionRegistry,
    ) -> Self {
        debug_assert_eq!(stream.side(), LegSide::Stream);
        debug_assert_eq!(message.side(), LegSide::Message);
        state.set(SessionState::Connecting);
        Self {
            id,
            stream,
            message,
            state,
            close,
            registry,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn stream_leg(&self) -> &S {
        &self.stream
    }

    pub fn message_leg(&self) -> &M {
        &self.message
    }

    /// Drive the session until it is closed, then drop both legs.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        debug!("session started");
        let close = self.close.clone();
        while self.state() != SessionState::Closed {
            tokio::select! {
                biased;

                _ = close.cancelled() => {
                    debug!("close requested");
                    self.close_both().await;
                }

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    // Both reader tasks are gone without reporting a close.
                    None => self.close_both().await,
                },
            }
        }
        info!(
            stream_to_message = self.stats.stream_to_message,
            message_to_stream = self.stats.message_to_stream,
            dropped = self.stats.dropped,
            "session closed"
        );
    }

    /// Apply one leg event.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        let SessionEvent { side, event } = event;
        if self.state().is_terminating() {
            trace!(leg = %side, ?event, "event after teardown ignored");
            return;
        }

        match event {
            LegEvent::Ready => {
                if side == LegSide::Message && self.state() == SessionState::Connecting {
                    self.message.activate();
                    self.state.set(SessionState::Relaying);
                    info!("message leg ready, relaying");
                }
            }
            LegEvent::Data(payload) => self.relay(side, payload).await,
            LegEvent::Error(err) => {
                warn!(leg = %side, error = %err, error_type = err.error_type(), "leg error");
                self.teardown(side).await;
            }
            LegEvent::Closed => {
                debug!(leg = %side, "leg closed by peer");
                self.teardown(side).await;
            }
        }
    }

    async fn relay(&mut self, from: LegSide, payload: Bytes) {
        let len = payload.len() as u64;
        let target_ready = match from {
            LegSide::Stream => self.message.is_ready(),
            LegSide::Message => self.stream.is_ready(),
        };
        if self.state() != SessionState::Relaying || !target_ready {
            self.stats.dropped += len;
            debug!(leg = %from, bytes = len, "dropping data, peer leg not ready");
            return;
        }

        // A peer that stops reading can hold the write forever; a close
        // request must still get through.
        let close = self.close.clone();
        let write = match from {
            LegSide::Stream => self.message.send(payload),
            LegSide::Message => self.stream.send(payload),
        };
        let result = tokio::select! {
            biased;

            _ = close.cancelled() => None,
            result = write => Some(result),
        };
        let Some(result) = result else {
            debug!(leg = %from.other(), "close requested during write");
            self.close_both().await;
            return;
        };
        match result {
            Ok(()) => match from {
                LegSide::Stream => self.stats.stream_to_message += len,
                LegSide::Message => self.stats.message_to_stream += len,
            },
            Err(err) => {
                let failed = from.other();
                warn!(leg = %failed, error = %err, error_type = err.error_type(), "relay write failed");
                self.teardown(failed).await;
            }
        }
    }

    /// Tear down after `origin` reported close or error.
    ///
    /// The originating leg is not closed again; it is released when the
    /// session is dropped.
    pub async fn teardown(&mut self, origin: LegSide) {
        if self.state().is_terminating() {
            return;
        }
        self.state.set(SessionState::Closing);
        match origin {
            LegSide::Stream => self.message.close().await,
            LegSide::Message => self.stream.close().await,
        }
        self.finish();
    }

    /// Close both legs regardless of their state. Used on shutdown.
    pub async fn close_both(&mut self) {
        if self.state().is_terminating() {
            return;
        }
        self.state.set(SessionState::Closing);
        if !self.stream.is_closed() {
            self.stream.close().await;
        }
        if !self.message.is_closed() {
            self.message.close().await;
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.state.set(SessionState::Closed);
        self.registry.remove(self.id);
    }
}
