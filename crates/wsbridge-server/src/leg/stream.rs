//! TCP stream leg.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::trace;

use super::{EventSender, Leg, LegEvent, LegEvents, LegFuture, LegSide};
use crate::error::BridgeError;

/// The accepted TCP connection of a session.
///
/// Chunk boundaries are whatever each socket read returns; nothing is merged
/// or split on the way to the session.
pub struct StreamLeg {
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl StreamLeg {
    /// Wrap an accepted connection and start reading from it.
    pub fn new(tcp: TcpStream, events: EventSender, buffer_size: usize) -> Self {
        let (read_half, write_half) = tcp.into_split();
        let events = LegEvents::new(LegSide::Stream, events);
        let reader = tokio::spawn(read_loop(read_half, events, buffer_size));
        Self {
            writer: Some(write_half),
            reader: Some(reader),
        }
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, events: LegEvents, buffer_size: usize) {
    let mut buf = BytesMut::with_capacity(buffer_size);
    loop {
        buf.reserve(buffer_size);
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                trace!("stream leg eof");
                events.emit(LegEvent::Closed).await;
                return;
            }
            Ok(_) => {
                if !events.emit(LegEvent::Data(buf.split().freeze())).await {
                    return;
                }
            }
            Err(e) => {
                events.fail(BridgeError::Io(e)).await;
                return;
            }
        }
    }
}

impl Leg for StreamLeg {
    fn side(&self) -> LegSide {
        LegSide::Stream
    }

    fn is_ready(&self) -> bool {
        self.writer.is_some()
    }

    fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    fn send(&mut self, payload: Bytes) -> LegFuture<'_, Result<(), BridgeError>> {
        Box::pin(async move {
            if let Some(writer) = self.writer.as_mut() {
                writer.write_all(&payload).await?;
            }
            Ok(())
        })
    }

    fn close(&mut self) -> LegFuture<'_, ()> {
        Box::pin(async move {
            if let Some(reader) = self.reader.take() {
                reader.abort();
            }
            if let Some(mut writer) = self.writer.take() {
                // Peer may already be gone; the socket is released either way.
                let _ = writer.shutdown().await;
            }
        })
    }
}

impl Drop for StreamLeg {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn reports_data_then_close() {
        let (mut client, server) = pair().await;
        let (tx, mut rx) = mpsc::channel(8);
        let leg = StreamLeg::new(server, tx, 1024);
        assert!(leg.is_ready());

        client.write_all(b"hello").await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.side, LegSide::Stream);
        assert!(matches!(ev.event, LegEvent::Data(ref b) if b.as_ref() == b"hello"));

        drop(client);
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev.event, LegEvent::Closed));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_send_after_close_is_noop() {
        let (mut client, server) = pair().await;
        let (tx, _rx) = mpsc::channel(8);
        let mut leg = StreamLeg::new(server, tx, 1024);

        leg.send(Bytes::from_static(b"abc")).await.unwrap();
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abc");

        leg.close().await;
        leg.close().await;
        assert!(leg.is_closed());
        leg.send(Bytes::from_static(b"late")).await.unwrap();

        let mut rest = Vec::new();
        let n = client.read_to_end(&mut rest).await.unwrap_or(0);
        assert_eq!(n, 0);
    }
}
