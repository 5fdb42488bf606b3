//! WebSocket message leg.

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{EventSender, Leg, LegEvent, LegEvents, LegFuture, LegSide};
use crate::config::BridgeConfig;
use crate::error::BridgeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Upper bound on sending our close frame to an unresponsive peer.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect settings for the outbound WebSocket.
#[derive(Debug, Clone, Default)]
pub struct MessageLegOptions {
    pub connect_timeout: Option<Duration>,
    pub max_frame_bytes: usize,
    pub no_delay: bool,
}

impl From<&BridgeConfig> for MessageLegOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            max_frame_bytes: config.ws_max_frame_bytes,
            no_delay: config.tcp_no_delay,
        }
    }
}

impl MessageLegOptions {
    fn ws_config(&self) -> WebSocketConfig {
        let mut cfg = WebSocketConfig::default();
        if self.max_frame_bytes > 0 {
            cfg.max_frame_size = Some(self.max_frame_bytes);
            cfg.max_message_size = Some(self.max_frame_bytes);
        }
        cfg
    }
}

/// The outbound WebSocket of a session.
///
/// Constructed while the handshake is still running. The background task
/// hands the write half over through a oneshot before it queues `Ready`, so
/// [`Leg::activate`] always finds it there.
pub struct MessageLeg {
    task: Option<JoinHandle<()>>,
    pending: Option<oneshot::Receiver<WsSink>>,
    sink: Option<WsSink>,
    closed: bool,
}

impl MessageLeg {
    /// Start connecting to `url`.
    ///
    /// Fails synchronously if `url` cannot become a WebSocket request; the
    /// handshake itself runs in the background and reports through `events`.
    pub fn connect(
        url: &str,
        options: &MessageLegOptions,
        events: EventSender,
    ) -> Result<Self, BridgeError> {
        let request = build_request(url)?;
        let (sink_tx, sink_rx) = oneshot::channel();
        let events = LegEvents::new(LegSide::Message, events);
        let task = tokio::spawn(connect_and_read(
            request,
            url.to_string(),
            options.clone(),
            sink_tx,
            events,
        ));
        Ok(Self {
            task: Some(task),
            pending: Some(sink_rx),
            sink: None,
            closed: false,
        })
    }
}

fn build_request(url: &str) -> Result<Request, BridgeError> {
    let invalid = |reason: String| BridgeError::InvalidTarget {
        url: url.to_string(),
        reason,
    };
    let request = url
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;
    match request.uri().scheme_str() {
        Some("ws") => {}
        Some("wss") => return Err(invalid("wss is not supported, use ws".into())),
        Some(other) => return Err(invalid(format!("unsupported scheme {other}"))),
        None => return Err(invalid("missing scheme".into())),
    }
    if request.uri().host().is_none() {
        return Err(invalid("missing host".into()));
    }
    Ok(request)
}

async fn connect_and_read(
    request: Request,
    url: String,
    options: MessageLegOptions,
    sink_tx: oneshot::Sender<WsSink>,
    events: LegEvents,
) {
    let connect = connect_async_with_config(request, Some(options.ws_config()), options.no_delay);
    let connected = match options.connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, connect).await {
            Ok(result) => result.map_err(BridgeError::from),
            Err(_) => Err(BridgeError::ConnectTimeout(url)),
        },
        None => connect.await.map_err(BridgeError::from),
    };

    let ws = match connected {
        Ok((ws, response)) => {
            debug!(status = %response.status(), "websocket connected");
            ws
        }
        Err(e) => {
            events.fail(e).await;
            return;
        }
    };

    let (sink, mut source) = ws.split();
    if sink_tx.send(sink).is_err() {
        return;
    }
    if !events.emit(LegEvent::Ready).await {
        return;
    }

    while let Some(msg) = source.next().await {
        let payload = match msg {
            Ok(Message::Binary(data)) => data,
            // Text frames carry bytes like any other; the bridge does not look inside.
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Ok(Message::Close(frame)) => {
                trace!(?frame, "websocket close frame");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                events.fail(BridgeError::WebSocket(e)).await;
                return;
            }
        };
        if !events.emit(LegEvent::Data(payload)).await {
            return;
        }
    }
    events.emit(LegEvent::Closed).await;
}

impl Leg for MessageLeg {
    fn side(&self) -> LegSide {
        LegSide::Message
    }

    fn is_ready(&self) -> bool {
        !self.closed && self.sink.is_some()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn activate(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            if let Ok(sink) = pending.try_recv() {
                self.sink = Some(sink);
            }
        }
    }

    fn send(&mut self, payload: Bytes) -> LegFuture<'_, Result<(), BridgeError>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            if let Some(sink) = self.sink.as_mut() {
                sink.send(Message::Binary(payload)).await?;
            }
            Ok(())
        })
    }

    fn close(&mut self) -> LegFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return;
            }
            self.closed = true;
            self.pending = None;
            if let Some(mut sink) = self.sink.take() {
                if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
                    debug!("websocket close frame not flushed in time");
                }
            }
            if let Some(task) = self.task.take() {
                task.abort();
            }
        })
    }
}

impl Drop for MessageLeg {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn build_request_accepts_ws_urls() {
        assert!(build_request("ws://localhost:8080").is_ok());
        assert!(build_request("ws://127.0.0.1:9000/path?q=1").is_ok());
    }

    #[test]
    fn build_request_rejects_malformed_targets() {
        for url in ["not a url", "http://localhost:8080", "wss://localhost", ""] {
            let err = build_request(url).unwrap_err();
            assert!(
                matches!(err, BridgeError::InvalidTarget { .. }),
                "{url}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn connect_refused_reports_error_then_close() {
        // Reserve a port, then free it so nothing listens there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::channel(8);
        let mut leg = MessageLeg::connect(
            &format!("ws://{addr}"),
            &MessageLegOptions {
                connect_timeout: Some(Duration::from_secs(5)),
                ..MessageLegOptions::default()
            },
            tx,
        )
        .unwrap();
        assert!(!leg.is_ready());
        // Not ready: send is dropped silently.
        leg.send(Bytes::from_static(b"early")).await.unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.side, LegSide::Message);
        assert!(matches!(ev.event, LegEvent::Error(_)));
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev.event, LegEvent::Closed));

        leg.close().await;
        leg.close().await;
        assert!(leg.is_closed());
    }
}
