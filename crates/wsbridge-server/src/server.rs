//! Listener and per-connection dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use wsbridge_core::defaults;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::leg::{Leg, MessageLeg, MessageLegOptions, StreamLeg};
use crate::registry::{SessionHandle, SessionRegistry, SessionState, StateCell};
use crate::session::Session;
use crate::shutdown::ShutdownCoordinator;
use crate::util::create_listener;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A bound bridge listener.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<BridgeConfig>,
    leg_options: MessageLegOptions,
    registry: SessionRegistry,
}

impl Server {
    /// Bind the TCP listener. Must be called from within a tokio runtime.
    pub fn bind(config: BridgeConfig) -> Result<Self, BridgeError> {
        let addr = config.listen_addr();
        let listener = create_listener(addr, config.backlog)
            .map_err(|source| BridgeError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let leg_options = MessageLegOptions::from(&config);
        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            leg_options,
            registry: SessionRegistry::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the live session registry.
    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` fires, then close every session
    /// before the listener is released.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        info!(
            address = %self.local_addr,
            target = %self.config.ws_url,
            backlog = self.config.backlog,
            "listening"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, closing sessions");
                    break;
                }

                result = self.listener.accept() => match result {
                    Ok((tcp, peer)) => self.dispatch(tcp, peer),
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        let coordinator =
            ShutdownCoordinator::new(self.registry.clone(), self.config.shutdown_timeout());
        coordinator.shutdown().await;

        // Stop accepting only after every session is gone.
        drop(self.listener);
        info!("bridge stopped");
        Ok(())
    }

    fn dispatch(&self, tcp: TcpStream, peer: SocketAddr) {
        let id = self.registry.allocate_id();
        debug!(id = %id, peer = %peer, "new connection");

        if self.config.tcp_no_delay {
            if let Err(e) = tcp.set_nodelay(true) {
                debug!(id = %id, error = %e, "failed to set TCP_NODELAY");
            }
        }

        let (tx, rx) = mpsc::channel(defaults::DEFAULT_SESSION_QUEUE_DEPTH);
        let mut stream_leg = StreamLeg::new(tcp, tx.clone(), self.config.relay_buffer_size);

        let message_leg = match MessageLeg::connect(&self.config.ws_url, &self.leg_options, tx) {
            Ok(leg) => leg,
            Err(e) => {
                warn!(
                    id = %id,
                    peer = %peer,
                    error = %e,
                    error_type = e.error_type(),
                    "cannot start websocket connect, closing stream"
                );
                tokio::spawn(async move { stream_leg.close().await });
                return;
            }
        };

        let state = StateCell::new(SessionState::Connecting);
        let close = CancellationToken::new();
        let handle = SessionHandle::new(id, peer, state.clone(), close.clone());
        if let Err(e) = self.registry.put(id, handle.clone()) {
            error!(id = %id, error = %e, "session registration failed");
            return;
        }

        let session = Session::new(
            id,
            stream_leg,
            message_leg,
            state,
            close,
            self.registry.clone(),
        );
        let task = tokio::spawn(
            session
                .run(rx)
                .instrument(info_span!("session", id = %id, peer = %peer)),
        );
        handle.attach_task(task.abort_handle());
    }
}

/// Bind and run the bridge until `shutdown` fires.
pub async fn run_with_shutdown(
    config: BridgeConfig,
    shutdown: CancellationToken,
) -> Result<(), BridgeError> {
    Server::bind(config)?.run(shutdown).await
}

/// Run the bridge without external shutdown control.
pub async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    run_with_shutdown(config, CancellationToken::new()).await
}
