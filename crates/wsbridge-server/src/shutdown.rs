//! Shutdown coordination.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::registry::{SessionRegistry, SessionState};

/// Closes every registered session when the process is asked to stop.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    registry: SessionRegistry,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(registry: SessionRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Ask every live session to close and wait for the registry to drain.
    ///
    /// Sessions still registered after the timeout have their task aborted,
    /// which drops both legs, and are removed.
    /// Returns how many sessions were asked to close.
    pub async fn shutdown(&self) -> usize {
        let mut requested = 0;
        self.registry.for_each(|handle| {
            if handle.state() != SessionState::Closed {
                debug!(id = %handle.id(), peer = %handle.peer(), "closing session");
                handle.request_close();
                requested += 1;
            }
        });

        if requested == 0 && self.registry.is_empty() {
            return 0;
        }

        info!(sessions = requested, "waiting for sessions to close");
        if self.registry.wait_for_empty(self.timeout).await {
            info!("all sessions closed");
        } else {
            let mut forced = 0;
            self.registry.for_each(|handle| {
                handle.force_close();
                self.registry.remove(handle.id());
                forced += 1;
            });
            warn!(
                forced,
                timeout_secs = self.timeout.as_secs(),
                "shutdown timeout, aborted remaining sessions"
            );
        }
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{SessionHandle, StateCell};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    struct FakeSession {
        close: CancellationToken,
        handle: SessionHandle,
        task: JoinHandle<()>,
    }

    /// Register a handle backed by a task. A responsive task removes itself
    /// once asked to close; an unresponsive one never returns.
    fn spawn_fake_session(registry: &SessionRegistry, responsive: bool) -> FakeSession {
        let id = registry.allocate_id();
        let close = CancellationToken::new();
        let state = StateCell::new(SessionState::Relaying);
        let handle = SessionHandle::new(
            id,
            "127.0.0.1:1234".parse().unwrap(),
            state.clone(),
            close.clone(),
        );
        registry.put(id, handle.clone()).unwrap();

        let task = if responsive {
            let registry = registry.clone();
            let token = close.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                state.set(SessionState::Closed);
                registry.remove(id);
            })
        } else {
            // Stuck in a write that never completes.
            tokio::spawn(std::future::pending::<()>())
        };
        handle.attach_task(task.abort_handle());
        FakeSession {
            close,
            handle,
            task,
        }
    }

    #[tokio::test]
    async fn no_sessions_is_noop() {
        let registry = SessionRegistry::new();
        let coordinator = ShutdownCoordinator::new(registry.clone(), Duration::from_secs(1));
        assert_eq!(coordinator.shutdown().await, 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn closes_every_session() {
        let registry = SessionRegistry::new();
        let sessions: Vec<_> = (0..3).map(|_| spawn_fake_session(&registry, true)).collect();

        let coordinator = ShutdownCoordinator::new(registry.clone(), Duration::from_secs(5));
        assert_eq!(coordinator.shutdown().await, 3);
        assert!(sessions.iter().all(|s| s.close.is_cancelled()));
        assert!(registry.is_empty());
        for session in sessions {
            // Finished on its own, not aborted.
            session.task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn stuck_session_is_removed_after_timeout() {
        let registry = SessionRegistry::new();
        spawn_fake_session(&registry, true);
        let stuck = spawn_fake_session(&registry, false);

        let coordinator = ShutdownCoordinator::new(registry.clone(), Duration::from_millis(50));
        assert_eq!(coordinator.shutdown().await, 2);
        assert!(stuck.close.is_cancelled());
        assert!(registry.is_empty());
        assert_eq!(stuck.handle.state(), SessionState::Closed);

        // The stuck task is gone by the time shutdown returns.
        let err = tokio::time::timeout(Duration::from_secs(1), stuck.task)
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn second_shutdown_is_harmless() {
        let registry = SessionRegistry::new();
        spawn_fake_session(&registry, true);
        let coordinator = ShutdownCoordinator::new(registry.clone(), Duration::from_secs(5));
        assert_eq!(coordinator.shutdown().await, 1);
        assert_eq!(coordinator.shutdown().await, 0);
    }
}
