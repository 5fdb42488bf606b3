//! Registry of live sessions.
//!
//! One registry is created at startup and cloned into the dispatcher, every
//! session task and the shutdown coordinator. The map is the only state they
//! share; the lock is never held across an await.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

/// Unique session identifier, never reused while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Relaying = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Relaying,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// `Closing` or `Closed`: no relay may happen any more.
    pub fn is_terminating(self) -> bool {
        self >= SessionState::Closing
    }
}

/// State written by the session task and read by anyone holding a handle.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// What the registry stores for each session.
///
/// The session itself lives in its own task; the handle is how the rest of
/// the process observes it and asks it to close.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    state: StateCell,
    close: CancellationToken,
    task: Arc<OnceLock<AbortHandle>>,
}

impl SessionHandle {
    pub fn new(id: SessionId, peer: SocketAddr, state: StateCell, close: CancellationToken) -> Self {
        Self {
            id,
            peer,
            state,
            close,
            task: Arc::new(OnceLock::new()),
        }
    }

    /// Record the task driving this session. Only the first call has effect.
    pub fn attach_task(&self, task: AbortHandle) {
        let _ = self.task.set(task);
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Ask the session task to close both legs. Idempotent.
    pub fn request_close(&self) {
        self.close.cancel();
    }

    /// Abort the session task and mark the session `Closed`.
    ///
    /// Aborting drops the session, which drops both legs and their sockets
    /// without a close handshake.
    pub fn force_close(&self) {
        self.close.cancel();
        if let Some(task) = self.task.get() {
            task.abort();
        }
        self.state.set(SessionState::Closed);
    }
}

/// Process-wide session registry.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<BTreeMap<SessionId, SessionHandle>>>,
    next_id: Arc<AtomicU64>,
    empty_notify: Arc<Notify>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            empty_notify: Arc::new(Notify::new()),
        }
    }

    /// Allocate the next session id.
    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a session. Fails if `id` is already registered.
    pub fn put(&self, id: SessionId, handle: SessionHandle) -> Result<(), BridgeError> {
        let mut map = self.sessions.lock();
        if map.contains_key(&id) {
            return Err(BridgeError::DuplicateSession(id));
        }
        map.insert(id, handle);
        Ok(())
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Remove a session; no-op if absent.
    pub fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        let mut map = self.sessions.lock();
        let removed = map.remove(&id);
        if map.is_empty() {
            self.empty_notify.notify_waiters();
        }
        removed
    }

    /// Ordered copy of the current entries.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Visit every session present when the call started.
    ///
    /// Runs over a snapshot, so `f` may remove entries (including the one it
    /// is visiting) without skipping or repeating others.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&SessionHandle),
    {
        for handle in self.snapshot() {
            f(&handle);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Wait until the registry is empty. Returns false on timeout.
    pub async fn wait_for_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.empty_notify.notified();
            tokio::pin!(notified);
            // Register before checking so a removal in between is not missed.
            notified.as_mut().enable();
            if self.is_empty() {
                return true;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.is_empty(),
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(registry: &SessionRegistry) -> SessionHandle {
        let id = registry.allocate_id();
        SessionHandle::new(
            id,
            "127.0.0.1:5000".parse().unwrap(),
            StateCell::new(SessionState::Connecting),
            CancellationToken::new(),
        )
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let registry = SessionRegistry::new();
        let mut last = None;
        for _ in 0..100 {
            let h = handle(&registry);
            if let Some(prev) = last {
                assert!(h.id() > prev);
            }
            last = Some(h.id());
            registry.put(h.id(), h).unwrap();
        }
        assert_eq!(registry.len(), 100);
        let ids: Vec<_> = registry.snapshot().iter().map(|h| h.id()).collect();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids, deduped);
    }

    #[test]
    fn put_rejects_duplicate_id() {
        let registry = SessionRegistry::new();
        let h = handle(&registry);
        registry.put(h.id(), h.clone()).unwrap();
        let err = registry.put(h.id(), h.clone()).unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateSession(id) if id == h.id()));
    }

    #[test]
    fn remove_absent_is_noop() {
        let registry = SessionRegistry::new();
        let h = handle(&registry);
        assert!(registry.remove(h.id()).is_none());
        registry.put(h.id(), h.clone()).unwrap();
        assert!(registry.remove(h.id()).is_some());
        assert!(registry.remove(h.id()).is_none());
        assert!(registry.get(h.id()).is_none());
    }

    #[test]
    fn for_each_survives_removal_during_iteration() {
        let registry = SessionRegistry::new();
        for _ in 0..5 {
            let h = handle(&registry);
            registry.put(h.id(), h).unwrap();
        }
        let mut visited = Vec::new();
        registry.for_each(|h| {
            visited.push(h.id());
            registry.remove(h.id());
            // drop an entry that has not been visited yet
            if h.id().as_u64() == 2 {
                registry.remove(SessionId(4));
            }
        });
        assert_eq!(
            visited.iter().map(|id| id.as_u64()).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn request_close_is_idempotent() {
        let registry = SessionRegistry::new();
        let h = handle(&registry);
        h.request_close();
        h.request_close();
        assert!(h.close.is_cancelled());
    }

    #[tokio::test]
    async fn force_close_aborts_attached_task() {
        let registry = SessionRegistry::new();
        let h = handle(&registry);
        let task = tokio::spawn(std::future::pending::<()>());
        h.attach_task(task.abort_handle());

        h.force_close();
        assert_eq!(h.state(), SessionState::Closed);
        assert!(h.close.is_cancelled());
        let err = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn wait_for_empty_wakes_on_last_removal() {
        let registry = SessionRegistry::new();
        assert!(registry.wait_for_empty(Duration::from_millis(10)).await);

        let h = handle(&registry);
        let id = h.id();
        registry.put(id, h).unwrap();

        let r = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            r.remove(id);
        });
        assert!(registry.wait_for_empty(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn wait_for_empty_times_out() {
        let registry = SessionRegistry::new();
        let h = handle(&registry);
        registry.put(h.id(), h).unwrap();
        assert!(!registry.wait_for_empty(Duration::from_millis(20)).await);
    }
}
