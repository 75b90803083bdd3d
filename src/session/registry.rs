//! Registry of live relay sessions
//!
//! The registry holds lightweight handles only: an id, the peer address, a
//! start time and the task's abort handle. The session task itself owns the
//! sockets. The lock is held for single map operations and never across an
//! await point.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;
use tracing::debug;

/// Unique session identifier
pub type SessionId = u64;

/// Lightweight view of a live session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Session id
    pub id: SessionId,
    /// Address of the accepted peer
    pub peer: SocketAddr,
    /// When the session was registered
    pub started: Instant,
    abort: Option<AbortHandle>,
}

impl SessionHandle {
    /// Abort the session task, if one is attached
    pub fn abort(&self) -> bool {
        match &self.abort {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Set of live sessions for one listener
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a new session and return the guard that removes it on drop
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = SessionHandle {
            id,
            peer,
            started: Instant::now(),
            abort: None,
        };
        self.sessions.lock().insert(id, handle);

        SessionGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Remove a session
    ///
    /// Returns whether an entry was removed; removing an absent id is a no-op.
    pub fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().remove(&id);
        if let Some(handle) = &removed {
            debug!(
                "Session {} unregistered after {:?}",
                id,
                handle.started.elapsed()
            );
        }
        removed.is_some()
    }

    /// Attach the task's abort handle to a registered session
    ///
    /// Does nothing if the session already finished.
    pub fn attach_abort(&self, id: SessionId, abort: AbortHandle) -> bool {
        match self.sessions.lock().get_mut(&id) {
            Some(handle) => {
                handle.abort = Some(abort);
                true
            }
            None => false,
        }
    }

    /// Whether a session is registered
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Copy of all handles taken under the lock
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Abort every live session, returning how many tasks were aborted
    ///
    /// Aborted tasks drop their [`SessionGuard`] and unregister themselves.
    pub fn shutdown_all(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|handle| handle.abort())
            .count()
    }
}

/// Removes its session from the registry when dropped
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl SessionGuard {
    /// Id of the guarded session
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_register_and_guard_drop() {
        let registry = SessionRegistry::new();
        let guard = registry.register(peer());
        let id = guard.id();

        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = SessionRegistry::new();
        let a = registry.register(peer());
        let b = registry.register(peer());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let guard = registry.register(peer());
        let id = guard.id();

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        // guard drop after explicit removal is a no-op
        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = SessionRegistry::new();
        let guards: Vec<_> = (0..3).map(|_| registry.register(peer())).collect();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 3);

        drop(guards);
        assert!(registry.is_empty());
        assert_eq!(snapshot.len(), 3);
    }

    #[tokio::test]
    async fn test_attach_abort_after_finish_is_noop() {
        let registry = SessionRegistry::new();
        let guard = registry.register(peer());
        let id = guard.id();

        let task = tokio::spawn(async move {
            drop(guard);
        });
        let abort = task.abort_handle();
        task.await.unwrap();

        assert!(!registry.attach_abort(id, abort));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_all_aborts_sessions() {
        let registry = SessionRegistry::new();

        for _ in 0..5 {
            let guard = registry.register(peer());
            let id = guard.id();
            let task = tokio::spawn(async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
            assert!(registry.attach_abort(id, task.abort_handle()));
        }
        assert_eq!(registry.len(), 5);

        assert_eq!(registry.shutdown_all(), 5);

        // aborted tasks drop their guards once polled
        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
