//! Session lifecycle management for WebSocket connections.
//!
//! Tracks active sessions, enforces the concurrency limit (each session holds a
//! loaded model), and cancels a session's work when its connection goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::params::ChatMode;

/// Tracks active sessions and controls concurrency.
pub struct SessionManager {
    /// Active sessions keyed by session ID.
    active: Mutex<HashMap<Uuid, SessionEntry>>,
    /// Semaphore limiting concurrent sessions.
    concurrency_limit: Arc<Semaphore>,
    /// Maximum allowed concurrent sessions.
    max_concurrent: usize,
}

/// Metadata for an active session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub mode: ChatMode,
    pub model: String,
    cancel: CancellationToken,
}

/// A guard that releases session resources when dropped.
///
/// Owned by the connection task. When the socket closes or the task is
/// aborted, the guard drops, cancelling every generation derived from its
/// token and freeing the slot.
pub struct SessionGuard {
    session_id: Uuid,
    cancel: CancellationToken,
    manager: Arc<SessionManager>,
    _permit: OwnedSemaphorePermit,
}

impl SessionGuard {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Parent token for the session's generations.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.manager.remove_session(self.session_id);
    }
}

impl SessionManager {
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            concurrency_limit: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        })
    }

    /// Take a slot without waiting. Returns `None` at capacity.
    pub fn try_acquire(
        self: &Arc<Self>,
        mode: ChatMode,
        model: impl Into<String>,
    ) -> Option<SessionGuard> {
        let permit = Arc::clone(&self.concurrency_limit).try_acquire_owned().ok()?;
        Some(self.register(permit, mode, model.into()))
    }

    fn register(
        self: &Arc<Self>,
        permit: OwnedSemaphorePermit,
        mode: ChatMode,
        model: String,
    ) -> SessionGuard {
        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.lock().insert(
            session_id,
            SessionEntry {
                mode,
                model,
                cancel: cancel.clone(),
            },
        );
        tracing::debug!(%session_id, "session slot acquired");

        SessionGuard {
            session_id,
            cancel,
            manager: Arc::clone(self),
            _permit: permit,
        }
    }

    fn remove_session(&self, id: Uuid) {
        self.lock().remove(&id);
        tracing::debug!(session_id = %id, "session slot released");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SessionEntry>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel every active session, e.g. on shutdown.
    pub fn cancel_all(&self) {
        for entry in self.lock().values() {
            entry.cancel.cancel();
        }
    }

    pub fn sessions(&self) -> Vec<(Uuid, SessionEntry)> {
        self.lock().iter().map(|(id, e)| (*id, e.clone())).collect()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_permits(&self) -> usize {
        self.concurrency_limit.available_permits()
    }
}
