//! Process-wide registry of open HTTP sessions.
//!
//! Membership only: the registry never owns a session. Its single job is to
//! fan a close signal out to every live session on shutdown, which each
//! session then reports as a connection error on its next or in-flight call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    open: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session handle; returns the token it should watch for close.
    pub fn register(&self, id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(id, token.clone());
        token
    }

    /// Remove a session handle. Returns whether it was present.
    pub fn deregister(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal every registered session to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let open = self.lock();
        for token in open.values() {
            token.cancel();
        }
        tracing::info!(sessions = open.len(), "Closing all open HTTP sessions");
        open.len()
    }
}
