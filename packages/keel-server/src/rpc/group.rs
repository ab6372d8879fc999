use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use keel_core::SessionHandle;
use parking_lot::RwLock;

/// Ordered sessions to peers that serve the same role, picked round-robin.
#[derive(Default)]
pub struct ClientGroup {
    sessions: RwLock<Vec<SessionHandle>>,
    cursor: AtomicUsize,
}

impl ClientGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `session` unless it is already a member.
    pub fn add_session(&self, session: SessionHandle) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains(&session) {
            return false;
        }
        sessions.push(session);
        true
    }

    /// Remove `session` if present. Removing an absent session is a no-op.
    pub fn remove_session(&self, session: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|s| s != session);
        sessions.len() != before
    }

    /// Next session in round-robin order, or `None` when the group is empty.
    ///
    /// The cursor and the list length are read under the same read lock, so
    /// a concurrent removal can never produce an out-of-range index.
    #[must_use]
    pub fn next_session(&self) -> Option<SessionHandle> {
        let sessions = self.sessions.read();
        if sessions.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % sessions.len();
        Some(sessions[index].clone())
    }

    /// Snapshot of the current members in insertion order.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions.read().clone()
    }

    #[must_use]
    pub fn contains(&self, session: &SessionHandle) -> bool {
        self.sessions.read().contains(session)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl fmt::Debug for ClientGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientGroup")
            .field("sessions", &*self.sessions.read())
            .finish_non_exhaustive()
    }
}
