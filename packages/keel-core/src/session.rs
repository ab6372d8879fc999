//! Identity of a logical connection to a peer node.
//!
//! A [`SessionHandle`] is opaque to routing code: group membership and
//! removal compare handles by [`SessionId`] only, never by peer metadata.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Unique identifier for a peer session, assigned by a [`SessionIdAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Monotonic session id source.
///
/// Ids start at 1 (0 is reserved as "no session").
#[derive(Debug)]
pub struct SessionIdAllocator {
    next_id: AtomicU64,
}

impl SessionIdAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    peer: String,
    address: Option<String>,
    connected_at: Instant,
}

/// Cheaply cloneable handle to one peer session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    /// Creates a handle for a session to the peer named `peer`.
    #[must_use]
    pub fn new(id: SessionId, peer: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                peer: peer.into(),
                address: None,
                connected_at: Instant::now(),
            }),
        }
    }

    /// Creates a handle that also records the remote socket address.
    #[must_use]
    pub fn with_address(id: SessionId, peer: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                peer: peer.into(),
                address: Some(address.into()),
                connected_at: Instant::now(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Name the peer announced when the session was established.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.inner.address.as_deref()
    }

    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.inner.connected_at
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for SessionHandle {}

impl Hash for SessionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("address", &self.inner.address)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.inner.id, self.inner.peer)
    }
}
