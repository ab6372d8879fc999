//! Per-request connection state.
//!
//! A [`UnitOfWork`] is created by whoever starts handling a request and is
//! passed explicitly to every nested call. It holds at most one connection
//! per data source, the transaction flag, and the two discard flags that
//! record which outer layer owns the final release.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::Connection;

/// Label used for the default data source in logs and errors.
pub const DEFAULT_SOURCE: &str = "default";

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Call boundary that may release a unit's connections.
///
/// Ordered innermost to outermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiscardLevel {
    /// A single statement issued by a DAO.
    Dao,
    /// A call into a local service object.
    Service,
    /// A call that arrived from a remote peer.
    Remote,
}

impl fmt::Display for DiscardLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardLevel::Dao => f.write_str("dao"),
            DiscardLevel::Service => f.write_str("service"),
            DiscardLevel::Remote => f.write_str("remote"),
        }
    }
}

/// Connections taken out of a unit by a release, tagged with their source label.
pub(crate) type HeldConnections = Vec<(String, Arc<dyn Connection>)>;

#[derive(Default)]
struct UnitState {
    primary: Option<Arc<dyn Connection>>,
    named: HashMap<String, Arc<dyn Connection>>,
    transaction_open: bool,
    service_discard: bool,
    remote_discard: bool,
}

impl UnitState {
    /// Whether a release requested at `level` is this layer's to perform.
    fn owns_release(&self, level: DiscardLevel) -> bool {
        match level {
            DiscardLevel::Dao => !self.service_discard && !self.remote_discard,
            DiscardLevel::Service => !self.remote_discard,
            DiscardLevel::Remote => true,
        }
    }

    fn held(&self) -> HeldConnections {
        let mut held = Vec::with_capacity(self.named.len() + 1);
        if let Some(conn) = &self.primary {
            held.push((DEFAULT_SOURCE.to_string(), Arc::clone(conn)));
        }
        held.extend(
            self.named
                .iter()
                .map(|(name, conn)| (name.clone(), Arc::clone(conn))),
        );
        held
    }

    fn dispose(&mut self) -> HeldConnections {
        let taken = std::mem::take(self);
        let mut held = Vec::with_capacity(taken.named.len() + 1);
        if let Some(conn) = taken.primary {
            held.push((DEFAULT_SOURCE.to_string(), conn));
        }
        held.extend(taken.named);
        held
    }
}

/// Explicit unit-of-work handle shared by the nested calls of one request.
///
/// The internal mutex is never held across an await point.
pub struct UnitOfWork {
    id: u64,
    state: Mutex<UnitState>,
}

impl UnitOfWork {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(UnitState::default()),
        }
    }

    /// Process-unique id, used to correlate log lines.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the unit transactional. Only connections acquired afterwards
    /// have autocommit switched off.
    pub fn open_transaction(&self) {
        self.state.lock().transaction_open = true;
    }

    #[must_use]
    pub fn is_transaction_open(&self) -> bool {
        self.state.lock().transaction_open
    }

    /// Record that the layer at `level` will perform the final release.
    /// Claiming [`DiscardLevel::Dao`] has no effect.
    pub fn claim_discard_level(&self, level: DiscardLevel) {
        let mut state = self.state.lock();
        match level {
            DiscardLevel::Dao => {}
            DiscardLevel::Service => state.service_discard = true,
            DiscardLevel::Remote => state.remote_discard = true,
        }
    }

    /// Whether `level` has been claimed and not yet released.
    #[must_use]
    pub fn is_claimed(&self, level: DiscardLevel) -> bool {
        let state = self.state.lock();
        match level {
            DiscardLevel::Dao => false,
            DiscardLevel::Service => state.service_discard,
            DiscardLevel::Remote => state.remote_discard,
        }
    }

    /// Number of connections currently held.
    #[must_use]
    pub fn held_count(&self) -> usize {
        let state = self.state.lock();
        usize::from(state.primary.is_some()) + state.named.len()
    }

    /// `true` when no connection is held and every flag is clear.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.primary.is_none()
            && state.named.is_empty()
            && !state.transaction_open
            && !state.service_discard
            && !state.remote_discard
    }

    pub(crate) fn connection(&self, source: Option<&str>) -> Option<Arc<dyn Connection>> {
        let state = self.state.lock();
        match source {
            None => state.primary.clone(),
            Some(name) => state.named.get(name).cloned(),
        }
    }

    /// Remember `conn` for `source` unless one is already held, in which
    /// case the existing connection is returned and `conn` is not stored.
    pub(crate) fn hold(
        &self,
        source: Option<&str>,
        conn: Arc<dyn Connection>,
    ) -> Option<Arc<dyn Connection>> {
        let mut state = self.state.lock();
        match source {
            None => match &state.primary {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    state.primary = Some(conn);
                    None
                }
            },
            Some(name) => match state.named.get(name) {
                Some(existing) => Some(Arc::clone(existing)),
                None => {
                    state.named.insert(name.to_string(), conn);
                    None
                }
            },
        }
    }

    pub(crate) fn held_connections(&self) -> HeldConnections {
        self.state.lock().held()
    }

    /// Reset the unit and hand back its connections if `level` owns the
    /// release; otherwise leave everything untouched and return `None`.
    pub(crate) fn take_if_owner(&self, level: DiscardLevel) -> Option<HeldConnections> {
        let mut state = self.state.lock();
        if state.owns_release(level) {
            Some(state.dispose())
        } else {
            None
        }
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("primary", &state.primary.is_some())
            .field("named", &state.named.keys().collect::<Vec<_>>())
            .field("transaction_open", &state.transaction_open)
            .field("service_discard", &state.service_discard)
            .field("remote_discard", &state.remote_discard)
            .finish()
    }
}
