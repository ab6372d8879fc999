//! Named client groups that together make up one remote cluster.
//!
//! Membership lives in a single immutable snapshot swapped atomically on
//! change, so the ordered list and the name index can never disagree and
//! readers never block writers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use keel_core::SessionHandle;
use rand::Rng;

use super::error::RemoteError;
use super::group::ClientGroup;

#[derive(Clone, Default)]
struct ClusterGroups {
    ordered: Vec<(String, Arc<ClientGroup>)>,
    by_name: HashMap<String, usize>,
}

impl ClusterGroups {
    fn with_group(&self, name: &str, group: Arc<ClientGroup>) -> Self {
        let mut next = self.clone();
        match next.by_name.get(name) {
            Some(&index) => next.ordered[index].1 = group,
            None => {
                next.by_name.insert(name.to_string(), next.ordered.len());
                next.ordered.push((name.to_string(), group));
            }
        }
        next
    }
}

/// A remote cluster: ordered, named client groups plus a cluster-wide cursor.
pub struct ClientCluster {
    name: String,
    groups: ArcSwap<ClusterGroups>,
    cursor: AtomicUsize,
}

impl ClientCluster {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: ArcSwap::from_pointee(ClusterGroups::default()),
            cursor: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `group` under `name`. Re-registering a name replaces the
    /// group in place, keeping its rotation position.
    pub fn add_group(&self, name: &str, group: Arc<ClientGroup>) {
        self.groups
            .rcu(|current| current.with_group(name, Arc::clone(&group)));
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<Arc<ClientGroup>> {
        let snapshot = self.groups.load();
        snapshot
            .by_name
            .get(name)
            .map(|&index| Arc::clone(&snapshot.ordered[index].1))
    }

    /// Group names in registration order.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        self.groups
            .load()
            .ordered
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.load().ordered.len()
    }

    /// Drop `session` from every group. Returns whether any group held it.
    pub fn remove_session(&self, session: &SessionHandle) -> bool {
        let snapshot = self.groups.load();
        let mut removed = false;
        for (_, group) in &snapshot.ordered {
            removed |= group.remove_session(session);
        }
        removed
    }

    /// Round-robin within the group registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::UnknownGroup`] if no group has that name.
    pub fn session_by_group_name(&self, name: &str) -> Result<Option<SessionHandle>, RemoteError> {
        let group = self.group(name).ok_or_else(|| RemoteError::UnknownGroup {
            cluster: self.name.clone(),
            group: name.to_string(),
        })?;
        Ok(group.next_session())
    }

    /// Cluster-wide round-robin: each call asks exactly one group, rotating
    /// through groups in registration order. A single group is asked
    /// directly without advancing the cluster cursor.
    #[must_use]
    pub fn next_session(&self) -> Option<SessionHandle> {
        let snapshot = self.groups.load();
        match snapshot.ordered.len() {
            0 => None,
            1 => snapshot.ordered[0].1.next_session(),
            len => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
                snapshot.ordered[index].1.next_session()
            }
        }
    }

    /// One session from each non-empty group, in group order.
    #[must_use]
    pub fn one_session_per_group(&self) -> Vec<SessionHandle> {
        self.groups
            .load()
            .ordered
            .iter()
            .filter_map(|(_, group)| group.next_session())
            .collect()
    }

    /// Every session of every group, in group order.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<SessionHandle> {
        self.groups
            .load()
            .ordered
            .iter()
            .flat_map(|(_, group)| group.sessions())
            .collect()
    }

    /// Pick a non-empty group uniformly at random, then use its round-robin.
    #[must_use]
    pub fn random_session(&self) -> Option<SessionHandle> {
        let snapshot = self.groups.load();
        let candidates: Vec<&Arc<ClientGroup>> = snapshot
            .ordered
            .iter()
            .map(|(_, group)| group)
            .filter(|group| !group.is_empty())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = rand::rng().random_range(0..candidates.len());
        candidates[pick].next_session()
    }
}

impl fmt::Debug for ClientCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCluster")
            .field("name", &self.name)
            .field("groups", &self.group_names())
            .finish_non_exhaustive()
    }
}
