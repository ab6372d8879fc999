use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use keel_core::SessionHandle;

use super::cluster::ClientCluster;
use super::error::RemoteError;

/// Where an outbound call should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Round-robin within one named group.
    Group { cluster: String, group: String },
    /// A random non-empty group of the cluster.
    Random { cluster: String },
    /// Cluster-wide round-robin across groups.
    RoundRobin { cluster: String },
    /// A session the caller already holds.
    Session(SessionHandle),
}

impl Destination {
    #[must_use]
    pub fn group(cluster: impl Into<String>, group: impl Into<String>) -> Self {
        Destination::Group {
            cluster: cluster.into(),
            group: group.into(),
        }
    }

    #[must_use]
    pub fn random(cluster: impl Into<String>) -> Self {
        Destination::Random {
            cluster: cluster.into(),
        }
    }

    #[must_use]
    pub fn round_robin(cluster: impl Into<String>) -> Self {
        Destination::RoundRobin {
            cluster: cluster.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Group { cluster, group } => write!(f, "group `{group}` of cluster `{cluster}`"),
            Destination::Random { cluster } => write!(f, "a random group of cluster `{cluster}`"),
            Destination::RoundRobin { cluster } => write!(f, "cluster `{cluster}`"),
            Destination::Session(session) => write!(f, "{session}"),
        }
    }
}

/// Every remote cluster this node talks to, by name.
#[derive(Debug, Default)]
pub struct ClientDirectory {
    clusters: DashMap<String, Arc<ClientCluster>>,
}

impl ClientDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cluster` under its own name, replacing any previous one.
    pub fn add_cluster(&self, cluster: Arc<ClientCluster>) {
        self.clusters.insert(cluster.name().to_string(), cluster);
    }

    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<Arc<ClientCluster>> {
        self.clusters.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a cluster by name.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::UnknownCluster`] if it is not registered.
    pub fn require_cluster(&self, name: &str) -> Result<Arc<ClientCluster>, RemoteError> {
        self.cluster(name).ok_or_else(|| RemoteError::UnknownCluster {
            cluster: name.to_string(),
        })
    }

    /// Forget `session` everywhere, e.g. once its connection has closed.
    pub fn remove_session(&self, session: &SessionHandle) -> bool {
        let mut removed = false;
        for entry in &self.clusters {
            removed |= entry.value().remove_session(session);
        }
        removed
    }

    /// Pick the session a call to `destination` should use.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::UnknownCluster`] or [`RemoteError::UnknownGroup`]
    /// for unregistered names, and [`RemoteError::Unavailable`] when the
    /// destination currently has no sessions.
    pub fn resolve(&self, destination: &Destination) -> Result<SessionHandle, RemoteError> {
        let picked = match destination {
            Destination::Session(session) => Some(session.clone()),
            Destination::Group { cluster, group } => {
                self.require_cluster(cluster)?.session_by_group_name(group)?
            }
            Destination::Random { cluster } => self.require_cluster(cluster)?.random_session(),
            Destination::RoundRobin { cluster } => self.require_cluster(cluster)?.next_session(),
        };
        picked.ok_or_else(|| RemoteError::Unavailable {
            destination: destination.to_string(),
        })
    }
}
