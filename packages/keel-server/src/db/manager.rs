//! Connection manager: hands out unit-scoped connections and decides, via
//! discard levels, which call boundary releases them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::config::{DataSourceConfig, DatabaseConfig};
use super::error::{DbError, TxPhase};
use super::traits::{Connection, ConnectionSource, ConnectionSourceFactory};
use super::unit::{DiscardLevel, HeldConnections, UnitOfWork, DEFAULT_SOURCE};

/// Owns the default data source plus any named ones.
///
/// Shared as `Arc<ConnectionManager>`; all per-request state lives in the
/// [`UnitOfWork`] passed to each call.
pub struct ConnectionManager {
    default: Arc<dyn ConnectionSource>,
    named: HashMap<String, Arc<dyn ConnectionSource>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(default: Arc<dyn ConnectionSource>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    /// Register an additional data source. Re-registering a name replaces it.
    #[must_use]
    pub fn with_source(mut self, name: impl Into<String>, source: Arc<dyn ConnectionSource>) -> Self {
        self.named.insert(name.into(), source);
        self
    }

    /// Build every configured source through `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Storage`] naming the first source the factory
    /// could not create.
    pub fn from_config(
        config: &DatabaseConfig,
        factory: &dyn ConnectionSourceFactory,
    ) -> Result<Self, DbError> {
        let create = |name: &str, source_config: &DataSourceConfig| {
            factory
                .create(name, source_config)
                .map_err(|source| DbError::Storage {
                    operation: "create data source",
                    source_name: name.to_string(),
                    source,
                })
        };
        let mut manager = Self::new(create(DEFAULT_SOURCE, &config.default)?);
        for (name, source_config) in &config.sources {
            manager.named.insert(name.clone(), create(name, source_config)?);
        }
        Ok(manager)
    }

    /// Whether `name` is a registered named source.
    #[must_use]
    pub fn has_source(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Return the unit's connection for `source` (the default source when
    /// `None`), opening one if the unit holds none yet.
    ///
    /// A connection opened while the unit's transaction is open has
    /// autocommit switched off before it is handed out.
    ///
    /// # Errors
    ///
    /// - [`DbError::Configuration`] if `source` is not registered.
    /// - [`DbError::Storage`] if the pool cannot supply a connection or
    ///   autocommit cannot be changed.
    pub async fn acquire(
        &self,
        unit: &UnitOfWork,
        source: Option<&str>,
    ) -> Result<Arc<dyn Connection>, DbError> {
        let label = source.unwrap_or(DEFAULT_SOURCE);
        let pool = match source {
            None => &self.default,
            Some(name) => self.named.get(name).ok_or_else(|| DbError::Configuration {
                source_name: name.to_string(),
            })?,
        };

        if let Some(conn) = unit.connection(source) {
            return Ok(conn);
        }

        let conn = pool.connect().await.map_err(|source| DbError::Storage {
            operation: "acquire connection",
            source_name: label.to_string(),
            source,
        })?;

        if unit.is_transaction_open() {
            if let Err(source) = conn.set_auto_commit(false).await {
                close_quietly(label, conn.as_ref()).await;
                return Err(DbError::Storage {
                    operation: "begin transaction",
                    source_name: label.to_string(),
                    source,
                });
            }
        }

        match unit.hold(source, Arc::clone(&conn)) {
            None => {
                debug!(unit = unit.id(), source = label, "connection acquired");
                Ok(conn)
            }
            Some(existing) => {
                // Another task sharing this unit got there first.
                close_quietly(label, conn.as_ref()).await;
                Ok(existing)
            }
        }
    }

    /// See [`UnitOfWork::open_transaction`].
    pub fn open_transaction(&self, unit: &UnitOfWork) {
        unit.open_transaction();
    }

    /// See [`UnitOfWork::claim_discard_level`].
    pub fn claim_discard_level(&self, unit: &UnitOfWork, level: DiscardLevel) {
        unit.claim_discard_level(level);
    }

    /// Release the unit's connections if the layer at `level` owns the release.
    ///
    /// `Dao` releases only when no outer layer has claimed the unit,
    /// `Service` only when no remote layer has, `Remote` always. A release
    /// restores autocommit, closes every connection, and clears all flags.
    /// Returns whether a release happened.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Release`] for the first connection that failed to
    /// close. The unit is reset and every connection is attempted regardless.
    pub async fn release_if_owner(
        &self,
        unit: &UnitOfWork,
        level: DiscardLevel,
    ) -> Result<bool, DbError> {
        let Some(held) = unit.take_if_owner(level) else {
            return Ok(false);
        };
        debug!(unit = unit.id(), %level, connections = held.len(), "releasing unit");
        release_connections(held).await?;
        Ok(true)
    }

    /// Commit every connection the unit holds.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Transaction`] with [`TxPhase::Commit`] on the first
    /// failure; later connections are not committed.
    pub async fn commit(&self, unit: &UnitOfWork) -> Result<(), DbError> {
        for (name, conn) in unit.held_connections() {
            conn.commit().await.map_err(|source| DbError::Transaction {
                phase: TxPhase::Commit,
                source_name: name.clone(),
                source,
            })?;
            debug!(unit = unit.id(), source = %name, "committed");
        }
        Ok(())
    }

    /// Roll back every connection the unit holds.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Transaction`] with [`TxPhase::Rollback`] for the
    /// first failure, after attempting all connections.
    pub async fn rollback(&self, unit: &UnitOfWork) -> Result<(), DbError> {
        let mut first_err = None;
        for (name, conn) in unit.held_connections() {
            if let Err(source) = conn.rollback().await {
                warn!(unit = unit.id(), source = %name, error = %source, "rollback failed");
                first_err.get_or_insert(DbError::Transaction {
                    phase: TxPhase::Rollback,
                    source_name: name,
                    source,
                });
            } else {
                debug!(unit = unit.id(), source = %name, "rolled back");
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sources: Vec<&str> = self.named.keys().map(String::as_str).collect();
        sources.sort_unstable();
        f.debug_struct("ConnectionManager")
            .field("sources", &sources)
            .finish_non_exhaustive()
    }
}

/// Restore autocommit and close each connection, reporting the first failure.
async fn release_connections(held: HeldConnections) -> Result<(), DbError> {
    let mut first_err = None;
    for (name, conn) in held {
        let restored = conn.set_auto_commit(true).await;
        let closed = conn.close().await;
        if let Err(source) = restored.and(closed) {
            warn!(source = %name, error = %source, "failed to release connection");
            first_err.get_or_insert(DbError::Release {
                source_name: name,
                source,
            });
        }
    }
    first_err.map_or(Ok(()), Err)
}

async fn close_quietly(label: &str, conn: &dyn Connection) {
    if let Err(error) = conn.close().await {
        warn!(source = label, %error, "failed to close surplus connection");
    }
}
