//! Statement helper that applies DAO-level release discipline.
//!
//! Every operation acquires the unit's connection for the DAO's source,
//! runs one statement through the [`StatementExecutor`], and then asks the
//! manager to release at [`DiscardLevel::Dao`], which only happens when no
//! service or remote call is holding the unit open.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use keel_core::Value;
use tracing::{debug, error, warn};

use super::error::DbError;
use super::manager::ConnectionManager;
use super::traits::{Connection, Row, StatementExecutor};
use super::unit::{DiscardLevel, UnitOfWork, DEFAULT_SOURCE};

/// What a DAO does when a statement fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return the failure as [`DbError::Storage`].
    #[default]
    Propagate,
    /// Log the failure and return an empty result (`0`, empty, `None`).
    ///
    /// Compatibility mode for callers written against the legacy
    /// behaviour. Unknown data sources are still reported as errors.
    LogAndDefault,
}

/// Runs statements against one data source on behalf of a repository type.
#[derive(Clone)]
pub struct Dao {
    manager: Arc<ConnectionManager>,
    executor: Arc<dyn StatementExecutor>,
    source: Option<String>,
    policy: FailurePolicy,
}

impl Dao {
    /// A DAO over the default data source.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>, executor: Arc<dyn StatementExecutor>) -> Self {
        Self {
            manager,
            executor,
            source: None,
            policy: FailurePolicy::default(),
        }
    }

    /// Route every statement to the named data source instead.
    #[must_use]
    pub fn with_source(mut self, name: impl Into<String>) -> Self {
        self.source = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn source_name(&self) -> &str {
        self.source.as_deref().unwrap_or(DEFAULT_SOURCE)
    }

    /// Execute an `INSERT`/`UPDATE`/`DELETE`; returns the affected row count.
    ///
    /// # Errors
    ///
    /// See [`FailurePolicy`]; configuration errors always propagate.
    pub async fn update(&self, unit: &UnitOfWork, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.run(unit, "update", sql, &params, |conn| async move {
            self.executor.update(conn.as_ref(), sql, params).await
        })
        .await
    }

    /// Execute `sql` once per parameter set.
    ///
    /// # Errors
    ///
    /// See [`FailurePolicy`]; configuration errors always propagate.
    pub async fn batch(
        &self,
        unit: &UnitOfWork,
        sql: &str,
        params: &[Vec<Value>],
    ) -> Result<Vec<u64>, DbError> {
        self.run(unit, "batch", sql, &params, |conn| async move {
            self.executor.batch(conn.as_ref(), sql, params).await
        })
        .await
    }

    /// Execute an `INSERT` and return the generated key.
    ///
    /// # Errors
    ///
    /// See [`FailurePolicy`]; configuration errors always propagate.
    pub async fn insert_returning_key(
        &self,
        unit: &UnitOfWork,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Value>, DbError> {
        self.run(unit, "insert", sql, &params, |conn| async move {
            self.executor.insert(conn.as_ref(), sql, params).await
        })
        .await
    }

    /// Run a query and return all rows.
    ///
    /// # Errors
    ///
    /// See [`FailurePolicy`]; configuration errors always propagate.
    pub async fn query(&self, unit: &UnitOfWork, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.run(unit, "query", sql, &params, |conn| async move {
            self.executor.query(conn.as_ref(), sql, params).await
        })
        .await
    }

    /// Run a query and return its first row.
    ///
    /// # Errors
    ///
    /// See [`FailurePolicy`]; configuration errors always propagate.
    pub async fn query_one(
        &self,
        unit: &UnitOfWork,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, DbError> {
        Ok(self.query(unit, sql, params).await?.into_iter().next())
    }

    /// First column of the first row.
    ///
    /// # Errors
    ///
    /// See [`FailurePolicy`]; configuration errors always propagate.
    pub async fn scalar(&self, unit: &UnitOfWork, sql: &str, params: &[Value]) -> Result<Option<Value>, DbError> {
        Ok(self
            .query_one(unit, sql, params)
            .await?
            .and_then(|row| row.first().cloned()))
    }

    /// First column of every row.
    ///
    /// # Errors
    ///
    /// See [`FailurePolicy`]; configuration errors always propagate.
    pub async fn column(&self, unit: &UnitOfWork, sql: &str, params: &[Value]) -> Result<Vec<Value>, DbError> {
        Ok(self
            .query(unit, sql, params)
            .await?
            .iter()
            .filter_map(|row| row.first().cloned())
            .collect())
    }

    async fn run<T, F, Fut>(
        &self,
        unit: &UnitOfWork,
        operation: &'static str,
        sql: &str,
        params: &(dyn fmt::Debug + Sync),
        execute: F,
    ) -> Result<T, DbError>
    where
        T: Default,
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let source_name = self.source_name();
        debug!(unit = unit.id(), source = source_name, sql, ?params, "{operation}");

        let outcome = match self.manager.acquire(unit, self.source.as_deref()).await {
            Ok(conn) => execute(conn).await.map_err(|source| DbError::Storage {
                operation,
                source_name: source_name.to_string(),
                source,
            }),
            Err(err) => Err(err),
        };

        let released = self.manager.release_if_owner(unit, DiscardLevel::Dao).await;

        match (outcome, released) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(value), Err(release_err)) => match self.policy {
                FailurePolicy::Propagate => Err(release_err),
                FailurePolicy::LogAndDefault => {
                    warn!(unit = unit.id(), error = %release_err, "release after {operation} failed");
                    Ok(value)
                }
            },
            (Err(err @ DbError::Configuration { .. }), _) => Err(err),
            (Err(err), released) => {
                if let Err(release_err) = released {
                    warn!(unit = unit.id(), error = %release_err, "release after failed {operation} also failed");
                }
                match self.policy {
                    FailurePolicy::Propagate => Err(err),
                    FailurePolicy::LogAndDefault => {
                        error!(unit = unit.id(), sql, error = %err, "statement failed, returning empty result");
                        Ok(T::default())
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Dao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dao")
            .field("source", &self.source_name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
