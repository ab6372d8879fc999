use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::Value;

use super::config::DataSourceConfig;

/// A live database connection handed out by a [`ConnectionSource`].
///
/// Methods take `&self` so one connection can be shared by every nested
/// call of a unit of work; implementations use interior mutability.
#[async_trait]
pub trait Connection: Send + Sync + Any {
    /// Switch autocommit on or off.
    async fn set_auto_commit(&self, auto_commit: bool) -> anyhow::Result<()>;

    /// Commit the current transaction.
    async fn commit(&self) -> anyhow::Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> anyhow::Result<()>;

    /// Return the connection to its pool (or close it).
    async fn close(&self) -> anyhow::Result<()>;

    /// Downcast hook for statement executors that need the driver type.
    fn as_any(&self) -> &dyn Any;
}

/// A pool (or any other factory) of connections for one data source.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Hand out a connection. May wait as long as the pool's own timeout.
    async fn connect(&self) -> anyhow::Result<Arc<dyn Connection>>;
}

/// Builds [`ConnectionSource`]s from configuration.
///
/// The pool implementation lives outside this crate; this is the seam it
/// plugs into when a `ConnectionManager` is built from a `DatabaseConfig`.
pub trait ConnectionSourceFactory: Send + Sync {
    fn create(&self, name: &str, config: &DataSourceConfig) -> anyhow::Result<Arc<dyn ConnectionSource>>;
}

/// One result row. Columns keep their select-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    #[must_use]
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Looks up a column by label (case-insensitive, as SQL labels are).
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Executes SQL on a connection supplied by the connection manager.
///
/// Implemented by the data-access wrapper; statement preparation, parameter
/// binding and result mapping are its concern, not Keel's.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Run an `INSERT`/`UPDATE`/`DELETE`, returning the affected row count.
    async fn update(&self, conn: &dyn Connection, sql: &str, params: &[Value]) -> anyhow::Result<u64>;

    /// Run one statement per parameter set, returning per-set row counts.
    async fn batch(
        &self,
        conn: &dyn Connection,
        sql: &str,
        params: &[Vec<Value>],
    ) -> anyhow::Result<Vec<u64>>;

    /// Run an `INSERT` and return the generated key, if any.
    async fn insert(&self, conn: &dyn Connection, sql: &str, params: &[Value]) -> anyhow::Result<Option<Value>>;

    /// Run a query and return every row.
    async fn query(&self, conn: &dyn Connection, sql: &str, params: &[Value]) -> anyhow::Result<Vec<Row>>;
}
