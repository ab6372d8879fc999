//! Connection lifecycle: per-request units of work, data-source pools,
//! transaction settlement, and the DAO statement helper.

pub mod config;
pub mod dao;
pub mod error;
pub mod manager;
pub mod traits;
pub mod unit;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DataSourceConfig, DatabaseConfig};
pub use dao::{Dao, FailurePolicy};
pub use error::{DbError, TxPhase};
pub use manager::ConnectionManager;
pub use traits::{Connection, ConnectionSource, ConnectionSourceFactory, Row, StatementExecutor};
pub use unit::{DiscardLevel, UnitOfWork, DEFAULT_SOURCE};
