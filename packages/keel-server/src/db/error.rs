use std::fmt;

/// Which half of transaction settlement failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Commit,
    Rollback,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxPhase::Commit => f.write_str("commit"),
            TxPhase::Rollback => f.write_str("rollback"),
        }
    }
}

/// Errors raised by the connection manager and the DAO helper.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("no data source registered under `{source_name}`")]
    Configuration { source_name: String },

    #[error("{operation} on data source `{source_name}` failed: {source}")]
    Storage {
        operation: &'static str,
        source_name: String,
        source: anyhow::Error,
    },

    #[error("{phase} on data source `{source_name}` failed: {source}")]
    Transaction {
        phase: TxPhase,
        source_name: String,
        source: anyhow::Error,
    },

    #[error("releasing connection to `{source_name}` failed: {source}")]
    Release {
        source_name: String,
        source: anyhow::Error,
    },
}

impl DbError {
    /// Name of the data source the failure concerns.
    #[must_use]
    pub fn source_name(&self) -> &str {
        match self {
            DbError::Configuration { source_name }
            | DbError::Storage { source_name, .. }
            | DbError::Transaction { source_name, .. }
            | DbError::Release { source_name, .. } => source_name,
        }
    }
}
