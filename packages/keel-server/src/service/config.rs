use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::DatabaseConfig;
use crate::rpc::RemoteConfig;

/// Settings for the lock step of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Give up waiting for a method lock after this long. Waits forever when unset.
    pub acquire_timeout_ms: Option<u64>,
}

impl LockConfig {
    #[must_use]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Node-level configuration.
///
/// Every field has a default, so a config file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique identifier for this node.
    pub node_id: String,
    /// Deadline applied to invocations that do not carry their own.
    pub default_invocation_timeout_ms: Option<u64>,
    pub lock: LockConfig,
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_invocation_timeout_ms: None,
            lock: LockConfig::default(),
            database: DatabaseConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Errors from loading a [`NodeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid node config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl NodeConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or mistyped fields.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    #[must_use]
    pub fn default_invocation_timeout(&self) -> Option<Duration> {
        self.default_invocation_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = NodeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.lock.acquire_timeout(), None);
        assert_eq!(config.remote.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn loads_sources_and_timeouts_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "node_id": "gate-1",
                "default_invocation_timeout_ms": 2000,
                "lock": {{ "acquire_timeout_ms": 500 }},
                "database": {{
                    "default": {{ "url": "mysql://db/main" }},
                    "sources": {{ "log": {{ "url": "mysql://db/log", "max_connections": 4 }} }}
                }},
                "remote": {{ "retry_budget": 5 }}
            }}"#
        )
        .unwrap();

        let config = NodeConfig::from_path(file.path()).unwrap();
        assert_eq!(config.node_id, "gate-1");
        assert_eq!(config.default_invocation_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.lock.acquire_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.database.default.url, "mysql://db/main");
        assert_eq!(config.database.sources["log"].max_connections, 4);
        assert_eq!(config.database.sources["log"].min_idle, 1);
        assert_eq!(config.remote.retry_budget, 5);
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = NodeConfig::from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn mistyped_field_is_a_parse_error() {
        let err = NodeConfig::from_json_str(r#"{ "lock": { "acquire_timeout_ms": "soon" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
