//! Data source configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pool settings for one data source.
///
/// Consumed by a [`ConnectionSourceFactory`](super::ConnectionSourceFactory);
/// Keel itself only reads the name it is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    /// Driver URL, e.g. `postgres://db:5432/game`.
    pub url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_idle: u32,
    /// How long `connect()` may wait for a free connection.
    pub connect_timeout_ms: u64,
}

impl DataSourceConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            max_connections: 10,
            min_idle: 1,
            connect_timeout_ms: 30_000,
        }
    }
}

/// The default data source plus any number of named ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub default: DataSourceConfig,
    /// Additional sources keyed by the name DAOs select them with.
    pub sources: BTreeMap<String, DataSourceConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_source_defaults() {
        let config = DataSourceConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_idle, 1);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: DatabaseConfig = serde_json::from_str(
            r#"{
                "default": { "url": "postgres://main" },
                "sources": { "log": { "url": "postgres://log", "max_connections": 2 } }
            }"#,
        )
        .expect("parse");
        assert_eq!(config.default.url, "postgres://main");
        assert_eq!(config.default.max_connections, 10);
        assert_eq!(config.sources["log"].max_connections, 2);
        assert_eq!(config.sources["log"].connect_timeout_ms, 30_000);
    }

    #[test]
    fn password_is_not_serialized() {
        let config = DataSourceConfig {
            password: "hunter2".to_string(),
            ..DataSourceConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(!json.contains("hunter2"));
    }
}
