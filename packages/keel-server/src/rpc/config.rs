use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outbound call settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Deadline for a single attempt.
    pub call_timeout_ms: u64,
    /// Extra attempts made by `sync_call_with_retry` after the first one fails.
    pub retry_budget: u32,
    /// Pause between attempts.
    pub retry_backoff_ms: u64,
}

impl RemoteConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            retry_budget: 3,
            retry_backoff_ms: 100,
        }
    }
}
