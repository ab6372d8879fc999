//! In-memory connection doubles shared by the crate's unit tests.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{Connection, ConnectionSource};

/// Ordered record of every connection event across all mock sources.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, event: String) {
        self.0.lock().push(event);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == event).count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    connect: bool,
    commit: bool,
    close: bool,
    close_delay: Option<Duration>,
}

pub(crate) struct MockConnection {
    label: String,
    log: EventLog,
    faults: Faults,
}

#[async_trait]
impl Connection for MockConnection {
    async fn set_auto_commit(&self, auto_commit: bool) -> anyhow::Result<()> {
        self.log.push(format!("{} autocommit={auto_commit}", self.label));
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        if self.faults.commit {
            self.log.push(format!("{} commit failed", self.label));
            anyhow::bail!("commit refused");
        }
        self.log.push(format!("{} commit", self.label));
        Ok(())
    }

    async fn rollback(&self) -> anyhow::Result<()> {
        self.log.push(format!("{} rollback", self.label));
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Some(delay) = self.faults.close_delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.close {
            anyhow::bail!("socket already closed");
        }
        self.log.push(format!("{} close", self.label));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Source whose connections are labelled `<name>#<n>` in the event log.
pub(crate) struct MockSource {
    name: String,
    log: EventLog,
    opened: AtomicU32,
    faults: Faults,
}

impl MockSource {
    fn build(name: &str, log: &EventLog, faults: Faults) -> Arc<dyn ConnectionSource> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            opened: AtomicU32::new(0),
            faults,
        })
    }

    pub(crate) fn shared(name: &str, log: &EventLog) -> Arc<dyn ConnectionSource> {
        Self::build(name, log, Faults::default())
    }

    pub(crate) fn failing(name: &str, log: &EventLog) -> Arc<dyn ConnectionSource> {
        Self::build(name, log, Faults { connect: true, ..Faults::default() })
    }

    pub(crate) fn failing_commit(name: &str, log: &EventLog) -> Arc<dyn ConnectionSource> {
        Self::build(name, log, Faults { commit: true, ..Faults::default() })
    }

    pub(crate) fn failing_close(name: &str, log: &EventLog) -> Arc<dyn ConnectionSource> {
        Self::build(name, log, Faults { close: true, ..Faults::default() })
    }

    /// Connections that take `delay` to close.
    pub(crate) fn slow_close(name: &str, log: &EventLog, delay: Duration) -> Arc<dyn ConnectionSource> {
        Self::build(name, log, Faults { close_delay: Some(delay), ..Faults::default() })
    }
}

#[async_trait]
impl ConnectionSource for MockSource {
    async fn connect(&self) -> anyhow::Result<Arc<dyn Connection>> {
        if self.faults.connect {
            anyhow::bail!("pool exhausted");
        }
        let n = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        let label = format!("{}#{n}", self.name);
        self.log.push(format!("{label} open"));
        Ok(Arc::new(MockConnection {
            label,
            log: self.log.clone(),
            faults: self.faults,
        }))
    }
}
