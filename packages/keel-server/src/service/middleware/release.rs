//! Cleanup shared by the scope layers: transaction settlement, connection
//! release and unlocking, in that order.
//!
//! Cleanup runs on its own task once the target has returned, so a deadline
//! that expires mid-close cannot strand connections the unit no longer
//! references.

use std::sync::Arc;

use keel_core::Value;
use tracing::{debug, error, warn};

use crate::db::{ConnectionManager, DbError, DiscardLevel, UnitOfWork};
use crate::service::invocation::InvokeError;
use crate::sync::LockGuard;

/// Everything a scope must undo, in reverse order of acquisition.
struct Scope {
    manager: Arc<ConnectionManager>,
    unit: Arc<UnitOfWork>,
    level: DiscardLevel,
    transactional: bool,
    locks: Vec<LockGuard>,
}

impl Scope {
    async fn close(self, outcome: Result<Value, InvokeError>) -> Result<Value, InvokeError> {
        let settled = if self.transactional {
            settle(&self.manager, &self.unit, outcome).await
        } else {
            outcome
        };
        let released = self.manager.release_if_owner(&self.unit, self.level).await;
        let result = after_release(&self.unit, settled, released);
        drop(self.locks);
        result
    }

    async fn abandon(self) {
        if self.transactional {
            if let Err(err) = self.manager.rollback(&self.unit).await {
                warn!(unit = self.unit.id(), error = %err, "rollback of abandoned invocation failed");
            }
        }
        if let Err(err) = self.manager.release_if_owner(&self.unit, self.level).await {
            warn!(unit = self.unit.id(), error = %err, "release of abandoned invocation failed");
        }
        drop(self.locks);
    }
}

/// Cleans up a scoped call exactly once.
///
/// [`finish`](Self::finish) settles, releases and unlocks on a spawned task
/// and waits for it. If the call is dropped before `finish` (timeout,
/// cancellation), the guard spawns a rollback (for transactional calls),
/// the release and the unlock instead.
pub(crate) struct ReleaseGuard {
    scope: Option<Scope>,
}

impl ReleaseGuard {
    pub(crate) fn new(manager: Arc<ConnectionManager>, unit: Arc<UnitOfWork>, level: DiscardLevel) -> Self {
        Self {
            scope: Some(Scope {
                manager,
                unit,
                level,
                transactional: false,
                locks: Vec::new(),
            }),
        }
    }

    /// Commit or roll back before releasing.
    pub(crate) fn transactional(mut self, transactional: bool) -> Self {
        if let Some(scope) = self.scope.as_mut() {
            scope.transactional = transactional;
        }
        self
    }

    /// Keep `locks` until the release has finished.
    pub(crate) fn holding(mut self, locks: Vec<LockGuard>) -> Self {
        if let Some(scope) = self.scope.as_mut() {
            scope.locks.extend(locks);
        }
        self
    }

    pub(crate) async fn finish(mut self, outcome: Result<Value, InvokeError>) -> Result<Value, InvokeError> {
        let Some(scope) = self.scope.take() else {
            return outcome;
        };
        let unit = scope.unit.id();
        match tokio::spawn(scope.close(outcome)).await {
            Ok(result) => result,
            Err(join_err) => {
                error!(unit, error = %join_err, "cleanup task did not complete");
                Err(InvokeError::Failed(anyhow::anyhow!("cleanup of unit {unit} failed: {join_err}")))
            }
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(scope) = self.scope.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(unit = scope.unit.id(), level = %scope.level, "invocation dropped outside a runtime, connections left open");
            return;
        };
        debug!(unit = scope.unit.id(), level = %scope.level, "invocation abandoned, releasing in background");
        runtime.spawn(scope.abandon());
    }
}

/// Commit on success, roll back on failure.
///
/// A failed commit is followed by a rollback attempt and reported as the
/// commit error. A failed rollback after a target failure is reported in
/// place of the target failure, which is logged.
async fn settle(
    manager: &ConnectionManager,
    unit: &UnitOfWork,
    outcome: Result<Value, InvokeError>,
) -> Result<Value, InvokeError> {
    match outcome {
        Ok(value) => match manager.commit(unit).await {
            Ok(()) => Ok(value),
            Err(commit_err) => {
                if let Err(rollback_err) = manager.rollback(unit).await {
                    warn!(unit = unit.id(), error = %rollback_err, "rollback after failed commit also failed");
                }
                Err(commit_err.into())
            }
        },
        Err(err) => match manager.rollback(unit).await {
            Ok(()) => Err(err),
            Err(rollback_err) => {
                error!(unit = unit.id(), error = %err, "invocation failed and its transaction could not be rolled back");
                Err(rollback_err.into())
            }
        },
    }
}

/// Combine an invocation outcome with the outcome of its release.
///
/// A target failure wins over a release failure, which is logged. A
/// release failure after a successful call is returned.
fn after_release(
    unit: &UnitOfWork,
    outcome: Result<Value, InvokeError>,
    released: Result<bool, DbError>,
) -> Result<Value, InvokeError> {
    match (outcome, released) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(release_err)) => Err(release_err.into()),
        (Err(err), Ok(_)) => Err(err),
        (Err(err), Err(release_err)) => {
            warn!(unit = unit.id(), error = %release_err, "release after failed invocation also failed");
            Err(err)
        }
    }
}
