//! Request and error types flowing through the interception pipeline.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keel_core::{CodeError, ParamMap, Value};
use parking_lot::Mutex;

use crate::db::{DbError, UnitOfWork};
use crate::rpc::RemoteError;
use crate::sync::{LockError, LockGuard};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Boxed future returned by every layer of the pipeline.
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<Value, InvokeError>> + Send>>;

/// Per-call metadata shared by every layer.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub call_id: u64,
    pub service: String,
    pub method: String,
    /// Connection state shared with any nested calls made by the target.
    pub unit: Arc<UnitOfWork>,
    /// Overrides the pipeline's default deadline when set.
    pub timeout: Option<Duration>,
    /// Named locks taken for this call, not yet claimed by a scope.
    pub locks: HeldLocks,
}

/// Lock guards passed from the lock layer to the connection scope below it.
///
/// The scope drops them only after its rollback and release, so the next
/// holder of the name never sees this call's open transaction.
#[derive(Debug, Clone, Default)]
pub struct HeldLocks(Arc<Mutex<Vec<LockGuard>>>);

impl HeldLocks {
    pub fn push(&self, guard: LockGuard) {
        self.0.lock().push(guard);
    }

    /// Remove every guard, leaving the slot empty.
    #[must_use]
    pub fn take(&self) -> Vec<LockGuard> {
        std::mem::take(&mut *self.0.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A method call on a local service object.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub ctx: InvocationContext,
    pub args: ParamMap,
}

impl Invocation {
    /// New call on a fresh unit of work.
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::within(service, method, Arc::new(UnitOfWork::new()))
    }

    /// New call that shares `unit` with its caller.
    #[must_use]
    pub fn within(service: impl Into<String>, method: impl Into<String>, unit: Arc<UnitOfWork>) -> Self {
        Self {
            ctx: InvocationContext {
                call_id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
                service: service.into(),
                method: method.into(),
                unit,
                timeout: None,
                locks: HeldLocks::default(),
            },
            args: ParamMap::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn unit(&self) -> &Arc<UnitOfWork> {
        &self.ctx.unit
    }
}

/// How the pipeline treats one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodPolicy {
    /// Serialize calls under this name (prefixed before locking).
    pub lock_name: Option<String>,
    /// Open a transaction when the call arrives from a remote peer.
    pub transactional: bool,
}

impl MethodPolicy {
    #[must_use]
    pub fn locked(name: impl Into<String>) -> Self {
        Self {
            lock_name: Some(name.into()),
            transactional: false,
        }
    }

    #[must_use]
    pub fn transactional() -> Self {
        Self {
            lock_name: None,
            transactional: true,
        }
    }

    #[must_use]
    pub fn and_transactional(mut self) -> Self {
        self.transactional = true;
        self
    }
}

/// Per-method policies fixed at construction time.
///
/// Methods without an entry get [`MethodPolicy::default`]: no lock and no
/// transaction.
#[derive(Debug, Clone, Default)]
pub struct MethodPolicies {
    by_service: HashMap<String, HashMap<String, MethodPolicy>>,
}

impl MethodPolicies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, service: &str, method: &str, policy: MethodPolicy) -> Self {
        self.insert(service, method, policy);
        self
    }

    pub fn insert(&mut self, service: &str, method: &str, policy: MethodPolicy) {
        self.by_service
            .entry(service.to_string())
            .or_default()
            .insert(method.to_string(), policy);
    }

    #[must_use]
    pub fn get(&self, service: &str, method: &str) -> Option<&MethodPolicy> {
        self.by_service.get(service)?.get(method)
    }

    #[must_use]
    pub fn lock_name(&self, service: &str, method: &str) -> Option<&str> {
        self.get(service, method)?.lock_name.as_deref()
    }

    #[must_use]
    pub fn is_transactional(&self, service: &str, method: &str) -> bool {
        self.get(service, method).is_some_and(|policy| policy.transactional)
    }
}

/// Everything an intercepted call can fail with.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Business rejection raised by the target.
    #[error("rejected: {0}")]
    Rejected(#[from] CodeError),

    #[error("{service}.{method} timed out after {timeout_ms}ms")]
    Timeout {
        service: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("invocation failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl InvokeError {
    /// Short label used for metrics and log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            InvokeError::Lock(_) => "lock",
            InvokeError::Db(_) => "db",
            InvokeError::Remote(_) => "remote",
            InvokeError::Rejected(_) => "rejected",
            InvokeError::Timeout { .. } => "timeout",
            InvokeError::Failed(_) => "failed",
        }
    }
}
