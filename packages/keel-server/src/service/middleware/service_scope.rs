//! Connection scope for calls into local service objects.
//!
//! Claims the service discard level so DAO statements issued by the target
//! share one connection, then releases when the call returns. When the call
//! runs inside a remote scope the release is left to that outer scope. Lock
//! guards handed down by the lock layer are dropped after the release.

use std::sync::Arc;
use std::task::{Context, Poll};

use keel_core::Value;
use tower::{Layer, Service};

use super::release::ReleaseGuard;
use crate::db::{ConnectionManager, DiscardLevel};
use crate::service::invocation::{InvokeError, InvokeFuture, Invocation};

#[derive(Debug, Clone)]
pub struct ServiceScopeLayer {
    manager: Arc<ConnectionManager>,
}

impl ServiceScopeLayer {
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

impl<S> Layer<S> for ServiceScopeLayer {
    type Service = ServiceScopeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ServiceScopeService {
            inner,
            manager: Arc::clone(&self.manager),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceScopeService<S> {
    inner: S,
    manager: Arc<ConnectionManager>,
}

impl<S> Service<Invocation> for ServiceScopeService<S>
where
    S: Service<Invocation, Response = Value, Error = InvokeError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = InvokeError;
    type Future = InvokeFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let unit = Arc::clone(invocation.unit());
        self.manager.claim_discard_level(&unit, DiscardLevel::Service);
        let guard = ReleaseGuard::new(Arc::clone(&self.manager), unit, DiscardLevel::Service)
            .holding(invocation.ctx.locks.take());
        let fut = self.inner.call(invocation);

        Box::pin(async move { guard.finish(fut.await).await })
    }
}
