//! Connection and transaction scope for calls that arrived from a peer.
//!
//! This is the outermost connection boundary of a request: it optionally
//! opens a transaction, claims the remote discard level, settles the
//! transaction once the target returns, and always performs the final
//! release before dropping any lock guards handed down to it.

use std::sync::Arc;
use std::task::{Context, Poll};

use keel_core::Value;
use tower::{Layer, Service};

use super::release::ReleaseGuard;
use crate::db::{ConnectionManager, DiscardLevel};
use crate::service::invocation::{InvokeError, InvokeFuture, Invocation, MethodPolicies};

#[derive(Debug, Clone)]
pub struct RemoteScopeLayer {
    manager: Arc<ConnectionManager>,
    policies: Arc<MethodPolicies>,
}

impl RemoteScopeLayer {
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>, policies: Arc<MethodPolicies>) -> Self {
        Self { manager, policies }
    }
}

impl<S> Layer<S> for RemoteScopeLayer {
    type Service = RemoteScopeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RemoteScopeService {
            inner,
            manager: Arc::clone(&self.manager),
            policies: Arc::clone(&self.policies),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteScopeService<S> {
    inner: S,
    manager: Arc<ConnectionManager>,
    policies: Arc<MethodPolicies>,
}

impl<S> Service<Invocation> for RemoteScopeService<S>
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
        let transactional = self
            .policies
            .is_transactional(&invocation.ctx.service, &invocation.ctx.method);
        if transactional {
            self.manager.open_transaction(&unit);
        }
        self.manager.claim_discard_level(&unit, DiscardLevel::Remote);
        let guard = ReleaseGuard::new(Arc::clone(&self.manager), unit, DiscardLevel::Remote)
            .transactional(transactional)
            .holding(invocation.ctx.locks.take());
        let fut = self.inner.call(invocation);

        Box::pin(async move { guard.finish(fut.await).await })
    }
}
