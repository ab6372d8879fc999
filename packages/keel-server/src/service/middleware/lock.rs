//! Serializes calls to methods that declare a lock name.
//!
//! The guard is handed to the inner call through
//! [`InvocationContext::locks`](crate::service::InvocationContext::locks).
//! A connection scope below takes it and drops it after its own rollback
//! and release, even when the call is cancelled. Without a scope the guard
//! is dropped when the inner call returns. A method without a lock name
//! passes straight through.

use std::sync::Arc;
use std::task::{Context, Poll};

use keel_core::Value;
use tower::{Layer, Service};

use crate::service::config::LockConfig;
use crate::service::invocation::{InvokeError, InvokeFuture, Invocation, MethodPolicies};
use crate::sync::{LockRegistry, LockToken};

/// Prefix applied to every method lock name before it reaches the registry.
pub const LOCK_PREFIX: &str = "synchronized-";

#[derive(Debug, Clone)]
pub struct LockLayer {
    registry: Arc<LockRegistry>,
    policies: Arc<MethodPolicies>,
    config: LockConfig,
}

impl LockLayer {
    #[must_use]
    pub fn new(registry: Arc<LockRegistry>, policies: Arc<MethodPolicies>, config: LockConfig) -> Self {
        Self {
            registry,
            policies,
            config,
        }
    }
}

impl<S> Layer<S> for LockLayer {
    type Service = LockService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LockService {
            inner,
            registry: Arc::clone(&self.registry),
            policies: Arc::clone(&self.policies),
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockService<S> {
    inner: S,
    registry: Arc<LockRegistry>,
    policies: Arc<MethodPolicies>,
    config: LockConfig,
}

impl<S> Service<Invocation> for LockService<S>
where
    S: Service<Invocation, Response = Value, Error = InvokeError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = InvokeError;
    type Future = InvokeFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let Some(name) = self
            .policies
            .lock_name(&invocation.ctx.service, &invocation.ctx.method)
        else {
            return Box::pin(self.inner.call(invocation));
        };
        let lock_name = format!("{LOCK_PREFIX}{name}");
        let registry = Arc::clone(&self.registry);
        let acquire_timeout = self.config.acquire_timeout();

        // The inner call must not start before the lock is held, so take
        // the service that was driven ready and leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let token = LockToken::new();
            let guard = match acquire_timeout {
                Some(limit) => registry.try_lock_guard_for(lock_name, token, limit).await?,
                None => registry.lock_guard(lock_name, token).await,
            };
            let held = invocation.ctx.locks.clone();
            held.push(guard);
            let result = inner.call(invocation).await;
            drop(held.take());
            result
        })
    }
}
