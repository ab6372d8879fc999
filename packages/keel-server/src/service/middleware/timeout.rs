//! Timeout middleware for invocations.
//!
//! Rejects invocations that exceed their deadline with `InvokeError::Timeout`.
//! Dropping the inner future on expiry releases any lock and connections it
//! holds.

use std::task::{Context, Poll};
use std::time::Duration;

use keel_core::Value;
use tower::{Layer, Service};

use crate::service::invocation::{InvokeError, InvokeFuture, Invocation};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that enforces a per-invocation deadline.
///
/// The deadline is read from each invocation's `ctx.timeout`, falling back
/// to the layer default. With neither set the call is not bounded.
#[derive(Debug, Clone, Default)]
pub struct TimeoutLayer {
    default: Option<Duration>,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(default: Option<Duration>) -> Self {
        Self { default }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            default: self.default,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    default: Option<Duration>,
}

impl<S> Service<Invocation> for TimeoutService<S>
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
        let Some(limit) = invocation.ctx.timeout.or(self.default) else {
            return Box::pin(self.inner.call(invocation));
        };
        let service = invocation.ctx.service.clone();
        let method = invocation.ctx.method.clone();
        let fut = self.inner.call(invocation);
        Box::pin(async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(InvokeError::Timeout {
                    service,
                    method,
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::{service_fn, ServiceExt};

    use super::*;

    fn slow(delay_ms: u64) -> impl Service<Invocation, Response = Value, Error = InvokeError, Future = InvokeFuture> {
        service_fn(move |_inv: Invocation| -> InvokeFuture {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(Value::Null)
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer::new(Some(Duration::from_millis(1000))).layer(slow(10));
        let resp = svc.oneshot(Invocation::new("Bag", "buy")).await.unwrap();
        assert_eq!(resp, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn per_invocation_deadline_overrides_default() {
        let svc = TimeoutLayer::new(Some(Duration::from_millis(1000))).layer(slow(200));
        let inv = Invocation::new("Bag", "buy").with_timeout(Duration::from_millis(50));
        let err = svc.oneshot(inv).await.unwrap_err();
        assert_eq!(err.to_string(), "Bag.buy timed out after 50ms");
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_without_any_deadline() {
        let svc = TimeoutLayer::default().layer(slow(60_000));
        assert!(svc.oneshot(Invocation::new("Bag", "buy")).await.is_ok());
    }
}
