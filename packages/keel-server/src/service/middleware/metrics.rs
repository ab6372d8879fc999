//! Metrics middleware for invocations.
//!
//! Wraps every call in an `invocation` span and records its count and
//! duration through the `metrics` facade.

use std::task::{Context, Poll};
use std::time::Instant;

use keel_core::Value;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::invocation::{InvokeError, InvokeFuture, Invocation};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments invocations with timing and outcome.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Invocation> for MetricsService<S>
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
        let service = invocation.ctx.service.clone();
        let method = invocation.ctx.method.clone();
        let call_id = invocation.ctx.call_id;

        let span = info_span!(
            "invocation",
            service = %service,
            method = %method,
            call_id = call_id,
            unit = invocation.ctx.unit.id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(invocation);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.kind(),
                };

                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "keel_invocations_total",
                    "service" => service.clone(),
                    "method" => method.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!(
                    "keel_invocation_duration_ms",
                    "service" => service.clone(),
                    "method" => method.clone()
                )
                .record(duration_ms);

                match &result {
                    Ok(_) => tracing::info!(service = %service, method = %method, call_id, duration_ms, "invocation complete"),
                    Err(err) => tracing::warn!(
                        service = %service,
                        method = %method,
                        call_id,
                        duration_ms,
                        error = %err,
                        "invocation failed"
                    ),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::{service_fn, ServiceExt};

    use super::*;

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(service_fn(|inv: Invocation| -> InvokeFuture {
            Box::pin(async move { Ok(Value::Int(i64::try_from(inv.args.len()).unwrap_or(-1))) })
        }));

        let resp = svc
            .oneshot(Invocation::new("Bag", "count").arg("roleId", 1_i64))
            .await
            .unwrap();
        assert_eq!(resp, Value::Int(1));
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_errors() {
        let svc = MetricsLayer.layer(service_fn(|_inv: Invocation| -> InvokeFuture {
            Box::pin(async { Err(InvokeError::Failed(anyhow::anyhow!("boom"))) })
        }));

        let err = svc.oneshot(Invocation::new("Bag", "count")).await.unwrap_err();
        assert_eq!(err.kind(), "failed");
    }
}
