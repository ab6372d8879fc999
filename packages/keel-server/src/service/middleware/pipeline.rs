//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;
use std::time::Duration;

use keel_core::Value;
use tower::{Service, ServiceBuilder};

use super::lock::LockLayer;
use super::metrics::MetricsLayer;
use super::remote_scope::RemoteScopeLayer;
use super::service_scope::ServiceScopeLayer;
use super::timeout::TimeoutLayer;
use crate::db::ConnectionManager;
use crate::service::config::{LockConfig, NodeConfig};
use crate::service::invocation::{InvokeError, InvokeFuture, Invocation, MethodPolicies};
use crate::sync::LockRegistry;

/// Shared state every intercepted service on a node is built with.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub manager: Arc<ConnectionManager>,
    pub locks: Arc<LockRegistry>,
    pub policies: Arc<MethodPolicies>,
    pub lock: LockConfig,
    pub default_timeout: Option<Duration>,
}

impl PipelineContext {
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>, locks: Arc<LockRegistry>, policies: Arc<MethodPolicies>) -> Self {
        Self {
            manager,
            locks,
            policies,
            lock: LockConfig::default(),
            default_timeout: None,
        }
    }

    /// Take the lock and deadline settings from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &NodeConfig) -> Self {
        self.lock = config.lock.clone();
        self.default_timeout = config.default_invocation_timeout();
        self
    }
}

/// Wrap a local service object.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- span, counters and duration for the whole call
/// 2. `TimeoutLayer` -- deadline covering lock wait and cleanup
/// 3. `LockLayer` -- serialize calls sharing a lock name
/// 4. `ServiceScopeLayer` -- share one connection per source, release after
#[must_use]
pub fn build_service_pipeline<S>(
    target: S,
    ctx: &PipelineContext,
) -> impl Service<Invocation, Response = Value, Error = InvokeError, Future = InvokeFuture> + Clone
where
    S: Service<Invocation, Response = Value, Error = InvokeError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer::new(ctx.default_timeout))
        .layer(LockLayer::new(
            Arc::clone(&ctx.locks),
            Arc::clone(&ctx.policies),
            ctx.lock.clone(),
        ))
        .layer(ServiceScopeLayer::new(Arc::clone(&ctx.manager)))
        .service(target)
}

/// Wrap a service object that answers calls from peer nodes.
///
/// Same order as [`build_service_pipeline`], with `RemoteScopeLayer`
/// (transaction and final release) as the innermost layer.
#[must_use]
pub fn build_remote_pipeline<S>(
    target: S,
    ctx: &PipelineContext,
) -> impl Service<Invocation, Response = Value, Error = InvokeError, Future = InvokeFuture> + Clone
where
    S: Service<Invocation, Response = Value, Error = InvokeError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer::new(ctx.default_timeout))
        .layer(LockLayer::new(
            Arc::clone(&ctx.locks),
            Arc::clone(&ctx.policies),
            ctx.lock.clone(),
        ))
        .layer(RemoteScopeLayer::new(
            Arc::clone(&ctx.manager),
            Arc::clone(&ctx.policies),
        ))
        .service(target)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::db::testing::{EventLog, MockSource};
    use crate::db::{Connection, Dao, Row, StatementExecutor};
    use crate::service::invocation::MethodPolicy;

    /// Executor that sleeps on `SLOW` statements and counts the rest.
    struct Executor;

    #[async_trait]
    impl StatementExecutor for Executor {
        async fn update(&self, _conn: &dyn Connection, sql: &str, _params: &[Value]) -> anyhow::Result<u64> {
            if sql.starts_with("SLOW") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(1)
        }

        async fn batch(&self, _conn: &dyn Connection, _sql: &str, params: &[Vec<Value>]) -> anyhow::Result<Vec<u64>> {
            Ok(vec![1; params.len()])
        }

        async fn insert(&self, _conn: &dyn Connection, _sql: &str, _params: &[Value]) -> anyhow::Result<Option<Value>> {
            Ok(None)
        }

        async fn query(&self, _conn: &dyn Connection, _sql: &str, _params: &[Value]) -> anyhow::Result<Vec<Row>> {
            Ok(Vec::new())
        }
    }

    /// A `Bag` service whose methods run two DAO statements each.
    fn bag(dao: Dao) -> impl Service<Invocation, Response = Value, Error = InvokeError, Future = InvokeFuture> + Clone + Send + 'static {
        service_fn(move |inv: Invocation| -> InvokeFuture {
            let dao = dao.clone();
            Box::pin(async move {
                let unit = inv.unit();
                let first = if inv.ctx.method == "stall" { "SLOW UPDATE bag" } else { "UPDATE bag" };
                let mut total = dao.update(unit, first, &[]).await?;
                total += dao.update(unit, "INSERT INTO bag_log", &[]).await?;
                Ok(Value::Int(i64::try_from(total).unwrap_or(i64::MAX)))
            })
        })
    }

    fn context(log: &EventLog) -> PipelineContext {
        let manager = Arc::new(ConnectionManager::new(MockSource::shared("main", log)));
        let policies = MethodPolicies::new()
            .with("Bag", "buy", MethodPolicy::locked("bag").and_transactional())
            .with("Bag", "stall", MethodPolicy::locked("bag").and_transactional());
        PipelineContext::new(manager, Arc::new(LockRegistry::new()), Arc::new(policies))
    }

    #[tokio::test]
    async fn remote_pipeline_runs_one_transaction_per_call() {
        let log = EventLog::default();
        let ctx = context(&log);
        let dao = Dao::new(Arc::clone(&ctx.manager), Arc::new(Executor));
        let svc = build_remote_pipeline(bag(dao), &ctx);

        let inv = Invocation::new("Bag", "buy");
        let unit = Arc::clone(inv.unit());
        assert_eq!(svc.oneshot(inv).await.unwrap(), Value::Int(2));

        assert_eq!(
            log.events(),
            vec![
                "main#1 open",
                "main#1 autocommit=false",
                "main#1 commit",
                "main#1 autocommit=true",
                "main#1 close",
            ]
        );
        assert!(unit.is_idle());
        assert!(ctx.locks.is_empty());
    }

    #[tokio::test]
    async fn service_pipeline_shares_one_connection_without_a_transaction() {
        let log = EventLog::default();
        let ctx = context(&log);
        let dao = Dao::new(Arc::clone(&ctx.manager), Arc::new(Executor));
        let svc = build_service_pipeline(bag(dao), &ctx);

        svc.oneshot(Invocation::new("Bag", "buy")).await.unwrap();
        assert_eq!(
            log.events(),
            vec!["main#1 open", "main#1 autocommit=true", "main#1 close"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_lock_and_connections() {
        let log = EventLog::default();
        let config = NodeConfig {
            default_invocation_timeout_ms: Some(100),
            ..NodeConfig::default()
        };
        let ctx = context(&log).with_config(&config);
        let dao = Dao::new(Arc::clone(&ctx.manager), Arc::new(Executor));
        let svc = build_remote_pipeline(bag(dao), &ctx);

        let inv = Invocation::new("Bag", "stall");
        let unit = Arc::clone(inv.unit());
        let err = svc.oneshot(inv).await.unwrap_err();
        assert!(matches!(err, InvokeError::Timeout { timeout_ms: 100, .. }));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!ctx.locks.is_locked("synchronized-bag"));
        assert!(ctx.locks.is_empty());
        assert_eq!(log.count("main#1 rollback"), 1);
        assert_eq!(log.count("main#1 close"), 1);
        assert!(unit.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_release_still_closes_every_connection() {
        let log = EventLog::default();
        let slow = Duration::from_millis(50);
        let manager = Arc::new(
            ConnectionManager::new(MockSource::slow_close("main", &log, slow))
                .with_source("log", MockSource::slow_close("log", &log, slow)),
        );
        let policies = MethodPolicies::new().with("Bag", "buy", MethodPolicy::locked("bag").and_transactional());
        let ctx = PipelineContext::new(Arc::clone(&manager), Arc::new(LockRegistry::new()), Arc::new(policies));
        let target = service_fn(move |inv: Invocation| -> InvokeFuture {
            let manager = Arc::clone(&manager);
            Box::pin(async move {
                manager.acquire(inv.unit(), None).await?;
                manager.acquire(inv.unit(), Some("log")).await?;
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(Value::Null)
            })
        });
        let svc = build_remote_pipeline(target, &ctx);

        let inv = Invocation::new("Bag", "buy").with_timeout(Duration::from_millis(100));
        let unit = Arc::clone(inv.unit());
        let err = svc.oneshot(inv).await.unwrap_err();
        assert!(matches!(err, InvokeError::Timeout { timeout_ms: 100, .. }));
        assert!(ctx.locks.is_locked("synchronized-bag"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(log.count("main#1 commit"), 1);
        assert_eq!(log.count("main#1 close"), 1);
        assert_eq!(log.count("log#1 close"), 1);
        assert!(unit.is_idle());
        assert!(ctx.locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn next_lock_holder_waits_for_abandoned_rollback_and_release() {
        let log = EventLog::default();
        let config = NodeConfig {
            default_invocation_timeout_ms: Some(100),
            ..NodeConfig::default()
        };
        let ctx = context(&log).with_config(&config);
        let dao = Dao::new(Arc::clone(&ctx.manager), Arc::new(Executor));
        let svc = build_remote_pipeline(bag(dao), &ctx);

        let stalled = tokio::spawn(svc.clone().oneshot(Invocation::new("Bag", "stall")));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let next = tokio::spawn(
            svc.clone()
                .oneshot(Invocation::new("Bag", "buy").with_timeout(Duration::from_secs(10))),
        );

        assert!(matches!(stalled.await.unwrap(), Err(InvokeError::Timeout { .. })));
        assert_eq!(next.await.unwrap().unwrap(), Value::Int(2));

        let events = log.events();
        let at = |event: &str| events.iter().position(|e| e == event).unwrap();
        assert!(at("main#1 rollback") < at("main#1 close"));
        assert!(at("main#1 close") < at("main#2 open"));
        assert_eq!(log.count("main#2 commit"), 1);
        assert!(ctx.locks.is_empty());
    }

    #[tokio::test]
    async fn pipelines_are_cloneable_per_call() {
        let log = EventLog::default();
        let ctx = context(&log);
        let svc = build_service_pipeline(
            service_fn(|_inv: Invocation| -> InvokeFuture { Box::pin(async { Ok(Value::Null) }) }),
            &ctx,
        );

        for _ in 0..3 {
            assert_eq!(svc.clone().oneshot(Invocation::new("Mail", "read")).await.unwrap(), Value::Null);
        }
        assert!(log.events().is_empty());
    }
}
