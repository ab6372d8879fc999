//! Tower middleware layers for the invocation pipeline.
//!
//! - [`metrics`]: Span, counters and duration per invocation
//! - [`timeout`]: Per-invocation deadline enforcement
//! - [`lock`]: Named-lock serialization of declared methods
//! - [`service_scope`]: Connection scope for local service calls
//! - [`remote_scope`]: Transaction and final release for calls from peers
//! - [`pipeline`]: Composes the layers into the two service stacks

pub mod lock;
pub mod metrics;
pub mod pipeline;
mod release;
pub mod remote_scope;
pub mod service_scope;
pub mod timeout;

pub use lock::{LockLayer, LOCK_PREFIX};
pub use metrics::MetricsLayer;
pub use pipeline::{build_remote_pipeline, build_service_pipeline, PipelineContext};
pub use remote_scope::RemoteScopeLayer;
pub use service_scope::ServiceScopeLayer;
pub use timeout::TimeoutLayer;
