//! Interception of calls into service objects.
//!
//! An [`Invocation`] carries the method name, its named arguments and the
//! request's [`UnitOfWork`](crate::db::UnitOfWork) through a stack of tower
//! layers (see [`middleware`]) before reaching the target service. Which
//! methods lock or open a transaction is fixed up front in
//! [`MethodPolicies`].

pub mod config;
pub mod invocation;
pub mod middleware;

pub use config::{ConfigError, LockConfig, NodeConfig};
pub use invocation::{
    HeldLocks, Invocation, InvocationContext, InvokeError, InvokeFuture, MethodPolicies, MethodPolicy,
};
pub use middleware::{build_remote_pipeline, build_service_pipeline, PipelineContext};
