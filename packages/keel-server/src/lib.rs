//! Keel server: connection lifecycle, named locks, call interception and
//! load-balanced remote calls for a service node.

pub mod db;
pub mod rpc;
pub mod service;
pub mod sync;

pub use db::{ConnectionManager, Dao, DbError, DiscardLevel, UnitOfWork};
pub use rpc::{ClientCluster, ClientDirectory, ClientGroup, Destination, RemoteClient, RemoteError, RemoteProxy};
pub use service::{build_remote_pipeline, build_service_pipeline, Invocation, InvokeError, NodeConfig, PipelineContext};
pub use sync::{LockError, LockRegistry, LockToken};
