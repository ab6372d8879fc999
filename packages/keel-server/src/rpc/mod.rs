//! Outbound calls to peer nodes.
//!
//! Sessions are organised as [`ClientGroup`]s inside named
//! [`ClientCluster`]s, all registered in a [`ClientDirectory`]. The
//! [`RemoteClient`] resolves a [`Destination`] to one session and sends a
//! [`RemoteRequest`](keel_core::RemoteRequest) through a [`RemoteTransport`].

pub mod client;
pub mod cluster;
pub mod config;
pub mod directory;
pub mod error;
pub mod group;
pub mod proxy;
pub mod transport;

pub use client::{FanOutResult, RemoteClient};
pub use cluster::ClientCluster;
pub use config::RemoteConfig;
pub use directory::{ClientDirectory, Destination};
pub use error::RemoteError;
pub use group::ClientGroup;
pub use proxy::{CallMode, ParameterNameResolver, RemoteProxy, StaticParameterNames};
pub use transport::{RemoteTransport, TransportError};
