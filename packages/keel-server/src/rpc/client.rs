//! Synchronous request/response calls to peer nodes.
//!
//! A destination is resolved to exactly one session before anything is
//! sent. Retrying calls keep that session for every attempt, and a peer
//! that rejects a call with a [`CodeError`](keel_core::CodeError) is never
//! asked again.

use std::sync::Arc;

use futures_util::future::join_all;
use keel_core::{RemoteRequest, SessionHandle};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::config::RemoteConfig;
use super::directory::{ClientDirectory, Destination};
use super::error::RemoteError;
use super::transport::{RemoteTransport, TransportError};

/// Per-session outcome of a fan-out call.
pub type FanOutResult<T> = Vec<(SessionHandle, Result<T, RemoteError>)>;

/// Sends [`RemoteRequest`]s to sessions picked from a [`ClientDirectory`].
#[derive(Clone)]
pub struct RemoteClient {
    directory: Arc<ClientDirectory>,
    transport: Arc<dyn RemoteTransport>,
    config: RemoteConfig,
}

impl RemoteClient {
    #[must_use]
    pub fn new(
        directory: Arc<ClientDirectory>,
        transport: Arc<dyn RemoteTransport>,
        config: RemoteConfig,
    ) -> Self {
        Self {
            directory,
            transport,
            config,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Arc<ClientDirectory> {
        &self.directory
    }

    #[must_use]
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Send once and decode the reply.
    ///
    /// # Errors
    ///
    /// Resolution errors are returned before anything is sent; otherwise
    /// [`RemoteError::CallFailed`], [`RemoteError::Rejected`] or
    /// [`RemoteError::Decode`].
    pub async fn sync_call<T: DeserializeOwned>(
        &self,
        destination: &Destination,
        request: &RemoteRequest,
    ) -> Result<T, RemoteError> {
        let session = self.directory.resolve(destination)?;
        let payload = request.encode()?;
        self.call_session(&session, request, &payload, 0).await
    }

    /// Like [`sync_call`](Self::sync_call), but transient failures are
    /// retried up to `retry_budget` more times against the same session.
    ///
    /// # Errors
    ///
    /// See [`sync_call`](Self::sync_call); `CallFailed` reports how many
    /// attempts were made.
    pub async fn sync_call_with_retry<T: DeserializeOwned>(
        &self,
        destination: &Destination,
        request: &RemoteRequest,
    ) -> Result<T, RemoteError> {
        let session = self.directory.resolve(destination)?;
        let payload = request.encode()?;
        self.call_session(&session, request, &payload, self.config.retry_budget)
            .await
    }

    /// Send to every session of `cluster` concurrently.
    ///
    /// # Errors
    ///
    /// Fails as a whole only for an unknown cluster, an unencodable
    /// request, or a cluster with no sessions. Per-session failures are
    /// reported in the result list.
    pub async fn broadcast<T: DeserializeOwned>(
        &self,
        cluster: &str,
        request: &RemoteRequest,
    ) -> Result<FanOutResult<T>, RemoteError> {
        let sessions = self.directory.require_cluster(cluster)?.all_sessions();
        self.fan_out(cluster, sessions, request).await
    }

    /// Send to one session of each group of `cluster` concurrently.
    ///
    /// # Errors
    ///
    /// Same as [`broadcast`](Self::broadcast).
    pub async fn call_each_group<T: DeserializeOwned>(
        &self,
        cluster: &str,
        request: &RemoteRequest,
    ) -> Result<FanOutResult<T>, RemoteError> {
        let sessions = self.directory.require_cluster(cluster)?.one_session_per_group();
        self.fan_out(cluster, sessions, request).await
    }

    async fn fan_out<T: DeserializeOwned>(
        &self,
        cluster: &str,
        sessions: Vec<SessionHandle>,
        request: &RemoteRequest,
    ) -> Result<FanOutResult<T>, RemoteError> {
        if sessions.is_empty() {
            return Err(RemoteError::Unavailable {
                destination: format!("cluster `{cluster}`"),
            });
        }
        let payload = request.encode()?;
        let calls = sessions.iter().map(|session| self.call_session::<T>(session, request, &payload, 0));
        let results = join_all(calls).await;
        Ok(sessions.into_iter().zip(results).collect())
    }

    async fn call_session<T: DeserializeOwned>(
        &self,
        session: &SessionHandle,
        request: &RemoteRequest,
        payload: &[u8],
        retries: u32,
    ) -> Result<T, RemoteError> {
        let body = self.send(session, request, payload, retries).await?;
        rmp_serde::from_slice(&body).map_err(|source| RemoteError::Decode {
            service: request.service.clone(),
            method: request.method.clone(),
            source,
        })
    }

    async fn send(
        &self,
        session: &SessionHandle,
        request: &RemoteRequest,
        payload: &[u8],
        retries: u32,
    ) -> Result<Vec<u8>, RemoteError> {
        let timeout = self.config.call_timeout();
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            let outcome = match tokio::time::timeout(timeout, self.transport.send(session, payload)).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(TransportError::Timeout),
            };
            let label = match &outcome {
                Ok(_) => "ok",
                Err(err) if err.is_transient() => "failed",
                Err(_) => "rejected",
            };
            metrics::counter!(
                "keel_remote_attempts_total",
                "service" => request.service.clone(),
                "outcome" => label
            )
            .increment(1);

            match outcome {
                Ok(body) => {
                    debug!(%session, call = %request.qualified_name(), attempts, "remote call complete");
                    return Ok(body);
                }
                Err(err) if err.is_transient() && attempts <= retries => {
                    warn!(%session, call = %request.qualified_name(), attempts, error = %err, "remote call failed, retrying");
                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
                Err(TransportError::Rejected(code)) => {
                    return Err(RemoteError::Rejected {
                        service: request.service.clone(),
                        method: request.method.clone(),
                        session: session.id(),
                        source: code,
                    });
                }
                Err(err) => {
                    return Err(RemoteError::CallFailed {
                        service: request.service.clone(),
                        method: request.method.clone(),
                        session: session.id(),
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("directory", &self.directory)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
