//! Client-side stand-in for a service hosted on a peer node.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keel_core::{RemoteRequest, Value};
use serde::de::DeserializeOwned;

use super::client::RemoteClient;
use super::directory::Destination;
use super::error::RemoteError;

/// Supplies the declared parameter names of a remote method, in order.
pub trait ParameterNameResolver: Send + Sync {
    fn parameter_names(&self, service: &str, method: &str) -> Option<Vec<String>>;
}

/// [`ParameterNameResolver`] backed by names registered up front.
#[derive(Debug, Clone, Default)]
pub struct StaticParameterNames {
    methods: HashMap<String, HashMap<String, Vec<String>>>,
}

impl StaticParameterNames {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, service: &str, method: &str, names: &[&str]) -> Self {
        self.methods
            .entry(service.to_string())
            .or_default()
            .insert(method.to_string(), names.iter().map(ToString::to_string).collect());
        self
    }
}

impl ParameterNameResolver for StaticParameterNames {
    fn parameter_names(&self, service: &str, method: &str) -> Option<Vec<String>> {
        self.methods.get(service)?.get(method).cloned()
    }
}

/// Whether a proxy retries transient failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallMode {
    #[default]
    Once,
    WithRetry,
}

/// Turns positional method calls into [`RemoteRequest`]s for one service
/// and sends them to a fixed destination.
#[derive(Clone)]
pub struct RemoteProxy {
    client: RemoteClient,
    service: String,
    destination: Destination,
    mode: CallMode,
    resolver: Arc<dyn ParameterNameResolver>,
}

impl RemoteProxy {
    #[must_use]
    pub fn new(
        client: RemoteClient,
        service: impl Into<String>,
        destination: Destination,
        resolver: Arc<dyn ParameterNameResolver>,
    ) -> Self {
        Self {
            client,
            service: service.into(),
            destination,
            mode: CallMode::default(),
            resolver,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: CallMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Build the request for `method` by pairing its declared parameter
    /// names with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::ArgumentMismatch`] if the names are unknown
    /// or their count differs from `args.len()`.
    pub fn request(&self, method: &str, args: Vec<Value>) -> Result<RemoteRequest, RemoteError> {
        let actual = args.len();
        let mismatch = |expected| RemoteError::ArgumentMismatch {
            service: self.service.clone(),
            method: method.to_string(),
            expected,
            actual,
        };
        let names = self
            .resolver
            .parameter_names(&self.service, method)
            .ok_or_else(|| mismatch(None))?;
        let expected = names.len();
        RemoteRequest::from_args(self.service.clone(), method, &names, args).ok_or_else(|| mismatch(Some(expected)))
    }

    /// Call `method` on the destination and decode its reply.
    ///
    /// # Errors
    ///
    /// Argument errors are reported before resolution; see
    /// [`RemoteClient::sync_call`] for the rest.
    pub async fn invoke<T: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> Result<T, RemoteError> {
        let request = self.request(method, args)?;
        match self.mode {
            CallMode::Once => self.client.sync_call(&self.destination, &request).await,
            CallMode::WithRetry => self.client.sync_call_with_retry(&self.destination, &request).await,
        }
    }
}

impl fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("service", &self.service)
            .field("destination", &self.destination)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::client::tests::{encode, world, ScriptedTransport};
    use crate::rpc::{RemoteConfig, TransportError};

    fn names() -> Arc<dyn ParameterNameResolver> {
        Arc::new(StaticParameterNames::new().with("Bag", "add", &["roleId", "itemId", "count"]))
    }

    fn proxy(transport: &Arc<ScriptedTransport>, mode: CallMode) -> RemoteProxy {
        let config = RemoteConfig {
            retry_backoff_ms: 0,
            ..RemoteConfig::default()
        };
        let client = RemoteClient::new(world(&[1, 2]), Arc::clone(transport) as _, config);
        RemoteProxy::new(client, "Bag", Destination::random("world"), names()).with_mode(mode)
    }

    #[tokio::test]
    async fn positional_args_become_named_params() {
        let transport = ScriptedTransport::replying(vec![Ok(encode(&true))]);
        let proxy = proxy(&transport, CallMode::Once);

        let added: bool = proxy
            .invoke("add", vec![Value::Int(9), Value::Int(1001), Value::Int(3)])
            .await
            .unwrap();
        assert!(added);

        let sent = transport.sent.lock();
        let request = &sent[0].1;
        assert_eq!(request.qualified_name(), "Bag.add");
        assert_eq!(request.params.get("itemId"), Some(&Value::Int(1001)));
        assert_eq!(request.params.len(), 3);
    }

    #[tokio::test]
    async fn argument_count_is_checked_before_sending() {
        let transport = ScriptedTransport::replying(vec![]);
        let proxy = proxy(&transport, CallMode::Once);

        let err = proxy.invoke::<Value>("add", vec![Value::Int(9)]).await.unwrap_err();
        assert!(matches!(
            err,
            RemoteError::ArgumentMismatch {
                expected: Some(3),
                actual: 1,
                ..
            }
        ));
        let err = proxy.invoke::<Value>("remove", vec![]).await.unwrap_err();
        assert!(matches!(err, RemoteError::ArgumentMismatch { expected: None, .. }));
        assert!(transport.sessions().is_empty());
    }

    #[tokio::test]
    async fn retry_mode_resends_to_the_same_session() {
        let transport = ScriptedTransport::replying(vec![Err(TransportError::Disconnected), Ok(encode(&1_i64))]);
        let proxy = proxy(&transport, CallMode::WithRetry);

        let count: i64 = proxy
            .invoke("add", vec![Value::Int(9), Value::Int(1), Value::Int(1)])
            .await
            .unwrap();
        assert_eq!(count, 1);

        let sessions = transport.sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0], sessions[1]);
    }

    #[tokio::test]
    async fn once_mode_surfaces_the_first_failure() {
        let transport = ScriptedTransport::replying(vec![Err(TransportError::Disconnected)]);
        let proxy = proxy(&transport, CallMode::Once);

        let err = proxy
            .invoke::<Value>("add", vec![Value::Int(9), Value::Int(1), Value::Int(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::CallFailed { attempts: 1, .. }));
    }
}
