//! Remote request envelope.
//!
//! A request names the target service (the remote interface's simple name),
//! the method, and the arguments keyed by declared parameter name. Encoded
//! as named `MsgPack` via `rmp_serde::to_vec_named()` so field order on the
//! wire does not matter to the receiver.

use serde::{Deserialize, Serialize};

use crate::types::{ParamMap, Value};

/// Errors from encoding or decoding a [`RemoteRequest`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode request {service}.{method}: {source}")]
    Encode {
        service: String,
        method: String,
        #[source]
        source: rmp_serde::encode::Error,
    },
    #[error("failed to decode request: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// One outbound method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRequest {
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: ParamMap,
}

impl RemoteRequest {
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            params: ParamMap::new(),
        }
    }

    /// Adds one named argument.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Builds the parameter map by zipping declared names with positional
    /// arguments. Returns `None` when the counts differ.
    #[must_use]
    pub fn from_args(
        service: impl Into<String>,
        method: impl Into<String>,
        names: &[String],
        args: Vec<Value>,
    ) -> Option<Self> {
        if names.len() != args.len() {
            return None;
        }
        let params = names.iter().cloned().zip(args).collect();
        Some(Self {
            service: service.into(),
            method: method.into(),
            params,
        })
    }

    /// `service.method`, used in logs and error messages.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }

    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if a value cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(self).map_err(|source| CodecError::Encode {
            service: self.service.clone(),
            method: self.method.clone(),
            source,
        })
    }

    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if `bytes` is not a valid request.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
