use keel_core::{CodeError, CodecError, SessionId};

use super::transport::TransportError;

/// Errors from resolving a destination or calling a remote peer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("no client cluster named `{cluster}`")]
    UnknownCluster { cluster: String },

    #[error("no client group `{group}` in cluster `{cluster}`")]
    UnknownGroup { cluster: String, group: String },

    /// Resolution succeeded but produced no session; nothing was sent.
    #[error("no session available for {destination}")]
    Unavailable { destination: String },

    #[error("{service}.{method} to {session} failed after {attempts} attempt(s): {source}")]
    CallFailed {
        service: String,
        method: String,
        session: SessionId,
        attempts: u32,
        source: TransportError,
    },

    #[error("{service}.{method} rejected by {session}: {source}")]
    Rejected {
        service: String,
        method: String,
        session: SessionId,
        source: CodeError,
    },

    #[error("reply to {service}.{method} could not be decoded: {source}")]
    Decode {
        service: String,
        method: String,
        source: rmp_serde::decode::Error,
    },

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("{service}.{method}: {}", describe_mismatch(.expected, .actual))]
    ArgumentMismatch {
        service: String,
        method: String,
        /// Declared parameter count, `None` when the method is unknown to the resolver.
        expected: Option<usize>,
        actual: usize,
    },
}

fn describe_mismatch(expected: &Option<usize>, actual: &usize) -> String {
    match expected {
        Some(expected) => format!("expects {expected} argument(s), got {actual}"),
        None => format!("parameter names unknown for a call with {actual} argument(s)"),
    }
}

impl RemoteError {
    /// The business error carried by a rejection, if this is one.
    #[must_use]
    pub fn code_error(&self) -> Option<&CodeError> {
        match self {
            RemoteError::Rejected { source, .. } => Some(source),
            _ => None,
        }
    }
}
