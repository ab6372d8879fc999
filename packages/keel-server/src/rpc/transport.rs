//! Seam between the invocation client and whatever carries bytes to peers.

use async_trait::async_trait;
use keel_core::{CodeError, SessionHandle};

/// Failure reported by a [`RemoteTransport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,
    #[error("session disconnected")]
    Disconnected,
    #[error("i/o error: {0}")]
    Io(String),
    /// The peer handled the call and refused it.
    #[error("remote rejected the call: {0}")]
    Rejected(CodeError),
}

impl TransportError {
    /// Whether sending the same request again might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

/// Sends one encoded request over an established session and waits for the reply.
///
/// `payload` is a MsgPack-encoded [`RemoteRequest`](keel_core::RemoteRequest);
/// implementations return the peer's MsgPack-encoded reply body. The
/// caller enforces the call deadline, so `send` may wait indefinitely.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send(&self, session: &SessionHandle, payload: &[u8]) -> Result<Vec<u8>, TransportError>;
}
