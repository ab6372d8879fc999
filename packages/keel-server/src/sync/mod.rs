//! Named locks shared by every invocation on this node.

pub mod lock;

pub use lock::{LockError, LockGuard, LockRegistry, LockToken};
