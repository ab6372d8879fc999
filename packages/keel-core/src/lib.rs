//! Keel core: runtime values, peer session identity, and the remote request envelope.

pub mod error;
pub mod request;
pub mod session;
pub mod types;

pub use error::{CodeError, CodeMsg};
pub use request::{CodecError, RemoteRequest};
pub use session::{SessionHandle, SessionId, SessionIdAllocator};
pub use types::{ParamMap, Value};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
