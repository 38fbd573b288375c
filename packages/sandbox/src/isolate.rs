//! The inner computation boundary.
//!
//! An isolate holds the only live handle to an instantiated module. The
//! host talks to it with [`Request`]/[`Response`] messages; it keeps no state
//! between calls besides the loaded module, since memory travels with every
//! request.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Request, Response};

/// Lifecycle of an isolate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Busy,
    /// Torn down after a protocol violation or shutdown.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An isolated execution context for one module instance.
///
/// Implementations process one call at a time. A response to a call whose
/// caller stopped waiting must be discarded, never returned to a later call.
#[async_trait]
pub trait Isolate: Send {
    /// Load the module. Accepted exactly once.
    async fn init(&mut self, bytecode: &[u8]) -> Result<()>;

    /// Run one request to completion.
    async fn call(&mut self, request: Request) -> Result<Response>;

    /// Release the module.
    async fn shutdown(&mut self) {}
}

#[async_trait]
impl<T: Isolate + ?Sized> Isolate for Box<T> {
    async fn init(&mut self, bytecode: &[u8]) -> Result<()> {
        self.as_mut().init(bytecode).await
    }

    async fn call(&mut self, request: Request) -> Result<Response> {
        self.as_mut().call(request).await
    }

    async fn shutdown(&mut self) {
        self.as_mut().shutdown().await
    }
}
