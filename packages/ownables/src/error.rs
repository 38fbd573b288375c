//! Error taxonomy for the host.
//!
//! | variant | recovery |
//! |---|---|
//! | `ChainIntegrity` | none; the chain is untrusted until replaced |
//! | `Execution` | local; the previous state dump stays authoritative |
//! | `ProtocolViolation` | the instance's sandbox is torn down and restarted on next use |
//! | `Storage` | transient faults were already retried |
//! | `Anchoring` | never returned from state-changing calls; anchors are deferred |

use ownables_anchoring::AnchorError;
use ownables_event_chain::ChainError;
use ownables_sandbox::{ExecutionError, ProtocolViolation, SandboxError};
use ownables_state_store::StoreError;
use thiserror::Error;

use crate::package::PackageError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("chain integrity error: {0}")]
    ChainIntegrity(#[from] ChainError),

    /// Displays the module's own message.
    #[error("{}", .0.module_message())]
    Execution(#[from] ExecutionError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("anchoring error: {0}")]
    Anchoring(#[from] AnchorError),

    #[error("sandbox call timed out")]
    Timeout,

    #[error("package error: {0}")]
    Package(#[from] PackageError),

    /// A host-side message the coordinator cannot record.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown instance {0}")]
    UnknownInstance(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Chain(e) => Error::ChainIntegrity(e),
            other => Error::Storage(other),
        }
    }
}

impl From<SandboxError> for Error {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::Execution(e) => Error::Execution(e),
            SandboxError::Protocol(e) => Error::ProtocolViolation(e),
            SandboxError::Bytecode(message) => Error::Package(PackageError::Bytecode(message)),
            SandboxError::Json(e) => {
                Error::ProtocolViolation(ProtocolViolation::UnexpectedResponse(e.to_string()))
            }
            SandboxError::Timeout => Error::Timeout,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
