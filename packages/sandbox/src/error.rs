//! Error types for the sandbox.

use thiserror::Error;

/// Prefix modules use when wrapping their own error messages.
const CUSTOM_ERROR_PREFIX: &str = "Custom Error val:";

/// A failure reported by the module itself.
///
/// The prior state dump stays authoritative; the caller may retry with a
/// different message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("instantiation failed: {0}")]
    InstantiationFailed(String),

    #[error("execution failed: {0}")]
    Failed(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl ExecutionError {
    /// The cause as reported by the module.
    pub fn cause(&self) -> &str {
        match self {
            ExecutionError::InstantiationFailed(cause)
            | ExecutionError::Failed(cause)
            | ExecutionError::Query(cause) => cause,
        }
    }

    /// The module's own message, unwrapped from the generic
    /// `Custom Error val: "<msg>"` form when present.
    pub fn module_message(&self) -> String {
        unwrap_module_message(self.cause())
    }
}

/// Extract `<msg>` from `... Custom Error val: "<msg>" ...`, else return the input.
pub fn unwrap_module_message(cause: &str) -> String {
    let Some(at) = cause.find(CUSTOM_ERROR_PREFIX) else {
        return cause.to_string();
    };
    let rest = cause[at + CUSTOM_ERROR_PREFIX.len()..].trim_start();
    let Some(quoted) = rest.strip_prefix('"') else {
        return rest.trim().to_string();
    };

    let mut message = String::new();
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    message.push(escaped);
                }
            }
            '"' => return message,
            c => message.push(c),
        }
    }
    cause.to_string()
}

/// An out-of-order, duplicate or unauthorized RPC.
///
/// Fatal to the sandbox session: it must be torn down and reinitialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("sandbox is not initialized")]
    NotInitialized,

    #[error("sandbox is already initialized")]
    AlreadyInitialized,

    #[error("rpc from foreign origin {0:?}")]
    ForeignOrigin(String),

    #[error("unexpected response to {0}")]
    UnexpectedResponse(String),

    #[error("unknown message type {0:?}")]
    UnknownMessage(String),

    #[error("sandbox channel closed")]
    Closed,
}

/// Errors raised by the sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// The bytecode could not be loaded.
    #[error("invalid bytecode: {0}")]
    Bytecode(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No response arrived in time; the eventual response will be discarded.
    #[error("sandbox call timed out")]
    Timeout,
}

impl SandboxError {
    /// Whether the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SandboxError::Protocol(_) | SandboxError::Bytecode(_)
        )
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
