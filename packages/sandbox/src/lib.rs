//! # Ownables Sandbox
//!
//! Runs ownable modules in isolation and talks to them only through
//! messages. Two boundaries nest inside each other:
//!
//! - the **frame** ([`Frame`], reached via [`FrameHandle`]) accepts RPC from a
//!   single host origin, serializes calls and converts responses into
//!   host-facing shapes
//! - the **isolate** ([`Isolate`]) holds the loaded module and executes
//!   [`Request`]s; [`WorkerIsolate`] simulates bytecode with native modules
//!   from a [`ModuleRegistry`], [`WasmIsolate`] runs a Wasm component
//!
//! The isolate keeps no memory between calls: every request carries the
//! instance's [`StateDump`](ownables_state_store::StateDump) and every
//! successful state-changing response returns the new one. Failed calls
//! return no memory, so the previous dump stays authoritative.
//!
//! # Example
//!
//! ```rust,no_run
//! use ownables_sandbox::{
//!     Frame, FrameConfig, MessageInfo, ModuleRegistry, WorkerIsolate, BASIC_BYTECODE,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> ownables_sandbox::Result<()> {
//! let frame = Frame::spawn(
//!     WorkerIsolate::spawn(ModuleRegistry::standard()),
//!     FrameConfig::default(),
//! );
//! frame.init("41ab", BASIC_BYTECODE.to_vec()).await?;
//!
//! let outcome = frame
//!     .instantiate(json!({"ownable_id": "41ab"}), MessageInfo::new("alice"))
//!     .await?;
//! let info = frame.query(json!({"get_info": {}}), outcome.mem).await?;
//! assert_eq!(info["owner"], "alice");
//! # Ok(())
//! # }
//! ```

mod basic;
mod error;
mod frame;
mod isolate;
mod memory;
mod module;
mod protocol;
mod wasm;
mod worker;

pub use basic::{BasicOwnable, Config as BasicConfig, BASIC_BYTECODE};
pub use error::{unwrap_module_message, ExecutionError, ProtocolViolation, Result, SandboxError};
pub use frame::{decode_query, Frame, FrameConfig, FrameHandle};
pub use isolate::{Isolate, SessionState};
pub use memory::Memory;
pub use module::{ModuleError, ModuleRegistry, ModuleResult, Ownable};
pub use protocol::{
    attributes_to_map, Attribute, Coin, MemPayload, MessageInfo, ModuleEvent, ModuleResponse,
    Operation, Outcome, Request, Response,
};
pub use wasm::{WasmIsolate, WasmModuleState};
pub use worker::WorkerIsolate;
