//! # Ownables
//!
//! Host runtime for ownables: small stateful modules whose history is kept as
//! a signed, hash-linked [event chain](ownables_event_chain) and whose code
//! runs in an [isolated sandbox](ownables_sandbox).
//!
//! The [`Coordinator`] ties the pieces together. For each state-changing call
//! it loads the instance's state dump, runs the message in the sandbox,
//! appends a signed event, persists dump and chain, and optionally anchors the
//! new events to a ledger.
//!
//! ```text
//! caller ─► Coordinator ─► FrameHandle ─► Frame ─► Isolate (module)
//!               │
//!               ├─► Store (state dump, chain record, applied hash)
//!               └─► Anchorer ─► LedgerClient
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ownables::{Coordinator, MemoryResolver, PackageResolver, Session, BYTECODE_FILE};
//! use ownables_content_id::PackageFile;
//! use ownables_event_chain::Account;
//! use ownables_sandbox::BASIC_BYTECODE;
//! use ownables_state_store::MemoryStore;
//! use serde_json::json;
//!
//! # async fn example() -> ownables::Result<()> {
//! let packages = Arc::new(MemoryResolver::new());
//! let package = packages.import(&[PackageFile::new(BYTECODE_FILE, BASIC_BYTECODE)])?;
//!
//! let session = Session::new(Arc::new(Account::generate()));
//! let coordinator = Coordinator::new(session, Arc::new(MemoryStore::new()), packages);
//!
//! let created = coordinator.create(&package).await?;
//! coordinator.execute(&created.id, json!({"lock": {}})).await?;
//! let locked = coordinator.query(&created.id, json!({"is_locked": {}})).await?;
//! assert_eq!(locked, json!(true));
//! # Ok(())
//! # }
//! ```

pub mod cli;
mod config;
mod coordinator;
mod error;
mod launcher;
mod package;
mod session;

pub use config::Config;
pub use coordinator::{
    Coordinator, Created, VerifyReport, EXECUTE_CONTEXT, EXTERNAL_EVENT_CONTEXT,
    INSTANTIATE_CONTEXT,
};
pub use error::{Error, Result};
pub use launcher::{Launcher, WasmLauncher, WorkerLauncher};
pub use package::{
    bootstrap, Bootstrap, DirectoryResolver, MemoryResolver, PackageError, PackageResolver,
    BYTECODE_FILE, GLUE_FILE, WIDGET_FILE,
};
pub use session::Session;
