//! Wasm component isolate using Wasmtime.
//!
//! The component is compiled once at init. Every call gets a fresh store and
//! instance seeded with the request's memory, so nothing survives between
//! calls except what the host persists from the returned dump.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;
use wasmtime::component::{bindgen, Component, HasSelf, Linker};
use wasmtime::{Config, Engine, Store};

use crate::error::{ProtocolViolation, Result, SandboxError};
use crate::isolate::{Isolate, SessionState};
use crate::memory::Memory;
use crate::protocol::{Operation, Request, Response};

bindgen!({
    path: "wit/ownable.wit",
    world: "ownable-world",
});

/// Host state of one call.
pub struct WasmModuleState {
    pub memory: Memory,
}

impl WasmModuleState {
    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }
}

impl ownables::module::memory::Host for WasmModuleState {
    fn get(&mut self, key: Vec<u8>) -> Option<Vec<u8>> {
        self.memory.get(&key).map(<[u8]>::to_vec)
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.memory.set(key, value);
    }

    fn remove(&mut self, key: Vec<u8>) {
        self.memory.remove(&key);
    }
}

struct Loaded {
    engine: Engine,
    component: Component,
    linker: Linker<WasmModuleState>,
}

fn bytecode_error(stage: &str, e: impl std::fmt::Display) -> SandboxError {
    SandboxError::Bytecode(format!("{}: {}", stage, e))
}

impl Loaded {
    fn compile(bytecode: &[u8]) -> Result<Self> {
        let mut config = Config::new();
        config.wasm_component_model(true);
        let engine = Engine::new(&config).map_err(|e| bytecode_error("engine", e))?;

        let component =
            Component::new(&engine, bytecode).map_err(|e| bytecode_error("component", e))?;

        let mut linker = Linker::<WasmModuleState>::new(&engine);
        OwnableWorld::add_to_linker::<WasmModuleState, HasSelf<WasmModuleState>>(
            &mut linker,
            |state: &mut WasmModuleState| state,
        )
        .map_err(|e| bytecode_error("linker", e))?;

        Ok(Self {
            engine,
            component,
            linker,
        })
    }

    fn run(&self, request: Request) -> Result<Response> {
        let op = request.operation();
        let (memory, msg, info) = match request {
            Request::Instantiate { msg, info, .. } => (Memory::new(), msg, Some(info)),
            Request::Execute { msg, info, mem, .. }
            | Request::ExternalEvent { msg, info, mem, .. } => {
                (Memory::from(mem.state_dump), msg, Some(info))
            }
            Request::Query { msg, mem, .. } => (Memory::from(mem.state_dump), msg, None),
        };
        let msg = msg.to_string();
        let info = info.map(|i| serde_json::to_string(&i)).transpose()?;
        let info = info.as_deref().unwrap_or("{}");

        let mut store = Store::new(&self.engine, WasmModuleState::new(memory));
        let instance = OwnableWorld::instantiate(&mut store, &self.component, &self.linker)
            .map_err(|e| bytecode_error("instantiate", e))?;
        let api = instance.ownables_module_ownable();

        let outcome = match op {
            Operation::Instantiate => api.call_instantiate(&mut store, &msg, info),
            Operation::Execute => api.call_execute(&mut store, &msg, info),
            Operation::ExternalEvent => api.call_external_event(&mut store, &msg, info),
            Operation::Query => api.call_query(&mut store, &msg),
        };

        let response = match outcome {
            Err(trap) => Response::err(format!("module trapped: {}", trap)),
            Ok(Err(err)) => Response::err(err),
            Ok(Ok(out)) if op == Operation::Query => Response::ok(JsonValue::String(out), None),
            Ok(Ok(out)) => {
                let state: JsonValue = serde_json::from_str(&out)?;
                Response::ok(state, Some(store.data().memory.dump().into()))
            }
        };
        Ok(response)
    }
}

/// An isolate running a Wasm component built against `wit/ownable.wit`.
pub struct WasmIsolate {
    loaded: Option<Arc<Loaded>>,
    state: SessionState,
}

impl WasmIsolate {
    pub fn new() -> Self {
        Self {
            loaded: None,
            state: SessionState::Uninitialized,
        }
    }

    /// Create an isolate and load the component at `path`.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| bytecode_error("read", e))?;
        let mut isolate = Self::new();
        isolate.init(&bytes).await?;
        Ok(isolate)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

impl Default for WasmIsolate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Isolate for WasmIsolate {
    async fn init(&mut self, bytecode: &[u8]) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(ProtocolViolation::AlreadyInitialized.into());
        }
        self.state = SessionState::Initializing;

        let bytes = bytecode.to_vec();
        let compiled = tokio::task::spawn_blocking(move || Loaded::compile(&bytes))
            .await
            .map_err(|e| bytecode_error("compile", e));

        match compiled.and_then(|loaded| loaded) {
            Ok(loaded) => {
                debug!(bytes = bytecode.len(), "wasm component compiled");
                self.loaded = Some(Arc::new(loaded));
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn call(&mut self, request: Request) -> Result<Response> {
        let loaded = match (&self.loaded, self.state) {
            (_, SessionState::Closed) => return Err(ProtocolViolation::Closed.into()),
            (Some(loaded), _) => Arc::clone(loaded),
            (None, _) => return Err(ProtocolViolation::NotInitialized.into()),
        };

        debug!(op = %request.operation(), ownable_id = request.ownable_id(), "wasm call");
        self.state = SessionState::Busy;
        let result = tokio::task::spawn_blocking(move || loaded.run(request))
            .await
            .map_err(|e| bytecode_error("module crashed", e))?;
        self.state = SessionState::Ready;
        result
    }

    async fn shutdown(&mut self) {
        self.loaded = None;
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageInfo;
    use ownables::module::memory::Host;
    use serde_json::json;

    #[test]
    fn host_memory_get_set_remove() {
        let mut state = WasmModuleState::new(Memory::new());
        assert_eq!(state.get(b"k".to_vec()), None);

        state.set(b"k".to_vec(), b"v".to_vec());
        assert_eq!(state.get(b"k".to_vec()), Some(b"v".to_vec()));

        state.remove(b"k".to_vec());
        assert!(state.memory.is_empty());
    }

    #[tokio::test]
    async fn garbage_bytecode_fails_init() {
        let mut isolate = WasmIsolate::new();
        let err = isolate.init(b"not wasm").await.unwrap_err();
        assert!(matches!(err, SandboxError::Bytecode(_)));
        assert_eq!(isolate.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn call_before_init_is_rejected() {
        let mut isolate = WasmIsolate::new();
        let err = isolate
            .call(Request::Instantiate {
                ownable_id: "x".into(),
                msg: json!({}),
                info: MessageInfo::new("alice"),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Protocol(ProtocolViolation::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let result = WasmIsolate::from_file("/nonexistent/ownable_bg.wasm").await;
        assert!(matches!(result, Err(SandboxError::Bytecode(_))));
    }

    #[tokio::test]
    async fn core_module_is_not_a_component() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut temp, b"\0asm\x01\0\0\0").unwrap();
        let result = WasmIsolate::from_file(temp.path()).await;
        assert!(matches!(result, Err(SandboxError::Bytecode(_))));
    }
}
