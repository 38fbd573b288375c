//! Sandbox backends.

use ownables_sandbox::{Isolate, ModuleRegistry, WasmIsolate, WorkerIsolate};

/// Starts a fresh inner isolate for one instance.
pub trait Launcher: Send + Sync {
    fn launch(&self) -> Box<dyn Isolate>;
}

/// In-process workers running native modules.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    registry: ModuleRegistry,
}

impl WorkerLauncher {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self { registry }
    }
}

impl Default for WorkerLauncher {
    fn default() -> Self {
        Self::new(ModuleRegistry::standard())
    }
}

impl Launcher for WorkerLauncher {
    fn launch(&self) -> Box<dyn Isolate> {
        Box::new(WorkerIsolate::spawn(self.registry.clone()))
    }
}

/// Wasm components under wasmtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasmLauncher;

impl Launcher for WasmLauncher {
    fn launch(&self) -> Box<dyn Isolate> {
        Box::new(WasmIsolate::new())
    }
}
