//! Native modules and the registry the in-process worker resolves them from.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::memory::Memory;
use crate::protocol::{MessageInfo, ModuleResponse};

/// Errors a module reports back to the host.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Unauthorized")]
    Unauthorized,

    /// Module-specific failure; the host unwraps `val` for display.
    #[error("Custom Error val: {val:?}")]
    Custom { val: String },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("not instantiated")]
    NotInstantiated,

    #[error("storage error: {0}")]
    Storage(#[from] serde_json::Error),
}

impl ModuleError {
    pub fn custom(val: impl Into<String>) -> Self {
        ModuleError::Custom { val: val.into() }
    }
}

pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

/// A module compiled into the host.
///
/// All state lives in the [`Memory`] handed to each call; implementations
/// hold configuration only. A failed call's memory is discarded by the
/// caller, so modules may mutate before failing.
pub trait Ownable: Send + Sync {
    fn instantiate(
        &self,
        memory: &mut Memory,
        msg: &JsonValue,
        info: &MessageInfo,
    ) -> ModuleResult<ModuleResponse>;

    fn execute(
        &self,
        memory: &mut Memory,
        msg: &JsonValue,
        info: &MessageInfo,
    ) -> ModuleResult<ModuleResponse>;

    fn external_event(
        &self,
        memory: &mut Memory,
        msg: &JsonValue,
        info: &MessageInfo,
    ) -> ModuleResult<ModuleResponse>;

    /// Read-only query; the result is the module's JSON answer.
    fn query(&self, memory: &Memory, msg: &JsonValue) -> ModuleResult<JsonValue>;
}

type Factory = Arc<dyn Fn() -> Box<dyn Ownable> + Send + Sync>;

/// Maps bytecode to native module implementations.
///
/// Stands in for a real bytecode loader: the worker looks up the exact bytes
/// it was initialized with.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<Vec<u8>, Factory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in modules.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(crate::basic::BASIC_BYTECODE, || {
            Box::new(crate::basic::BasicOwnable)
        });
        registry
    }

    pub fn register<F>(&mut self, bytecode: impl Into<Vec<u8>>, factory: F)
    where
        F: Fn() -> Box<dyn Ownable> + Send + Sync + 'static,
    {
        self.modules.insert(bytecode.into(), Arc::new(factory));
    }

    pub fn resolve(&self, bytecode: &[u8]) -> Option<Box<dyn Ownable>> {
        self.modules.get(bytecode).map(|factory| factory())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_errors_use_the_wrapped_form() {
        let e = ModuleError::custom("locked");
        assert_eq!(e.to_string(), "Custom Error val: \"locked\"");
        assert_eq!(crate::error::unwrap_module_message(&e.to_string()), "locked");
    }

    #[test]
    fn standard_registry_resolves_basic_module() {
        let registry = ModuleRegistry::standard();
        assert!(registry.resolve(crate::basic::BASIC_BYTECODE).is_some());
        assert!(registry.resolve(b"\0asm").is_none());
    }
}
