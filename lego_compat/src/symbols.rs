use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;

use crate::overrides::OverrideHandler;

/// Position of a symbol inside the VM's symbol table.
pub type SymbolIndex = u32;

/// Coarse classification of a symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Instance,
}

/// Metadata the compatibility layer needs about one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    pub index: SymbolIndex,
    pub name: String,
    pub kind: SymbolKind,
    /// Declared parent (class of an instance).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<SymbolIndex>,
    /// Instance size in bytes; only meaningful for classes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_size: Option<u32>,
}

impl SymbolInfo {
    pub fn function(index: SymbolIndex, name: impl Into<String>) -> Self {
        SymbolInfo {
            index,
            name: name.into(),
            kind: SymbolKind::Function,
            parent: None,
            class_size: None,
        }
    }

    pub fn class(index: SymbolIndex, name: impl Into<String>, size: u32) -> Self {
        SymbolInfo {
            index,
            name: name.into(),
            kind: SymbolKind::Class,
            parent: None,
            class_size: Some(size),
        }
    }

    pub fn instance(index: SymbolIndex, name: impl Into<String>, class: SymbolIndex) -> Self {
        SymbolInfo {
            index,
            name: name.into(),
            kind: SymbolKind::Instance,
            parent: Some(class),
            class_size: None,
        }
    }

    pub fn is_instance(&self) -> bool {
        self.kind == SymbolKind::Instance
    }
}

/// Errors surfaced by a [`ScriptVm`] implementation.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("symbol `{0}` is not defined")]
    MissingSymbol(String),
    #[error("symbol #{0} cannot be called")]
    NotCallable(SymbolIndex),
    #[error("{0}")]
    Fault(String),
    #[error("vm backend: {0}")]
    Backend(String),
}

/// Object that can sit in the VM's self slot.
pub trait ScriptInstance: fmt::Debug {
    /// Raw address of the backing memory, if the instance lives in script
    /// addressable memory.
    fn address(&self) -> Option<u32>;
}

pub type InstanceRef = Rc<dyn ScriptInstance>;

/// Lookup and invocation primitives the layer consumes from the host VM.
///
/// All methods take `&self`: callbacks invoked through [`ScriptVm::call`] may
/// re-enter the VM (and the layer) before the call returns.
pub trait ScriptVm {
    fn find_symbol_by_name(&self, name: &str) -> Option<SymbolInfo>;

    fn find_symbol_by_index(&self, index: SymbolIndex) -> Option<SymbolInfo>;

    /// Call a symbol with zero or one integer argument.
    fn call(&self, symbol: &SymbolInfo, arg: Option<i32>) -> Result<(), VmError>;

    /// Whether the program declares a `SELF` receiver slot at all.
    fn has_self_slot(&self) -> bool;

    fn self_instance(&self) -> Option<InstanceRef>;

    fn set_self_instance(&self, instance: Option<InstanceRef>);

    /// Replace the implementation of an existing script function.
    fn override_function(&self, handler: OverrideHandler) -> Result<(), VmError>;
}

/// Calls `symbol` and turns any fault into an error log line.
///
/// Returns `false` when the call faulted.
pub fn invoke_isolated(vm: &dyn ScriptVm, symbol: &SymbolInfo, arg: Option<i32>) -> bool {
    match vm.call(symbol, arg) {
        Ok(()) => true,
        Err(err) => {
            log::error!("exception in \"{}\": {}", symbol.name, err);
            false
        }
    }
}

/// Scoped rebinding of the VM's self slot; the previous receiver comes back
/// when the guard drops.
pub struct SelfBinding<'vm> {
    vm: &'vm dyn ScriptVm,
    previous: Option<Option<InstanceRef>>,
}

impl<'vm> SelfBinding<'vm> {
    pub fn bind(vm: &'vm dyn ScriptVm, instance: InstanceRef) -> Self {
        if !vm.has_self_slot() {
            return SelfBinding { vm, previous: None };
        }
        let previous = vm.self_instance();
        vm.set_self_instance(Some(instance));
        SelfBinding {
            vm,
            previous: Some(previous),
        }
    }

    /// Whether a receiver was actually bound.
    pub fn is_bound(&self) -> bool {
        self.previous.is_some()
    }
}

impl Drop for SelfBinding<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.vm.set_self_instance(previous);
        }
    }
}
