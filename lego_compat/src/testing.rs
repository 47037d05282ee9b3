//! In-memory VM used by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::overrides::{OverrideArgs, OverrideHandler, OverrideReturn, ScriptArg};
use crate::symbols::{InstanceRef, ScriptInstance, ScriptVm, SymbolIndex, SymbolInfo, VmError};

#[derive(Debug)]
pub(crate) struct TestInstance(pub(crate) u32);

impl ScriptInstance for TestInstance {
    fn address(&self) -> Option<u32> {
        Some(self.0)
    }
}

type CallHook = Rc<dyn Fn(&FakeVm)>;

#[derive(Default)]
pub(crate) struct FakeVm {
    symbols: RefCell<Vec<SymbolInfo>>,
    failures: RefCell<HashMap<String, String>>,
    hooks: RefCell<HashMap<String, CallHook>>,
    calls: RefCell<Vec<(String, Option<i32>)>>,
    observed_self: RefCell<Vec<(String, Option<u32>)>>,
    self_slot: RefCell<Option<InstanceRef>>,
    no_self_slot: Cell<bool>,
    overrides: RefCell<Vec<OverrideHandler>>,
    rejected: RefCell<HashSet<String>>,
}

impl FakeVm {
    pub(crate) fn new() -> Self {
        FakeVm::default()
    }

    pub(crate) fn without_self_slot() -> Self {
        let vm = FakeVm::default();
        vm.no_self_slot.set(true);
        vm
    }

    fn push(&self, make: impl FnOnce(SymbolIndex) -> SymbolInfo) -> SymbolInfo {
        let mut symbols = self.symbols.borrow_mut();
        let symbol = make(symbols.len() as SymbolIndex);
        symbols.push(symbol.clone());
        symbol
    }

    pub(crate) fn add_function(&self, name: &str) -> SymbolInfo {
        self.push(|index| SymbolInfo::function(index, name))
    }

    pub(crate) fn add_class(&self, name: &str, size: u32) -> SymbolInfo {
        self.push(|index| SymbolInfo::class(index, name, size))
    }

    pub(crate) fn add_instance(&self, name: &str, class: SymbolIndex) -> SymbolInfo {
        self.push(|index| SymbolInfo::instance(index, name, class))
    }

    pub(crate) fn fail_on(&self, name: &str, message: &str) {
        self.failures
            .borrow_mut()
            .insert(name.to_string(), message.to_string());
    }

    pub(crate) fn on_call(&self, name: &str, hook: impl Fn(&FakeVm) + 'static) {
        self.hooks
            .borrow_mut()
            .insert(name.to_string(), Rc::new(hook));
    }

    pub(crate) fn reject_override(&self, name: &str) {
        self.rejected.borrow_mut().insert(name.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<(String, Option<i32>)> {
        self.calls.borrow().clone()
    }

    pub(crate) fn call_count(&self, name: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|(called, _)| called == name)
            .count()
    }

    /// Self address seen at the start of each call.
    pub(crate) fn observed_self(&self) -> Vec<(String, Option<u32>)> {
        self.observed_self.borrow().clone()
    }

    pub(crate) fn override_names(&self) -> Vec<&'static str> {
        self.overrides.borrow().iter().map(|h| h.name()).collect()
    }

    /// Simulates script code calling an overridden function.
    pub(crate) fn script_call(&self, name: &str, args: Vec<ScriptArg>) -> OverrideReturn {
        let handler = self
            .overrides
            .borrow()
            .iter()
            .find(|handler| handler.name() == name)
            .cloned()
            .unwrap_or_else(|| panic!("no override installed for {name}"));
        handler.invoke(self, &OverrideArgs::new(args))
    }
}

impl ScriptVm for FakeVm {
    fn find_symbol_by_name(&self, name: &str) -> Option<SymbolInfo> {
        self.symbols
            .borrow()
            .iter()
            .find(|symbol| symbol.name == name)
            .cloned()
    }

    fn find_symbol_by_index(&self, index: SymbolIndex) -> Option<SymbolInfo> {
        self.symbols.borrow().get(index as usize).cloned()
    }

    fn call(&self, symbol: &SymbolInfo, arg: Option<i32>) -> Result<(), VmError> {
        self.calls.borrow_mut().push((symbol.name.clone(), arg));
        let current = self.self_slot.borrow().as_ref().and_then(|i| i.address());
        self.observed_self
            .borrow_mut()
            .push((symbol.name.clone(), current));
        let hook = self.hooks.borrow().get(&symbol.name).cloned();
        if let Some(hook) = hook {
            hook(self);
        }
        match self.failures.borrow().get(&symbol.name) {
            Some(message) => Err(VmError::Fault(message.clone())),
            None => Ok(()),
        }
    }

    fn has_self_slot(&self) -> bool {
        !self.no_self_slot.get()
    }

    fn self_instance(&self) -> Option<InstanceRef> {
        self.self_slot.borrow().clone()
    }

    fn set_self_instance(&self, instance: Option<InstanceRef>) {
        *self.self_slot.borrow_mut() = instance;
    }

    fn override_function(&self, handler: OverrideHandler) -> Result<(), VmError> {
        if self.rejected.borrow().contains(handler.name()) {
            return Err(VmError::MissingSymbol(handler.name().to_string()));
        }
        self.overrides.borrow_mut().push(handler);
        Ok(())
    }
}
