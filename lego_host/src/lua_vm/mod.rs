//! mlua-backed [`ScriptVm`] for running LeGo script programs.
//!
//! A program is a set of Lua chunks. After loading, [`LuaVm::index_symbols`]
//! freezes the program's functions, classes and instances into a symbol
//! table; overrides replace both the Lua global and the table's callable.

mod bindings;
mod symbols;

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use lego_compat::{
    InstanceRef, OverrideHandler, ScriptVm, SymbolIndex, SymbolInfo, SymbolKind, VmError,
};
use mlua::{Function, Lua, LuaOptions, StdLib, Value, Variadic};

pub(crate) use bindings::value_to_i32;

use symbols::SymbolTable;

/// Global mirroring the address of the bound self instance.
pub const SELF_GLOBAL: &str = "SELF";

#[derive(Debug, Default)]
pub(crate) struct VmState {
    pub(crate) symbols: RefCell<SymbolTable>,
    self_slot: RefCell<Option<InstanceRef>>,
    has_self_slot: Cell<bool>,
    pub(crate) events: RefCell<Vec<String>>,
}

pub struct LuaVm {
    lua: Lua,
    state: Rc<VmState>,
}

impl LuaVm {
    pub fn new() -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
        let state = Rc::new(VmState::default());
        bindings::install_host_globals(&lua, state.clone())?;
        Ok(LuaVm { lua, state })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn load_script(&self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        self.load_source(&path.display().to_string(), &source)
    }

    pub fn load_source(&self, name: &str, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .with_context(|| format!("executing {name}"))
    }

    /// Builds the symbol table from the loaded program. Call once, after all
    /// scripts are loaded and before any layer looks symbols up.
    pub fn index_symbols(&self) -> Result<usize> {
        let table = SymbolTable::build(&self.lua).context("indexing script symbols")?;
        let globals = self.lua.globals();
        for info in table.declared_objects() {
            if matches!(globals.get::<_, Value>(info.name.as_str())?, Value::Nil) {
                globals.set(info.name.as_str(), info.index)?;
            }
        }
        let has_self = !matches!(globals.get::<_, Value>(SELF_GLOBAL)?, Value::Nil);
        self.state.has_self_slot.set(has_self);

        let count = table.len();
        *self.state.symbols.borrow_mut() = table;
        log::debug!("indexed {count} script symbols (self slot: {has_self})");
        Ok(count)
    }

    pub fn scope(&self) -> LuaScope<'_> {
        LuaScope {
            lua: &self.lua,
            state: self.state.clone(),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.state.events.borrow().clone()
    }

    /// Calls a script entry point; unlike frame functions, failures here
    /// abort the run.
    pub fn call_entry(&self, name: &str) -> Result<()> {
        let scope = self.scope();
        let symbol = scope
            .find_symbol_by_name(name)
            .ok_or_else(|| anyhow!("entry point `{name}` is not defined"))?;
        scope
            .call(&symbol, None)
            .with_context(|| format!("calling entry point {name}"))
    }
}

/// Borrowed view of a [`LuaVm`] that the compatibility layer drives.
pub struct LuaScope<'lua> {
    lua: &'lua Lua,
    state: Rc<VmState>,
}

fn backend(err: mlua::Error) -> VmError {
    VmError::Backend(err.to_string())
}

impl<'lua> LuaScope<'lua> {
    fn callable(&self, symbol: &SymbolInfo) -> Result<Option<Function<'lua>>, VmError> {
        let symbols = self.state.symbols.borrow();
        let entry = symbols
            .by_index(symbol.index)
            .ok_or(VmError::NotCallable(symbol.index))?;
        entry
            .callable
            .as_ref()
            .map(|key| self.lua.registry_value::<Function>(key).map_err(backend))
            .transpose()
    }
}

impl ScriptVm for LuaScope<'_> {
    fn find_symbol_by_name(&self, name: &str) -> Option<SymbolInfo> {
        self.state
            .symbols
            .borrow()
            .by_name(name)
            .map(|entry| entry.info.clone())
    }

    fn find_symbol_by_index(&self, index: SymbolIndex) -> Option<SymbolInfo> {
        self.state
            .symbols
            .borrow()
            .by_index(index)
            .map(|entry| entry.info.clone())
    }

    fn call(&self, symbol: &SymbolInfo, arg: Option<i32>) -> Result<(), VmError> {
        let Some(func) = self.callable(symbol)? else {
            // Classes and instances without an init block are valid targets.
            return match symbol.kind {
                SymbolKind::Class | SymbolKind::Instance => Ok(()),
                _ => Err(VmError::NotCallable(symbol.index)),
            };
        };
        let result = match arg {
            Some(value) => func.call::<_, ()>(value),
            None => func.call::<_, ()>(()),
        };
        result.map_err(|err| VmError::Fault(err.to_string()))
    }

    fn has_self_slot(&self) -> bool {
        self.state.has_self_slot.get()
    }

    fn self_instance(&self) -> Option<InstanceRef> {
        self.state.self_slot.borrow().clone()
    }

    fn set_self_instance(&self, instance: Option<InstanceRef>) {
        let mirrored = match instance.as_ref().and_then(|instance| instance.address()) {
            Some(address) => Value::Integer(address as i64),
            None => Value::Boolean(false),
        };
        *self.state.self_slot.borrow_mut() = instance;
        if let Err(err) = self.lua.globals().set(SELF_GLOBAL, mirrored) {
            log::warn!("failed to mirror {SELF_GLOBAL}: {err}");
        }
    }

    fn override_function(&self, handler: OverrideHandler) -> Result<(), VmError> {
        let name = handler.name();
        let index = match self.find_symbol_by_name(name) {
            Some(info) if info.kind == SymbolKind::Function => info.index,
            _ => return Err(VmError::MissingSymbol(name.to_string())),
        };

        let state = self.state.clone();
        let adapter = self
            .lua
            .create_function(move |lua, args: Variadic<Value>| {
                let converted = bindings::convert_args(&state, handler.params(), &args);
                let scope = LuaScope {
                    lua,
                    state: state.clone(),
                };
                Ok(bindings::return_value(handler.invoke(&scope, &converted)))
            })
            .map_err(backend)?;

        let key = self
            .lua
            .create_registry_value(adapter.clone())
            .map_err(backend)?;
        self.lua.globals().set(name, adapter).map_err(backend)?;
        let previous = self.state.symbols.borrow_mut().replace_callable(index, key);
        if let Some(previous) = previous {
            self.lua.remove_registry_value(previous).map_err(backend)?;
        }
        Ok(())
    }
}
