use std::collections::HashMap;

use lego_compat::{SymbolIndex, SymbolInfo, SymbolKind};
use mlua::{Function, Lua, RegistryKey, Result as LuaResult, Table, Value};

/// Global holding class descriptors: `CLASSES = { C_Foo = { size = 8, init = fn } }`.
const CLASSES_GLOBAL: &str = "CLASSES";
/// Global holding instance symbols: `INSTANCES = { Foo = { class = "C_Foo", init = fn } }`.
const INSTANCES_GLOBAL: &str = "INSTANCES";

#[derive(Debug)]
pub(crate) struct SymbolEntry {
    pub(crate) info: SymbolInfo,
    pub(crate) callable: Option<RegistryKey>,
}

/// Index over the script program's globals, built once after loading.
#[derive(Debug, Default)]
pub(crate) struct SymbolTable {
    entries: Vec<SymbolEntry>,
    by_name: HashMap<String, SymbolIndex>,
    by_pointer: HashMap<usize, SymbolIndex>,
}

impl SymbolTable {
    pub(crate) fn build(lua: &Lua) -> LuaResult<Self> {
        let mut table = SymbolTable::default();
        let globals = lua.globals();

        let mut functions: Vec<(String, Function)> = Vec::new();
        for pair in globals.clone().pairs::<Value, Value>() {
            let (key, value) = pair?;
            if let (Value::String(name), Value::Function(func)) = (key, value) {
                // Host bindings and the Lua standard library are C functions.
                if func.info().what == "C" {
                    continue;
                }
                functions.push((name.to_str()?.to_string(), func));
            }
        }
        functions.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, func) in functions {
            let pointer = func.to_pointer() as usize;
            let index = table.push(lua, |index| SymbolInfo::function(index, &name), Some(func))?;
            table.by_pointer.insert(pointer, index);
        }

        let mut classes: Vec<(String, Table)> = declarations(&globals, CLASSES_GLOBAL)?;
        classes.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, decl) in classes {
            let size = match decl.get::<_, Value>("size")? {
                Value::Integer(size) => u32::try_from(size).ok(),
                Value::Number(size) if size >= 0.0 => Some(size as u32),
                _ => None,
            };
            let init = decl.get::<_, Option<Function>>("init")?;
            table.push(
                lua,
                |index| SymbolInfo {
                    index,
                    name: name.clone(),
                    kind: SymbolKind::Class,
                    parent: None,
                    class_size: size,
                },
                init,
            )?;
        }

        let mut instances: Vec<(String, Table)> = declarations(&globals, INSTANCES_GLOBAL)?;
        instances.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, decl) in instances {
            let parent = decl
                .get::<_, Option<String>>("class")?
                .and_then(|class| table.index_of(&class));
            let init = decl.get::<_, Option<Function>>("init")?;
            table.push(
                lua,
                |index| SymbolInfo {
                    index,
                    name: name.clone(),
                    kind: SymbolKind::Instance,
                    parent,
                    class_size: None,
                },
                init,
            )?;
        }

        Ok(table)
    }

    fn push(
        &mut self,
        lua: &Lua,
        make: impl FnOnce(SymbolIndex) -> SymbolInfo,
        callable: Option<Function>,
    ) -> LuaResult<SymbolIndex> {
        let index = self.entries.len() as SymbolIndex;
        let info = make(index);
        let callable = callable
            .map(|func| lua.create_registry_value(func))
            .transpose()?;
        self.by_name.entry(info.name.clone()).or_insert(index);
        self.entries.push(SymbolEntry { info, callable });
        Ok(index)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<SymbolIndex> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn by_index(&self, index: SymbolIndex) -> Option<&SymbolEntry> {
        self.entries.get(index as usize)
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<&SymbolEntry> {
        self.index_of(name).and_then(|index| self.by_index(index))
    }

    pub(crate) fn by_function(&self, func: &Function) -> Option<&SymbolEntry> {
        let pointer = func.to_pointer() as usize;
        self.by_pointer
            .get(&pointer)
            .and_then(|index| self.by_index(*index))
    }

    /// Swaps in a new implementation, returning the previous registry key.
    pub(crate) fn replace_callable(
        &mut self,
        index: SymbolIndex,
        key: RegistryKey,
    ) -> Option<RegistryKey> {
        self.entries
            .get_mut(index as usize)
            .and_then(|entry| entry.callable.replace(key))
    }

    /// Class and instance symbols, which scripts refer to by index.
    pub(crate) fn declared_objects(&self) -> impl Iterator<Item = &SymbolInfo> {
        self.entries
            .iter()
            .map(|entry| &entry.info)
            .filter(|info| matches!(info.kind, SymbolKind::Class | SymbolKind::Instance))
    }
}

fn declarations<'lua>(globals: &Table<'lua>, key: &str) -> LuaResult<Vec<(String, Table<'lua>)>> {
    let mut out = Vec::new();
    let Some(decls) = globals.get::<_, Option<Table>>(key)? else {
        return Ok(out);
    };
    for pair in decls.pairs::<Value, Value>() {
        let (name, value) = pair?;
        match (name, value) {
            (Value::String(name), Value::Table(decl)) => {
                out.push((name.to_str()?.to_string(), decl));
            }
            (name, _) => {
                log::warn!("{key}: ignoring malformed declaration {name:?}");
            }
        }
    }
    Ok(out)
}
