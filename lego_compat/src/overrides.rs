use std::fmt;
use std::rc::Rc;

use crate::error::LegoError;
use crate::symbols::{ScriptVm, SymbolInfo};

/// Declared type of one override parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Bool,
    Str,
    /// A function reference; the VM resolves it to a symbol (or nothing).
    Func,
}

/// Argument value converted by the VM according to an [`ArgKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Int(i32),
    Bool(bool),
    Str(String),
    Func(Option<SymbolInfo>),
}

impl ScriptArg {
    /// Neutral value for a parameter the caller left out.
    pub fn default_for(kind: ArgKind) -> Self {
        match kind {
            ArgKind::Int => ScriptArg::Int(0),
            ArgKind::Bool => ScriptArg::Bool(false),
            ArgKind::Str => ScriptArg::Str(String::new()),
            ArgKind::Func => ScriptArg::Func(None),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverrideArgs {
    values: Vec<ScriptArg>,
}

impl OverrideArgs {
    pub fn new(values: Vec<ScriptArg>) -> Self {
        OverrideArgs { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn int(&self, index: usize) -> i32 {
        match self.values.get(index) {
            Some(ScriptArg::Int(value)) => *value,
            Some(ScriptArg::Bool(flag)) => i32::from(*flag),
            _ => 0,
        }
    }

    pub fn boolean(&self, index: usize) -> bool {
        match self.values.get(index) {
            Some(ScriptArg::Bool(flag)) => *flag,
            Some(ScriptArg::Int(value)) => *value != 0,
            _ => false,
        }
    }

    pub fn string(&self, index: usize) -> &str {
        match self.values.get(index) {
            Some(ScriptArg::Str(text)) => text.as_str(),
            _ => "",
        }
    }

    pub fn func(&self, index: usize) -> Option<&SymbolInfo> {
        match self.values.get(index) {
            Some(ScriptArg::Func(symbol)) => symbol.as_ref(),
            _ => None,
        }
    }

    /// Name of a function argument for diagnostics; empty when unresolved.
    pub fn func_name(&self, index: usize) -> &str {
        self.func(index)
            .map(|symbol| symbol.name.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideReturn {
    Void,
    Int(i32),
    Bool(bool),
}

pub type OverrideFn = Rc<dyn Fn(&dyn ScriptVm, &OverrideArgs) -> OverrideReturn>;

/// Replacement implementation for one named script function.
#[derive(Clone)]
pub struct OverrideHandler {
    name: &'static str,
    params: &'static [ArgKind],
    call: OverrideFn,
}

impl OverrideHandler {
    pub fn new(
        name: &'static str,
        params: &'static [ArgKind],
        call: impl Fn(&dyn ScriptVm, &OverrideArgs) -> OverrideReturn + 'static,
    ) -> Self {
        OverrideHandler {
            name,
            params,
            call: Rc::new(call),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn params(&self) -> &'static [ArgKind] {
        self.params
    }

    pub fn invoke(&self, vm: &dyn ScriptVm, args: &OverrideArgs) -> OverrideReturn {
        (self.call)(vm, args)
    }
}

impl fmt::Debug for OverrideHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideHandler")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Name -> handler table, populated once and installed into the VM.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    handlers: Vec<OverrideHandler>,
}

impl OverrideTable {
    pub fn new() -> Self {
        OverrideTable::default()
    }

    /// Adds a handler, replacing an earlier one with the same name.
    pub fn register(&mut self, handler: OverrideHandler) {
        if let Some(existing) = self
            .handlers
            .iter_mut()
            .find(|existing| existing.name == handler.name)
        {
            *existing = handler;
        } else {
            self.handlers.push(handler);
        }
    }

    pub fn get(&self, name: &str) -> Option<&OverrideHandler> {
        self.handlers.iter().find(|handler| handler.name == name)
    }

    pub fn names(&self) -> impl ExactSizeIterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|handler| handler.name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Installs every handler. The first rejection aborts activation.
    pub fn install(&self, vm: &dyn ScriptVm) -> Result<(), LegoError> {
        for handler in &self.handlers {
            vm.override_function(handler.clone())
                .map_err(|source| LegoError::OverrideRejected {
                    name: handler.name.to_string(),
                    source,
                })?;
            log::debug!("override installed: {}", handler.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVm;

    fn echo(name: &'static str) -> OverrideHandler {
        OverrideHandler::new(name, &[ArgKind::Int], |_, args| {
            OverrideReturn::Int(args.int(0))
        })
    }

    #[test]
    fn register_replaces_same_name() {
        let mut table = OverrideTable::new();
        table.register(echo("A"));
        table.register(OverrideHandler::new("A", &[], |_, _| OverrideReturn::Void));
        table.register(echo("B"));
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["A", "B"]);
        assert!(table.get("A").expect("A present").params().is_empty());
    }

    #[test]
    fn install_stops_at_rejected_name() {
        let vm = FakeVm::new();
        vm.reject_override("B");
        let mut table = OverrideTable::new();
        table.register(echo("A"));
        table.register(echo("B"));
        table.register(echo("C"));

        let err = table.install(&vm).expect_err("B is rejected");
        match err {
            LegoError::OverrideRejected { name, .. } => assert_eq!(name, "B"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(vm.override_names(), vec!["A"]);
    }

    #[test]
    fn args_coerce_between_int_and_bool() {
        let args = OverrideArgs::new(vec![
            ScriptArg::Int(2),
            ScriptArg::Bool(true),
            ScriptArg::Func(None),
        ]);
        assert!(args.boolean(0));
        assert_eq!(args.int(1), 1);
        assert_eq!(args.func_name(2), "");
        assert_eq!(args.string(7), "");
    }
}
