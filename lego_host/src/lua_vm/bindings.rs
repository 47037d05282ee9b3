use std::rc::Rc;

use anyhow::Result;
use lego_compat::{ArgKind, OverrideArgs, OverrideReturn, ScriptArg, SymbolInfo};
use mlua::{Lua, Value, Variadic};

use super::VmState;

/// Globals every program sees regardless of which layers activate.
pub(super) fn install_host_globals(lua: &Lua, state: Rc<VmState>) -> Result<()> {
    let globals = lua.globals();

    let events = state;
    globals.set(
        "log_event",
        lua.create_function(move |_, args: Variadic<Value>| {
            let text = args
                .iter()
                .map(describe_value)
                .collect::<Vec<_>>()
                .join(" ");
            log::debug!("script event: {text}");
            events.events.borrow_mut().push(text);
            Ok(())
        })?,
    )?;

    Ok(())
}

/// Converts raw Lua arguments according to the declared parameter kinds.
/// Missing or unconvertible arguments fall back to neutral values.
pub(super) fn convert_args(
    state: &VmState,
    params: &[ArgKind],
    args: &[Value],
) -> OverrideArgs {
    let values = params
        .iter()
        .enumerate()
        .map(|(index, kind)| match args.get(index) {
            Some(value) => convert_arg(state, *kind, value),
            None => ScriptArg::default_for(*kind),
        })
        .collect();
    OverrideArgs::new(values)
}

fn convert_arg(state: &VmState, kind: ArgKind, value: &Value) -> ScriptArg {
    match kind {
        ArgKind::Int => ScriptArg::Int(value_to_i32(value).unwrap_or(0)),
        ArgKind::Bool => ScriptArg::Bool(value_to_bool(value)),
        ArgKind::Str => ScriptArg::Str(value_to_string(value).unwrap_or_default()),
        ArgKind::Func => ScriptArg::Func(resolve_function(state, value)),
    }
}

/// Function references may be passed as the function itself, its global
/// name, or its symbol index.
fn resolve_function(state: &VmState, value: &Value) -> Option<SymbolInfo> {
    let symbols = state.symbols.borrow();
    let entry = match value {
        Value::Function(func) => symbols.by_function(func),
        Value::String(name) => symbols.by_name(name.to_str().ok()?),
        Value::Integer(index) => symbols.by_index(u32::try_from(*index).ok()?),
        Value::Number(index) if *index >= 0.0 => symbols.by_index(*index as u32),
        _ => None,
    }?;
    Some(entry.info.clone())
}

pub(super) fn return_value<'lua>(result: OverrideReturn) -> Value<'lua> {
    match result {
        OverrideReturn::Void => Value::Nil,
        OverrideReturn::Int(value) => Value::Integer(value as i64),
        OverrideReturn::Bool(flag) => Value::Boolean(flag),
    }
}

pub(crate) fn value_to_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Integer(i) => Some(*i as i32),
        Value::Number(n) => Some(*n as i32),
        Value::Boolean(flag) => Some(i32::from(*flag)),
        Value::String(text) => text.to_str().ok()?.parse().ok(),
        _ => None,
    }
}

fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Boolean(flag) => *flag,
        Value::Integer(i) => *i != 0,
        Value::Number(n) => *n != 0.0,
        _ => false,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => text.to_str().ok().map(|s| s.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn describe_value(value: &Value) -> String {
    value_to_string(value).unwrap_or_else(|| match value {
        Value::Nil => "nil".to_string(),
        other => format!("<{}>", other.type_name()),
    })
}
