use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lego_compat::{FrameFunction, ScriptVm, TickSummary};
use serde::Serialize;

use crate::memory::HeapStats;

/// JSON summary of one host run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub lego_active: bool,
    pub memory_active: bool,
    pub frames: u64,
    pub final_tick: u64,
    pub events: Vec<String>,
    pub frame_functions: Vec<ScheduledFunction>,
    pub totals: TickSummary,
    pub heap: HeapStats,
}

/// A live frame function, annotated with its script name.
#[derive(Debug, Serialize)]
pub struct ScheduledFunction {
    pub name: Option<String>,
    #[serde(flatten)]
    pub entry: FrameFunction,
}

pub fn scheduled_functions(vm: &dyn ScriptVm, entries: Vec<FrameFunction>) -> Vec<ScheduledFunction> {
    entries
        .into_iter()
        .map(|entry| ScheduledFunction {
            name: vm
                .find_symbol_by_index(entry.function)
                .map(|symbol| symbol.name),
            entry,
        })
        .collect()
}

impl RunReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing run report to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing run report to {}", path.display()))
    }
}
