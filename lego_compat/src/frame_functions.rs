use std::cell::{Cell, RefCell};

use serde::Serialize;

use crate::config::FrameFunctionConfig;
use crate::symbols::{invoke_isolated, ScriptVm, SymbolIndex};

/// One scheduled callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameFunction {
    pub function: SymbolIndex,
    pub due_tick: u64,
    pub period: u64,
    /// `> 0`: firings left, `0`: expires after the next firing, `< 0`: forever.
    pub remaining_cycles: i32,
    pub has_payload: bool,
    pub payload: i32,
    pub game_time: bool,
}

impl FrameFunction {
    pub fn is_due(&self, now: u64) -> bool {
        self.due_tick <= now
    }

    fn argument(&self) -> Option<i32> {
        self.has_payload.then_some(self.payload)
    }
}

/// Arguments of a `_FF_Create` call after the function has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFunctionRequest {
    pub function: SymbolIndex,
    pub delay: i32,
    pub cycles: i32,
    pub has_payload: bool,
    pub payload: i32,
    pub game_time: bool,
}

impl FrameFunctionRequest {
    pub fn once(function: SymbolIndex, delay: i32) -> Self {
        FrameFunctionRequest {
            function,
            delay,
            cycles: 1,
            has_payload: false,
            payload: 0,
            game_time: true,
        }
    }

    pub fn with_payload(mut self, payload: i32) -> Self {
        self.has_payload = true;
        self.payload = payload;
        self
    }

    pub fn with_cycles(mut self, cycles: i32) -> Self {
        self.cycles = cycles;
        self
    }
}

/// What happened during one scheduler pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub invoked: usize,
    pub faulted: usize,
    pub expired: usize,
    pub carried: usize,
    pub unresolved: usize,
}

impl TickSummary {
    pub fn accumulate(&mut self, other: TickSummary) {
        self.invoked += other.invoked;
        self.faulted += other.faulted;
        self.expired += other.expired;
        self.carried += other.carried;
        self.unresolved += other.unresolved;
    }
}

/// Pending frame functions, re-evaluated once per host tick.
#[derive(Debug, Default)]
pub struct FrameFunctionScheduler {
    entries: RefCell<Vec<FrameFunction>>,
    last_tick: Cell<u64>,
    config: FrameFunctionConfig,
}

impl FrameFunctionScheduler {
    pub fn new(config: FrameFunctionConfig) -> Self {
        FrameFunctionScheduler {
            entries: RefCell::new(Vec::new()),
            last_tick: Cell::new(0),
            config,
        }
    }

    pub fn config(&self) -> &FrameFunctionConfig {
        &self.config
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick.get()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn entries(&self) -> Vec<FrameFunction> {
        self.entries.borrow().clone()
    }

    // Host clocks must not run backwards; a regression is pinned to the last tick.
    fn observe_tick(&self, now: u64) -> u64 {
        let last = self.last_tick.get();
        if now < last {
            log::warn!("frame functions: tick went backwards ({now} < {last}), holding at {last}");
            return last;
        }
        self.last_tick.set(now);
        now
    }

    pub fn register(&self, request: FrameFunctionRequest, now: u64) -> FrameFunction {
        let now = now.max(self.last_tick.get());
        let delay = request.delay.max(0) as u64;
        let entry = FrameFunction {
            function: request.function,
            due_tick: now.saturating_add(delay),
            period: delay,
            remaining_cycles: self.config.repeat_policy.stored_cycles(request.cycles),
            has_payload: request.has_payload,
            payload: request.payload,
            game_time: request.game_time,
        };
        log::debug!(
            "frame function #{} scheduled for tick {} (cycles {})",
            entry.function,
            entry.due_tick,
            entry.remaining_cycles
        );
        self.entries.borrow_mut().push(entry.clone());
        entry
    }

    /// Runs every due entry once.
    ///
    /// The live list is emptied before the first callback runs, so callbacks
    /// registering new frame functions only affect later ticks. No borrow is
    /// held while a callback executes.
    pub fn tick(&self, vm: &dyn ScriptVm, now: u64) -> TickSummary {
        let now = self.observe_tick(now);
        let pending = self.entries.take();
        let mut summary = TickSummary::default();

        for mut entry in pending {
            if !entry.is_due(now) {
                summary.carried += 1;
                self.entries.borrow_mut().push(entry);
                continue;
            }

            let Some(symbol) = vm.find_symbol_by_index(entry.function) else {
                summary.unresolved += 1;
                continue;
            };

            summary.invoked += 1;
            if !invoke_isolated(vm, &symbol, entry.argument()) {
                summary.faulted += 1;
            }

            if entry.remaining_cycles > 0 {
                entry.remaining_cycles -= 1;
            }
            if entry.remaining_cycles == 0 {
                summary.expired += 1;
                continue;
            }
            entry.due_tick = entry.due_tick.saturating_add(entry.period);
            summary.carried += 1;
            self.entries.borrow_mut().push(entry);
        }

        summary
    }

    /// Drops every entry matching both function and payload. Returns the
    /// number removed.
    pub fn remove_by_function_and_payload(&self, function: SymbolIndex, payload: i32) -> usize {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|entry| !(entry.function == function && entry.payload == payload));
        before - entries.len()
    }

    pub fn is_active(&self, function: SymbolIndex, payload: Option<i32>) -> bool {
        self.entries.borrow().iter().any(|entry| {
            entry.function == function && payload.map_or(true, |payload| entry.payload == payload)
        })
    }

    /// Removes the first entry for `function`; a no-op unless bulk removal is
    /// enabled.
    pub fn remove_function(&self, function: SymbolIndex) -> usize {
        if !self.config.bulk_removal {
            log::debug!("frame functions: remove #{function} ignored (bulk removal disabled)");
            return 0;
        }
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|entry| entry.function == function) {
            Some(position) => {
                entries.remove(position);
                1
            }
            None => 0,
        }
    }

    /// Removes every entry for `function`; a no-op unless bulk removal is
    /// enabled.
    pub fn remove_all(&self, function: SymbolIndex) -> usize {
        if !self.config.bulk_removal {
            log::debug!("frame functions: remove-all #{function} ignored (bulk removal disabled)");
            return 0;
        }
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|entry| entry.function != function);
        before - entries.len()
    }
}
