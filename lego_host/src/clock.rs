use std::cell::Cell;

use lego_compat::TickSource;

/// Stand-in for the world's game clock; only ever moves forward.
#[derive(Debug, Default)]
pub struct WorldClock {
    ticks: Cell<u64>,
}

impl WorldClock {
    pub fn new(start: u64) -> Self {
        WorldClock {
            ticks: Cell::new(start),
        }
    }

    pub fn advance(&self, step: u64) {
        self.ticks.set(self.ticks.get().saturating_add(step));
    }
}

impl TickSource for WorldClock {
    fn tick_count(&self) -> u64 {
        self.ticks.get()
    }
}
