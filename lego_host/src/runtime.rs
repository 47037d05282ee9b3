use std::rc::Rc;

use anyhow::{Context, Result};
use lego_compat::{Lego, LegoConfig, TickSource, TickSummary};

use crate::cli::RunArgs;
use crate::clock::WorldClock;
use crate::lua_vm::LuaVm;
use crate::memory::{self, MemoryHeap};
use crate::report::{scheduled_functions, RunReport};

pub fn execute(args: RunArgs) -> Result<()> {
    let RunArgs {
        scripts,
        calls,
        frames,
        tick_step,
        start_tick,
        config,
        report_json,
        verbose,
    } = args;
    init_logging(verbose);

    let config = LegoConfig::from_json_file(config.as_deref()).context("loading LeGo config")?;

    let vm = LuaVm::new().context("creating Lua state")?;
    for script in &scripts {
        vm.load_script(script)?;
    }
    let symbol_count = vm.index_symbols()?;
    log::info!(
        "loaded {} script(s) defining {symbol_count} symbols",
        scripts.len()
    );

    let scope = vm.scope();
    let heap = Rc::new(MemoryHeap::new());
    let memory_active = MemoryHeap::is_required(&scope);
    if memory_active {
        log::info!("DMA mod detected: Ikarus");
        memory::install_bindings(vm.lua(), heap.clone()).context("installing MEM_* bindings")?;
    }

    let clock = Rc::new(WorldClock::new(start_tick));
    let lego = if Lego::is_required(&scope, MemoryHeap::is_required) {
        let lego = Lego::activate(&scope, heap.clone(), clock.clone(), &config)
            .context("activating LeGo")?;
        Some(lego)
    } else {
        log::info!("program does not use LeGo; running without frame functions");
        None
    };

    for name in &calls {
        vm.call_entry(name)?;
    }

    let mut totals = TickSummary::default();
    for _ in 0..frames {
        if let Some(lego) = lego.as_ref() {
            totals.accumulate(lego.tick(&scope));
        }
        clock.advance(tick_step);
    }
    log::info!(
        "ran {frames} frame(s): {} invoked, {} faulted, {} expired",
        totals.invoked,
        totals.faulted,
        totals.expired
    );

    let frame_functions = lego
        .as_ref()
        .map(|lego| scheduled_functions(&scope, lego.scheduler().entries()))
        .unwrap_or_default();
    let report = RunReport {
        lego_active: lego.is_some(),
        memory_active,
        frames,
        final_tick: clock.tick_count(),
        events: vm.events(),
        frame_functions,
        totals,
        heap: heap.stats(),
    };

    if let Some(path) = report_json.as_ref() {
        report.write_json(path)?;
        println!("Saved run report to {}", path.display());
    }

    Ok(())
}

/// `RUST_LOG` wins over the default filter picked by `--verbose`.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}
