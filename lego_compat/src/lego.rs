use std::rc::Rc;

use crate::allocator::{InstanceAllocator, MemoryBackend};
use crate::config::LegoConfig;
use crate::error::LegoError;
use crate::frame_functions::{FrameFunctionRequest, FrameFunctionScheduler, TickSummary};
use crate::overrides::{ArgKind, OverrideArgs, OverrideHandler, OverrideReturn, OverrideTable};
use crate::symbols::{ScriptVm, SymbolInfo};

/// Symbols a LeGo-enabled script program always defines.
pub const INIT_SYMBOLS: [&str; 2] = ["LeGo_InitFlags", "LeGo_Init"];

/// Monotonic tick counter owned by the host world.
pub trait TickSource {
    fn tick_count(&self) -> u64;
}

/// The activated compatibility layer.
pub struct Lego {
    scheduler: Rc<FrameFunctionScheduler>,
    allocator: Rc<InstanceAllocator>,
    clock: Rc<dyn TickSource>,
}

impl Lego {
    /// True when the program was written against LeGo and the memory layer
    /// it depends on is present too.
    pub fn is_required(
        vm: &dyn ScriptVm,
        dependency_required: impl FnOnce(&dyn ScriptVm) -> bool,
    ) -> bool {
        INIT_SYMBOLS
            .iter()
            .all(|name| vm.find_symbol_by_name(name).is_some())
            && dependency_required(vm)
    }

    pub fn new(
        memory: Rc<dyn MemoryBackend>,
        clock: Rc<dyn TickSource>,
        config: &LegoConfig,
    ) -> Self {
        Lego {
            scheduler: Rc::new(FrameFunctionScheduler::new(
                config.frame_functions.clone(),
            )),
            allocator: Rc::new(InstanceAllocator::new(memory)),
            clock,
        }
    }

    /// Builds the layer and installs its overrides into `vm`.
    pub fn activate(
        vm: &dyn ScriptVm,
        memory: Rc<dyn MemoryBackend>,
        clock: Rc<dyn TickSource>,
        config: &LegoConfig,
    ) -> Result<Self, LegoError> {
        log::info!("DMA mod detected: LeGo");
        let lego = Lego::new(memory, clock, config);
        lego.override_table().install(vm)?;
        Ok(lego)
    }

    pub fn scheduler(&self) -> &FrameFunctionScheduler {
        &self.scheduler
    }

    /// Runs due frame functions against the host clock's current tick.
    pub fn tick(&self, vm: &dyn ScriptVm) -> TickSummary {
        self.scheduler.tick(vm, self.clock.tick_count())
    }

    pub fn override_table(&self) -> OverrideTable {
        let mut table = OverrideTable::new();
        self.register_frame_functions(&mut table);
        register_engine_stubs(&mut table);

        let allocator = self.allocator.clone();
        table.register(OverrideHandler::new(
            "CREATE",
            &[ArgKind::Int],
            move |vm, args| OverrideReturn::Int(allocator.create(vm, args.int(0)) as i32),
        ));
        table.register(OverrideHandler::new("LOCALS", &[], |_, _| {
            // LeGo spills the caller's locals here and restores them on return.
            log::error!("not implemented call [LOCALS]");
            OverrideReturn::Void
        }));
        table
    }

    fn register_frame_functions(&self, table: &mut OverrideTable) {
        let scheduler = self.scheduler.clone();
        let clock = self.clock.clone();
        table.register(OverrideHandler::new(
            "_FF_Create",
            &[
                ArgKind::Func,
                ArgKind::Int,
                ArgKind::Int,
                ArgKind::Int,
                ArgKind::Int,
                ArgKind::Bool,
            ],
            move |_, args| {
                let Some(function) = resolved_function("_FF_Create", args) else {
                    return OverrideReturn::Void;
                };
                let request = FrameFunctionRequest {
                    function: function.index,
                    delay: args.int(1),
                    cycles: args.int(2),
                    has_payload: args.int(3) != 0,
                    payload: args.int(4),
                    game_time: args.boolean(5),
                };
                scheduler.register(request, clock.tick_count());
                OverrideReturn::Void
            },
        ));

        let scheduler = self.scheduler.clone();
        table.register(OverrideHandler::new(
            "FF_RemoveData",
            &[ArgKind::Func, ArgKind::Int],
            move |_, args| {
                if let Some(function) = resolved_function("FF_RemoveData", args) {
                    scheduler.remove_by_function_and_payload(function.index, args.int(1));
                }
                OverrideReturn::Void
            },
        ));

        let scheduler = self.scheduler.clone();
        table.register(OverrideHandler::new(
            "FF_ActiveData",
            &[ArgKind::Func, ArgKind::Int],
            move |_, args| {
                let active = resolved_function("FF_ActiveData", args)
                    .is_some_and(|function| scheduler.is_active(function.index, Some(args.int(1))));
                OverrideReturn::Bool(active)
            },
        ));

        let scheduler = self.scheduler.clone();
        table.register(OverrideHandler::new(
            "FF_Active",
            &[ArgKind::Func],
            move |_, args| {
                let active = resolved_function("FF_Active", args)
                    .is_some_and(|function| scheduler.is_active(function.index, None));
                OverrideReturn::Bool(active)
            },
        ));

        if self.scheduler.config().bulk_removal {
            let scheduler = self.scheduler.clone();
            table.register(OverrideHandler::new(
                "FF_Remove",
                &[ArgKind::Func],
                move |_, args| {
                    if let Some(function) = resolved_function("FF_Remove", args) {
                        scheduler.remove_function(function.index);
                    }
                    OverrideReturn::Void
                },
            ));
            let scheduler = self.scheduler.clone();
            table.register(OverrideHandler::new(
                "FF_RemoveAll",
                &[ArgKind::Func],
                move |_, args| {
                    if let Some(function) = resolved_function("FF_RemoveAll", args) {
                        scheduler.remove_all(function.index);
                    }
                    OverrideReturn::Void
                },
            ));
        }
    }
}

fn resolved_function<'a>(caller: &str, args: &'a OverrideArgs) -> Option<&'a SymbolInfo> {
    let function = args.func(0);
    if function.is_none() {
        log::error!("{caller}: invalid function ptr");
    }
    function
}

// Native hooks that patch engine code by address; the host has no such code.
fn register_engine_stubs(table: &mut OverrideTable) {
    for name in ["HookEngineF", "HookEngineI"] {
        table.register(OverrideHandler::new(
            name,
            &[ArgKind::Int, ArgKind::Int, ArgKind::Func],
            move |_, args| {
                log::error!(
                    "not implemented call [{name}] ({:#010x} -> {})",
                    args.int(0) as u32,
                    args.func_name(2)
                );
                OverrideReturn::Void
            },
        ));
    }

    table.register(OverrideHandler::new(
        "CC_Register",
        &[ArgKind::Func, ArgKind::Str, ArgKind::Str],
        |_, args| {
            log::error!(
                "not implemented call [CC_Register] ({} -> {})",
                args.string(1),
                args.func_name(0)
            );
            OverrideReturn::Void
        },
    ));

    table.register(OverrideHandler::new("_RENDER_INIT", &[], |_, _| {
        log::error!("not implemented call [_RENDER_INIT]");
        OverrideReturn::Void
    }));

    // Patches the engine's timed print routines to fix text colors.
    table.register(OverrideHandler::new("PRINT_FIXPS", &[], |_, _| {
        OverrideReturn::Void
    }));
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::FrameFunctionConfig;
    use crate::overrides::ScriptArg;
    use crate::testing::FakeVm;

    struct ManualClock(Cell<u64>);

    impl TickSource for ManualClock {
        fn tick_count(&self) -> u64 {
            self.0.get()
        }
    }

    struct BumpMemory(Cell<u32>);

    impl MemoryBackend for BumpMemory {
        fn mem_alloc(&self, size: u32) -> Option<u32> {
            let address = self.0.get();
            self.0.set(address + size);
            Some(address)
        }
    }

    fn activate(vm: &FakeVm, config: LegoConfig) -> (Lego, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock(Cell::new(100)));
        let memory = Rc::new(BumpMemory(Cell::new(0x2000)));
        let lego = Lego::activate(vm, memory, clock.clone(), &config).expect("activation");
        (lego, clock)
    }

    fn func(symbol: &SymbolInfo) -> ScriptArg {
        ScriptArg::Func(Some(symbol.clone()))
    }

    #[test]
    fn requirement_needs_both_init_symbols_and_dependency() {
        let vm = FakeVm::new();
        vm.add_function("LeGo_Init");
        assert!(!Lego::is_required(&vm, |_| true));
        vm.add_function("LeGo_InitFlags");
        assert!(Lego::is_required(&vm, |_| true));
        assert!(!Lego::is_required(&vm, |_| false));
    }

    #[test]
    fn installs_fixed_override_set() {
        let vm = FakeVm::new();
        activate(&vm, LegoConfig::default());
        let mut names = vm.override_names();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "CC_Register",
                "CREATE",
                "FF_Active",
                "FF_ActiveData",
                "FF_RemoveData",
                "HookEngineF",
                "HookEngineI",
                "LOCALS",
                "PRINT_FIXPS",
                "_FF_Create",
                "_RENDER_INIT",
            ]
        );
    }

    #[test]
    fn bulk_removal_adds_remove_overrides() {
        let vm = FakeVm::new();
        let config = LegoConfig {
            frame_functions: FrameFunctionConfig {
                bulk_removal: true,
                ..FrameFunctionConfig::default()
            },
        };
        activate(&vm, config);
        let names = vm.override_names();
        assert!(names.contains(&"FF_Remove"));
        assert!(names.contains(&"FF_RemoveAll"));
    }

    #[test]
    fn rejected_override_fails_activation() {
        let vm = FakeVm::new();
        vm.reject_override("CREATE");
        let result = Lego::activate(
            &vm,
            Rc::new(BumpMemory(Cell::new(0x2000))),
            Rc::new(ManualClock(Cell::new(0))),
            &LegoConfig::default(),
        );
        assert!(matches!(
            result,
            Err(LegoError::OverrideRejected { name, .. }) if name == "CREATE"
        ));
    }

    #[test]
    fn ff_create_scenario_through_overrides() {
        let vm = FakeVm::new();
        let callback = vm.add_function("Delayed");
        let (lego, clock) = activate(&vm, LegoConfig::default());

        vm.script_call(
            "_FF_Create",
            vec![
                func(&callback),
                ScriptArg::Int(5),
                ScriptArg::Int(1),
                ScriptArg::Int(0),
                ScriptArg::Int(0),
                ScriptArg::Bool(true),
            ],
        );

        for tick in 100..105 {
            clock.0.set(tick);
            lego.tick(&vm);
        }
        assert_eq!(vm.call_count("Delayed"), 0);

        clock.0.set(105);
        lego.tick(&vm);
        assert_eq!(vm.call_count("Delayed"), 1);

        clock.0.set(106);
        lego.tick(&vm);
        assert_eq!(
            vm.script_call("FF_Active", vec![func(&callback)]),
            OverrideReturn::Bool(false)
        );
    }

    #[test]
    fn remove_data_leaves_other_payload() {
        let vm = FakeVm::new();
        let callback = vm.add_function("Tagged");
        let (lego, _clock) = activate(&vm, LegoConfig::default());
        for payload in [1, 2] {
            vm.script_call(
                "_FF_Create",
                vec![
                    func(&callback),
                    ScriptArg::Int(10),
                    ScriptArg::Int(1),
                    ScriptArg::Int(1),
                    ScriptArg::Int(payload),
                    ScriptArg::Bool(false),
                ],
            );
        }

        vm.script_call("FF_RemoveData", vec![func(&callback), ScriptArg::Int(1)]);

        let entries = lego.scheduler().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, 2);
        assert_eq!(
            vm.script_call("FF_ActiveData", vec![func(&callback), ScriptArg::Int(2)]),
            OverrideReturn::Bool(true)
        );
        assert_eq!(
            vm.script_call("FF_ActiveData", vec![func(&callback), ScriptArg::Int(1)]),
            OverrideReturn::Bool(false)
        );
    }

    #[test]
    fn invalid_function_arguments_are_neutral() {
        let vm = FakeVm::new();
        let (lego, _clock) = activate(&vm, LegoConfig::default());
        let missing = ScriptArg::Func(None);

        vm.script_call(
            "_FF_Create",
            vec![
                missing.clone(),
                ScriptArg::Int(0),
                ScriptArg::Int(1),
                ScriptArg::Int(0),
                ScriptArg::Int(0),
                ScriptArg::Bool(true),
            ],
        );
        assert!(lego.scheduler().is_empty());
        assert_eq!(
            vm.script_call("FF_Active", vec![missing.clone()]),
            OverrideReturn::Bool(false)
        );
        assert_eq!(
            vm.script_call("FF_RemoveData", vec![missing, ScriptArg::Int(0)]),
            OverrideReturn::Void
        );
    }

    #[test]
    fn create_override_returns_address_or_zero() {
        let vm = FakeVm::new();
        let class = vm.add_class("C_Node", 12);
        activate(&vm, LegoConfig::default());

        assert_eq!(
            vm.script_call("CREATE", vec![ScriptArg::Int(class.index as i32)]),
            OverrideReturn::Int(0x2000)
        );
        assert_eq!(
            vm.script_call("CREATE", vec![ScriptArg::Int(999)]),
            OverrideReturn::Int(0)
        );
    }

    #[test]
    fn stubs_do_not_touch_the_vm() {
        let vm = FakeVm::new();
        let hook = vm.add_function("MyHook");
        activate(&vm, LegoConfig::default());

        for name in ["HookEngineF", "HookEngineI"] {
            let result = vm.script_call(
                name,
                vec![ScriptArg::Int(0x6F_4E_20), ScriptArg::Int(6), func(&hook)],
            );
            assert_eq!(result, OverrideReturn::Void);
        }
        vm.script_call(
            "CC_Register",
            vec![
                func(&hook),
                ScriptArg::Str("debug ".into()),
                ScriptArg::Str("toggles debug".into()),
            ],
        );
        for name in ["_RENDER_INIT", "PRINT_FIXPS", "LOCALS"] {
            assert_eq!(vm.script_call(name, Vec::new()), OverrideReturn::Void);
        }
        assert!(vm.calls().is_empty());
    }

    #[test]
    fn callbacks_can_reenter_overrides_during_tick() {
        let vm = Rc::new(FakeVm::new());
        let worker = vm.add_function("Worker");
        let (lego, clock) = activate(&vm, LegoConfig::default());
        let again = worker.clone();
        vm.on_call("Worker", move |vm| {
            vm.script_call(
                "_FF_Create",
                vec![
                    ScriptArg::Func(Some(again.clone())),
                    ScriptArg::Int(1),
                    ScriptArg::Int(1),
                    ScriptArg::Int(0),
                    ScriptArg::Int(0),
                    ScriptArg::Bool(true),
                ],
            );
        });
        vm.script_call(
            "_FF_Create",
            vec![
                func(&worker),
                ScriptArg::Int(0),
                ScriptArg::Int(1),
                ScriptArg::Int(0),
                ScriptArg::Int(0),
                ScriptArg::Bool(true),
            ],
        );

        lego.tick(vm.as_ref());
        assert_eq!(vm.call_count("Worker"), 1);
        assert_eq!(lego.scheduler().entries()[0].due_tick, 101);

        clock.0.set(101);
        lego.tick(vm.as_ref());
        assert_eq!(vm.call_count("Worker"), 2);
    }
}
