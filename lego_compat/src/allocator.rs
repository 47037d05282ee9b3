use std::rc::Rc;

use crate::error::LegoError;
use crate::symbols::{invoke_isolated, InstanceRef, ScriptInstance, ScriptVm, SelfBinding, SymbolInfo};

/// Raw memory provider (the dependent layer LeGo builds on).
pub trait MemoryBackend {
    /// Allocates `size` zeroed bytes and returns their script-visible
    /// address, or `None` when the block cannot be provided.
    fn mem_alloc(&self, size: u32) -> Option<u32>;
}

/// Instance backed by a block from the [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryInstance {
    address: u32,
}

impl ScriptInstance for MemoryInstance {
    fn address(&self) -> Option<u32> {
        Some(self.address)
    }
}

/// Implements LeGo's `CREATE`: fabricate an instance of a script class in
/// raw memory and run its initializer against it.
pub struct InstanceAllocator {
    memory: Rc<dyn MemoryBackend>,
}

impl InstanceAllocator {
    pub fn new(memory: Rc<dyn MemoryBackend>) -> Self {
        InstanceAllocator { memory }
    }

    /// Returns the new block's address, or `0` after logging when `id` does
    /// not name a usable class or instance.
    pub fn create(&self, vm: &dyn ScriptVm, id: i32) -> u32 {
        match self.try_create(vm, id) {
            Ok(address) => address,
            Err(err) => {
                log::error!("LeGo::create {err}");
                0
            }
        }
    }

    pub fn try_create(&self, vm: &dyn ScriptVm, id: i32) -> Result<u32, LegoError> {
        let symbol = u32::try_from(id)
            .ok()
            .and_then(|index| vm.find_symbol_by_index(index))
            .ok_or(LegoError::InvalidSymbol(id))?;
        let class = resolve_class(vm, &symbol).ok_or(LegoError::InvalidSymbol(id))?;
        let size = class
            .class_size
            .ok_or_else(|| LegoError::MissingClassSize(class.name.clone()))?;
        let address = self
            .memory
            .mem_alloc(size)
            .ok_or(LegoError::AllocationFailed(size))?;

        let instance: InstanceRef = Rc::new(MemoryInstance { address });
        {
            let _binding = SelfBinding::bind(vm, instance);
            invoke_isolated(vm, &symbol, None);
        }
        Ok(address)
    }
}

// Instance symbols carry their class as parent; anything else is taken as
// the class itself.
fn resolve_class(vm: &dyn ScriptVm, symbol: &SymbolInfo) -> Option<SymbolInfo> {
    if symbol.is_instance() {
        symbol
            .parent
            .and_then(|parent| vm.find_symbol_by_index(parent))
    } else {
        Some(symbol.clone())
    }
}
