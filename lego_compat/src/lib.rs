//! Compatibility layer for script programs written against the LeGo DMA mod.
//!
//! LeGo scripts expect a handful of natively implemented helpers: frame
//! functions (deferred and periodic callbacks), `CREATE` for fabricating
//! class instances at runtime, and a few engine hooks. This crate provides
//! those on top of any VM that implements [`ScriptVm`], so a host only has to
//! expose symbol lookup and invocation.

pub mod allocator;
pub mod config;
pub mod error;
pub mod frame_functions;
pub mod lego;
pub mod overrides;
pub mod symbols;

#[cfg(test)]
pub(crate) mod testing;

pub use allocator::{InstanceAllocator, MemoryBackend, MemoryInstance};
pub use config::{FrameFunctionConfig, LegoConfig, RepeatPolicy};
pub use error::LegoError;
pub use frame_functions::{FrameFunction, FrameFunctionRequest, FrameFunctionScheduler, TickSummary};
pub use lego::{Lego, TickSource};
pub use overrides::{ArgKind, OverrideArgs, OverrideHandler, OverrideReturn, OverrideTable, ScriptArg};
pub use symbols::{
    invoke_isolated, InstanceRef, ScriptInstance, ScriptVm, SelfBinding, SymbolIndex, SymbolInfo,
    SymbolKind, VmError,
};
