//! Minimal stand-in for the Ikarus memory layer LeGo sits on.
//!
//! Blocks are handed out from a bump pointer above a non-zero base so that a
//! `0` address always means "no instance" to script code.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Result;
use lego_compat::{MemoryBackend, ScriptVm};
use mlua::{Lua, Value, Variadic};
use serde::Serialize;
use thiserror::Error;

use crate::lua_vm::value_to_i32;

pub const HEAP_BASE: u32 = 0x0100_0000;
pub const HEAP_LIMIT: u32 = 16 * 1024 * 1024;

/// Symbol whose presence marks a program written against Ikarus.
pub const REQUIRED_SYMBOL: &str = "MEM_InitAll";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeapError {
    #[error("address {0:#010x} is not inside an allocated block")]
    Unmapped(u32),
    #[error("access at {0:#010x} crosses the end of its block")]
    OutOfBounds(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub blocks: usize,
    pub bytes: u32,
}

#[derive(Debug)]
pub struct MemoryHeap {
    next: Cell<u32>,
    limit: u32,
    blocks: RefCell<BTreeMap<u32, Vec<u8>>>,
}

impl Default for MemoryHeap {
    fn default() -> Self {
        MemoryHeap::with_limit(HEAP_LIMIT)
    }
}

impl MemoryHeap {
    pub fn new() -> Self {
        MemoryHeap::default()
    }

    pub fn with_limit(limit: u32) -> Self {
        MemoryHeap {
            next: Cell::new(HEAP_BASE),
            limit,
            blocks: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn is_required(vm: &dyn ScriptVm) -> bool {
        vm.find_symbol_by_name(REQUIRED_SYMBOL).is_some()
    }

    pub fn stats(&self) -> HeapStats {
        let blocks = self.blocks.borrow();
        HeapStats {
            blocks: blocks.len(),
            bytes: blocks.values().map(|block| block.len() as u32).sum(),
        }
    }

    fn locate(&self, address: u32, width: u32) -> Result<(u32, usize), HeapError> {
        let blocks = self.blocks.borrow();
        let (start, block) = blocks
            .range(..=address)
            .next_back()
            .ok_or(HeapError::Unmapped(address))?;
        let offset = (address - start) as usize;
        if offset >= block.len() {
            return Err(HeapError::Unmapped(address));
        }
        if offset + width as usize > block.len() {
            return Err(HeapError::OutOfBounds(address));
        }
        Ok((*start, offset))
    }

    pub fn read_int(&self, address: u32) -> Result<i32, HeapError> {
        let (start, offset) = self.locate(address, 4)?;
        let blocks = self.blocks.borrow();
        let block = &blocks[&start];
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&block[offset..offset + 4]);
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn write_int(&self, address: u32, value: i32) -> Result<(), HeapError> {
        let (start, offset) = self.locate(address, 4)?;
        let mut blocks = self.blocks.borrow_mut();
        if let Some(block) = blocks.get_mut(&start) {
            block[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }
}

impl MemoryBackend for MemoryHeap {
    fn mem_alloc(&self, size: u32) -> Option<u32> {
        let aligned = size.max(1).checked_add(3)? & !3;
        let address = self.next.get();
        let end = address.checked_add(aligned)?;
        if end - HEAP_BASE > self.limit {
            log::error!("MEM_Alloc: heap exhausted ({size} bytes requested)");
            return None;
        }
        self.blocks
            .borrow_mut()
            .insert(address, vec![0; aligned as usize]);
        self.next.set(end);
        Some(address)
    }
}

/// Exposes `MEM_Alloc`, `MEM_ReadInt` and `MEM_WriteInt` to script code.
pub fn install_bindings(lua: &Lua, heap: Rc<MemoryHeap>) -> Result<()> {
    let globals = lua.globals();

    let alloc_heap = heap.clone();
    globals.set(
        "MEM_Alloc",
        lua.create_function(move |_, args: Variadic<Value>| {
            let size = args.first().and_then(value_to_i32).unwrap_or(0);
            let address = u32::try_from(size)
                .ok()
                .and_then(|size| alloc_heap.mem_alloc(size))
                .unwrap_or(0);
            Ok(address as i64)
        })?,
    )?;

    let read_heap = heap.clone();
    globals.set(
        "MEM_ReadInt",
        lua.create_function(move |_, args: Variadic<Value>| {
            let address = args.first().and_then(value_to_i32).unwrap_or(0) as u32;
            match read_heap.read_int(address) {
                Ok(value) => Ok(value as i64),
                Err(err) => {
                    log::error!("MEM_ReadInt: {err}");
                    Ok(0)
                }
            }
        })?,
    )?;

    let write_heap = heap;
    globals.set(
        "MEM_WriteInt",
        lua.create_function(move |_, args: Variadic<Value>| {
            let address = args.first().and_then(value_to_i32).unwrap_or(0) as u32;
            let value = args.get(1).and_then(value_to_i32).unwrap_or(0);
            if let Err(err) = write_heap.write_int(address, value) {
                log::error!("MEM_WriteInt: {err}");
            }
            Ok(())
        })?,
    )?;

    Ok(())
}
