//! Memory available for buffers.

use sysinfo::System;

/// Source of the memory budget a task may spend on buffers.
pub trait MemoryBudget: Send + Sync {
    /// Bytes currently available
    fn available_memory(&self) -> u64;
}

/// Available physical memory, as reported by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryBudget for SystemMemory {
    fn available_memory(&self) -> u64 {
        let mut system = System::new();
        system.refresh_memory();
        system.available_memory()
    }
}

/// A budget fixed by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMemory(pub u64);

impl MemoryBudget for FixedMemory {
    fn available_memory(&self) -> u64 {
        self.0
    }
}
