//! Per-CPU state
//!
//! One record per CPU: the process it is running, the dispatcher
//! context to switch back into, and the interrupt-disable nesting that
//! makes `push_cli`/`pop_cli` re-entrant.

use crate::hal::Context;

#[derive(Debug)]
pub struct Cpu {
    /// Index of the process running on this CPU, if any.
    pub proc: Option<usize>,

    /// Context-switch here to enter the dispatcher loop.
    pub scheduler_ctx: Context,

    /// Depth of `push_cli` nesting.
    pub ncli: u32,

    /// Were interrupts enabled before the outermost `push_cli`?
    pub intena: bool,
}

impl Cpu {
    pub const fn new() -> Self {
        Self {
            proc: None,
            scheduler_ctx: Context::zeroed(),
            ncli: 0,
            intena: false,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
