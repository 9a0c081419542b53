//! Nimbus OS scheduling subsystem
//!
//! Two-level process/thread scheduler for the Nimbus teaching kernel:
//! a stride meta-scheduler proportions the CPU between share-reserving
//! processes and the multi-level feedback queue that serves everything
//! else, and every process carries a pool of kernel threads that share
//! its address space.
//!
//! The crate is hardware-free: the embedding kernel provides the
//! context-switch primitive, VM operations, the tick counter and the
//! trap plumbing through the [`hal::Hal`] trait, and instantiates one
//! [`Scheduler`] that owns the process table and the per-CPU records
//! behind a single spinlock.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cpu;
pub mod error;
pub mod hal;
pub mod params;
pub mod proc;
pub mod sched;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod testutil;

// Re-exports
pub use error::{SchedError, SchedResult};
pub use hal::{AddrSpace, Context, FileRef, Hal, InodeRef, TrapFrame};
pub use proc::{Pid, ProcState, Process, Thread, ThreadState, Tid};
pub use sched::{DispatchState, SchedStats, Scheduler};
