//! Scheduler core
//!
//! One [`Scheduler`] instance owns everything the subsystem mutates:
//! the process table, the MLFQ (with its embedded stride
//! meta-scheduler) and the per-CPU records, all behind a single
//! spinlock. Interrupts are disabled whenever the lock is held; the
//! per-CPU `ncli` counter makes the disable nesting re-entrant.
//!
//! The lock is deliberately not an RAII guard: a suspending thread
//! acquires it, switches into the dispatcher, and a *different*
//! execution releases it (the dispatcher at the end of its iteration,
//! or the bootstrap glue of a freshly created thread).

pub mod dispatcher;
pub mod lifecycle;
pub mod mlfq;
pub mod stats;
pub mod stride;
pub mod suspend;
pub mod threads;

pub use dispatcher::DispatchState;
pub use mlfq::{Mlfq, Slice};
pub use stats::SchedStats;
pub use stride::{Pass, Stride, StrideOwner, StridePick, MLFQ_SLOT};

use alloc::boxed::Box;
use core::cell::UnsafeCell;

use spin::Once;

use crate::cpu::Cpu;
use crate::hal::Hal;
use crate::params::{NCPU, NPROC};
use crate::proc::{Pid, Process, Tid};
use crate::sync::SpinLock;

/// Everything mutated under the table lock.
pub struct SchedState {
    pub procs: Box<[Process]>,
    pub mlfq: Mlfq,
    pub next_pid: Pid,
    pub next_tid: Tid,

    /// Slot of the init process, reaper of orphans.
    pub init_idx: Option<usize>,

    pub stats: SchedStats,
}

impl SchedState {
    fn new() -> Self {
        Self {
            procs: (0..NPROC).map(|_| Process::unused()).collect(),
            mlfq: Mlfq::new(),
            next_pid: 1,
            next_tid: 1,
            init_idx: None,
            stats: SchedStats::default(),
        }
    }
}

pub struct Scheduler<H: Hal> {
    hal: H,
    lock: SpinLock,
    state: UnsafeCell<SchedState>,
    cpus: [UnsafeCell<Cpu>; NCPU],
    fs_ready: Once<()>,
}

// All shared mutable state is reached only under `lock` (or, for the
// per-CPU records, with interrupts disabled on the owning CPU).
unsafe impl<H: Hal + Sync> Sync for Scheduler<H> {}
unsafe impl<H: Hal + Send> Send for Scheduler<H> {}

impl<H: Hal> Scheduler<H> {
    pub fn new(hal: H) -> Self {
        Self {
            hal,
            lock: SpinLock::new("ptable"),
            state: UnsafeCell::new(SchedState::new()),
            cpus: [(); NCPU].map(|_| UnsafeCell::new(Cpu::new())),
            fs_ready: Once::new(),
        }
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    // ── Interrupt-disable nesting ───────────────────────────────────

    pub(crate) fn push_cli(&self) {
        let was_enabled = self.hal.interrupts_enabled();
        self.hal.disable_interrupts();
        let cpu = self.mycpu();
        if cpu.ncli == 0 {
            cpu.intena = was_enabled;
        }
        cpu.ncli += 1;
    }

    pub(crate) fn pop_cli(&self) {
        if self.hal.interrupts_enabled() {
            panic!("pop_cli: interruptible");
        }
        let cpu = self.mycpu();
        if cpu.ncli == 0 {
            panic!("pop_cli: unbalanced");
        }
        cpu.ncli -= 1;
        if cpu.ncli == 0 && cpu.intena {
            self.hal.enable_interrupts();
        }
    }

    /// This CPU's record. Interrupts must be disabled so the caller
    /// cannot migrate mid-access; only the owning CPU ever touches
    /// its record, which is what makes the `&mut` sound.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn mycpu(&self) -> &mut Cpu {
        if self.hal.interrupts_enabled() {
            panic!("mycpu: interrupts enabled");
        }
        unsafe { &mut *self.cpus[self.hal.cpu_id()].get() }
    }

    // ── Table lock ──────────────────────────────────────────────────

    /// Acquire the table lock and hand out the state. The returned
    /// borrow is only valid until [`Scheduler::unlock_table`]; callers
    /// must not keep two of these alive at once.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn lock_table(&self) -> &mut SchedState {
        self.push_cli();
        self.lock.acquire(self.hal.cpu_id());
        unsafe { &mut *self.state.get() }
    }

    pub(crate) fn unlock_table(&self) {
        self.lock.release(self.hal.cpu_id());
        self.pop_cli();
    }

    /// Does this CPU hold the table lock? Interrupts must be off.
    pub(crate) fn holding_table(&self) -> bool {
        self.lock.holding(self.hal.cpu_id())
    }

    /// State access for a caller that already holds the lock (after a
    /// context switch handed it over, for instance).
    ///
    /// # Safety
    /// The executing CPU must hold the table lock.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn table_unchecked(&self) -> &mut SchedState {
        &mut *self.state.get()
    }

    pub(crate) fn table_lock(&self) -> &SpinLock {
        &self.lock
    }

    // ── Current process ─────────────────────────────────────────────

    /// Table index of the process running on this CPU, if any.
    pub fn current(&self) -> Option<usize> {
        self.push_cli();
        let p = self.mycpu().proc;
        self.pop_cli();
        p
    }

    /// Pid of the current process, for diagnostics.
    pub fn current_pid(&self) -> Option<Pid> {
        let idx = self.current()?;
        let st = self.lock_table();
        let pid = st.procs[idx].pid;
        self.unlock_table();
        Some(pid)
    }

    /// Has someone killed the current process? The trap path polls
    /// this on the way back to user mode and exits if set.
    pub fn current_killed(&self) -> bool {
        let Some(idx) = self.current() else {
            return false;
        };
        let st = self.lock_table();
        let killed = st.procs[idx].killed;
        self.unlock_table();
        killed
    }

    // ── First-run glue ──────────────────────────────────────────────

    /// Called by the embedder's bootstrap stub when a new thread runs
    /// for the first time: the dispatcher switched in with the table
    /// lock held, and it is this thread's job to release it. The
    /// first process also brings up the filesystem here, since that
    /// may sleep and therefore cannot run at boot.
    pub fn finish_bootstrap(&self) {
        self.unlock_table();
        self.fs_ready.call_once(|| self.hal.fs_init());
    }

    // ── Test access ─────────────────────────────────────────────────

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SchedState) -> R) -> R {
        let st = self.lock_table();
        let r = f(st);
        self.unlock_table();
        r
    }

    #[cfg(test)]
    pub(crate) fn set_current_for_test(&self, p: Option<usize>) {
        self.push_cli();
        self.mycpu().proc = p;
        self.pop_cli();
    }

    /// Clear lock and nesting state after a test deliberately
    /// abandoned an execution mid-switch.
    #[cfg(test)]
    pub(crate) fn reset_lock_for_test(&self) {
        let cpu = self.hal.cpu_id();
        if self.lock.holding(cpu) {
            self.lock.release(cpu);
        }
        unsafe {
            let c = &mut *self.cpus[cpu].get();
            c.ncli = 0;
            c.intena = false;
        }
        self.hal.enable_interrupts();
    }
}

/// Stable address of a process slot, used as its sleep channel.
pub(crate) fn proc_chan(st: &SchedState, idx: usize) -> usize {
    &st.procs[idx] as *const Process as usize
}

/// Disjoint mutable borrows of two table slots.
pub(crate) fn pair_mut(procs: &mut [Process], a: usize, b: usize) -> (&mut Process, &mut Process) {
    debug_assert!(a != b);
    if a < b {
        let (left, right) = procs.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = procs.split_at_mut(a);
        let pa = &mut right[0];
        (pa, &mut left[b])
    }
}
