//! Suspension points
//!
//! `sched_switch` is the single doorway between a thread and the
//! dispatcher; `yield_now`, `sleep` and `wakeup` are built on it.
//! Every caller must hold the table lock with cli nesting exactly 1.

use core::ptr;

use crate::hal::Hal;
use crate::proc::{validate_transition, ThreadState};
use crate::sched::{SchedState, Scheduler};
use crate::sync::SpinLock;

impl<H: Hal> Scheduler<H> {
    /// Switch from the current thread into this CPU's dispatcher.
    /// Returns when the dispatcher later switches back. The table
    /// lock is held on entry and on return; it travels with the CPU,
    /// not with the thread.
    pub(crate) fn sched_switch(&self) {
        if !self.holding_table() {
            panic!("sched: table lock not held");
        }
        let cpu = self.mycpu();
        if cpu.ncli != 1 {
            panic!("sched: cli nesting {}", cpu.ncli);
        }
        if self.hal.interrupts_enabled() {
            panic!("sched: interruptible");
        }

        let pidx = cpu.proc.expect("sched: no current process");
        // Safety: lock held, checked above.
        let st = unsafe { self.table_unchecked() };
        let t = st.procs[pidx].current_thread();
        if t.state == ThreadState::Running {
            panic!("sched: thread still running");
        }

        let intena = cpu.intena;
        let from = t.context;
        let to = &cpu.scheduler_ctx as *const _;
        unsafe { self.hal.context_switch(from, to) };
        // intena belongs to this kernel thread, not to the CPU we
        // happen to resume on.
        self.mycpu().intena = intena;
    }

    /// Give up the CPU for one scheduling round.
    pub fn yield_now(&self) {
        let st = self.lock_table();
        let pidx = self.mycpu().proc.expect("yield: no current process");
        let t = st.procs[pidx].current_thread_mut();
        debug_assert!(validate_transition(t.state, ThreadState::Runnable));
        t.state = ThreadState::Runnable;
        self.sched_switch();
        self.unlock_table();
    }

    /// Atomically release `lk` and sleep on `chan`; reacquires `lk`
    /// before returning. Holding the table lock while flipping the
    /// thread to SLEEPING is what guarantees no wakeup is lost.
    pub fn sleep(&self, chan: usize, lk: &SpinLock) {
        let pidx = self.current().expect("sleep: no current process");

        let table = self.table_lock();
        let external = !ptr::eq(lk, table);
        if external {
            self.lock_table();
            lk.release(self.hal.cpu_id());
            self.pop_cli();
        }

        // Safety: table lock held either way.
        let st = unsafe { self.table_unchecked() };
        let t = st.procs[pidx].current_thread_mut();
        t.chan = chan;
        debug_assert!(validate_transition(t.state, ThreadState::Sleeping));
        t.state = ThreadState::Sleeping;

        self.sched_switch();

        // Tidy up.
        let st = unsafe { self.table_unchecked() };
        st.procs[pidx].current_thread_mut().chan = 0;

        if external {
            self.unlock_table();
            self.push_cli();
            lk.acquire(self.hal.cpu_id());
        }
    }

    /// Wake every thread sleeping on `chan`.
    pub fn wakeup(&self, chan: usize) {
        let st = self.lock_table();
        wakeup_locked(st, chan);
        self.unlock_table();
    }
}

/// Promote every SLEEPING thread of every RUNNABLE process whose
/// channel matches. Caller holds the table lock.
pub(crate) fn wakeup_locked(st: &mut SchedState, chan: usize) {
    for p in st.procs.iter_mut() {
        if p.state != crate::proc::ProcState::Runnable {
            continue;
        }
        for t in p.threads.iter_mut() {
            if t.state == ThreadState::Sleeping && t.chan == chan {
                t.state = ThreadState::Runnable;
            }
        }
    }
}
