//! Per-CPU dispatch loop
//!
//! Each CPU runs [`Scheduler::run`]: consult the stride meta-scheduler,
//! fall through to the MLFQ when the aggregate wins, switch into the
//! chosen thread, and on the way back attribute the elapsed ticks and
//! take the demotion/boost decisions.

use log::trace;

use crate::hal::Hal;
use crate::params::BOOST_INTERVAL;
use crate::proc::{validate_transition, ThreadState};
use crate::sched::mlfq::Slice;
use crate::sched::stride::{StridePick, MLFQ_SLOT};
use crate::sched::{SchedState, Scheduler};

/// Dispatcher-local state, one per CPU loop.
pub struct DispatchState {
    /// Verdict of the last accounting round.
    keep: Slice,

    /// Process served by the previous slice.
    prev: Option<usize>,

    /// Tick boundary of the next priority boost.
    next_boost: u64,
}

impl DispatchState {
    pub fn new(now: u64) -> Self {
        Self {
            keep: Slice::Next,
            prev: None,
            next_boost: now + BOOST_INTERVAL,
        }
    }

    /// Process served by the previous slice, if any.
    pub fn prev(&self) -> Option<usize> {
        self.prev
    }
}

impl<H: Hal> Scheduler<H> {
    /// The dispatcher loop. Never returns; each CPU enters it once
    /// after boot.
    pub fn run(&self) -> ! {
        let mut d = DispatchState::new(self.hal.ticks());
        loop {
            self.dispatch_once(&mut d);
        }
    }

    /// One dispatcher iteration: pick, switch, account.
    pub fn dispatch_once(&self, d: &mut DispatchState) {
        // Let at least one interrupt through per iteration, or an
        // idle system could never wake anything up.
        self.hal.enable_interrupts();

        let st = self.lock_table();
        st.stats.dispatches += 1;

        match self.pick(st, d) {
            None => {
                // Nothing runnable: the aggregate still accrues
                // virtual time, or a long-idle MLFQ would bank an
                // arbitrary head start over stride participants.
                st.mlfq.stride.update(MLFQ_SLOT, 1);
                st.stats.idle_loops += 1;
                d.keep = Slice::Next;
                d.prev = None;
            }
            Some((pidx, tidx)) => {
                st.procs[pidx].tidx = tidx;
                self.run_slice(st, pidx, d);
            }
        }

        self.unlock_table();
    }

    /// Choose the next process and thread. A KEEP verdict pins the
    /// previous victim as long as its current thread stayed runnable.
    fn pick(&self, st: &mut SchedState, d: &DispatchState) -> Option<(usize, usize)> {
        if d.keep == Slice::Keep {
            if let Some(pidx) = d.prev {
                let p = &st.procs[pidx];
                if p.current_thread().state.is_runnable() {
                    return Some((pidx, p.tidx));
                }
            }
        }

        match st.mlfq.stride.next(&st.procs) {
            StridePick::Proc { pidx, tidx } => Some((pidx, tidx)),
            StridePick::Mlfq => st.mlfq.next(&st.procs),
        }
    }

    /// Switch into `pidx`'s current thread and account the slice when
    /// control comes back.
    fn run_slice(&self, st: &mut SchedState, pidx: usize, d: &mut DispatchState) {
        let cpu = self.mycpu();
        cpu.proc = Some(pidx);

        let start = self.hal.ticks();
        let (aspace, kstack_top, thread_ctx) = {
            let p = &mut st.procs[pidx];
            p.sched.start = start;
            let aspace = p.aspace;
            let t = p.current_thread_mut();
            debug_assert!(validate_transition(t.state, ThreadState::Running));
            t.state = ThreadState::Running;
            (aspace, t.kstack_top(), t.context)
        };

        if let Some(a) = aspace {
            self.hal.switch_user_vm(a, kstack_top);
        }
        st.stats.switches += 1;
        trace!("dispatch: slot {} at tick {}", pidx, start);

        // The lock travels with the CPU: the thread releases it on
        // its way out (bootstrap) and reacquires it before switching
        // back (sched_switch).
        unsafe {
            self.hal.context_switch(&mut cpu.scheduler_ctx, thread_ctx);
        }
        self.hal.switch_kernel_vm();

        let end = self.hal.ticks();
        let SchedState { procs, mlfq, stats, .. } = st;
        procs[pidx].sched.elapsed += end - start;
        d.keep = mlfq.update(procs, pidx, end);
        d.prev = Some(pidx);

        if end > d.next_boost {
            mlfq.boost(procs);
            stats.boosts += 1;
            d.next_boost += BOOST_INTERVAL;
        }

        self.mycpu().proc = None;
    }

    /// Timer-interrupt hook: force a reschedule once the current
    /// slice has used up its quantum.
    pub fn on_tick(&self) {
        let Some(cur) = self.current() else {
            return;
        };
        let st = self.lock_table();
        let yield_now = st.mlfq.yieldable(&st.procs[cur], self.hal.ticks());
        self.unlock_table();

        if yield_now {
            self.yield_now();
        }
    }
}
