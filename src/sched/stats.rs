//! Introspection
//!
//! Counters kept under the table lock, plus the debug dumps wired to
//! the console shortcut in the embedding kernel.

use log::info;

use crate::hal::Hal;
use crate::params::{NMLFQ, NPROC};
use crate::proc::ProcState;
use crate::sched::stride::StrideOwner;
use crate::sched::Scheduler;

/// Scheduler counters since boot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedStats {
    /// Dispatcher iterations.
    pub dispatches: u64,

    /// Context switches into a process.
    pub switches: u64,

    /// Iterations that found nothing runnable.
    pub idle_loops: u64,

    /// Priority boosts performed.
    pub boosts: u64,

    pub forks: u64,
    pub threads_created: u64,
}

impl<H: Hal> Scheduler<H> {
    /// Snapshot of the counters.
    pub fn stats(&self) -> SchedStats {
        let st = self.lock_table();
        let stats = st.stats;
        self.unlock_table();
        stats
    }

    /// Log one line per live process. Debugging aid; the embedding
    /// kernel wires it to a console shortcut.
    pub fn dump_processes(&self) {
        let st = self.lock_table();
        for p in st.procs.iter() {
            if p.state == ProcState::Unused {
                continue;
            }
            info!(
                "{} {} {} lev {}",
                p.pid,
                p.current_thread().state,
                p.name,
                p.level()
            );
        }
        self.unlock_table();
    }

    /// Log the scheduler structures: stride slots with their tickets
    /// and passes, then the occupancy of each MLFQ level.
    pub fn dump_scheduler(&self) {
        let st = self.lock_table();

        info!("tick {}", self.hal().ticks());
        for slot in 0..NPROC {
            match st.mlfq.stride.owner(slot) {
                StrideOwner::Free => {}
                StrideOwner::MlfqPool => info!(
                    "stride[{}]: mlfq pool, {} tickets, pass {:#x}",
                    slot,
                    st.mlfq.stride.ticket(slot),
                    st.mlfq.stride.pass_raw(slot)
                ),
                StrideOwner::Proc(pidx) => info!(
                    "stride[{}]: pid {}, {} tickets, pass {:#x}",
                    slot,
                    st.procs[pidx].pid,
                    st.mlfq.stride.ticket(slot),
                    st.mlfq.stride.pass_raw(slot)
                ),
            }
        }
        for level in 0..NMLFQ {
            info!("mlfq[{}]: {} resident", level, st.mlfq.level_len(level));
        }

        self.unlock_table();
    }
}
