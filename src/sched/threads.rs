//! Kernel thread facility
//!
//! Multiple threads per process, sharing its address space. Kernel
//! and user stacks are cached per thread index: a slot released by
//! `thread_join` keeps both stacks attached to the process, and the
//! next create at that index reuses them instead of allocating.

use log::debug;

use crate::error::{SchedError, SchedResult};
use crate::hal::Hal;
use crate::params::{NPROC, NTHREAD, PGSIZE};
use crate::proc::{ProcState, ThreadState, Tid};
use crate::sched::suspend::wakeup_locked;
use crate::sched::Scheduler;

/// Round up to the next page boundary.
fn pg_round_up(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

impl<H: Hal> Scheduler<H> {
    /// Create a thread in the current process, running `start(arg)`
    /// in user mode. Returns the new tid.
    pub fn thread_create(&self, start: usize, arg: usize) -> SchedResult<Tid> {
        let cur = self.current().expect("thread_create: no current process");

        let st = self.lock_table();

        let Some(tslot) = st.procs[cur]
            .threads
            .iter()
            .position(|t| t.state == ThreadState::Unused)
        else {
            self.unlock_table();
            return Err(SchedError::OutOfSlots { table: "thread", capacity: NTHREAD });
        };

        let tid = st.next_tid;
        st.next_tid += 1;

        let p = &mut st.procs[cur];
        let caller_tidx = p.tidx;
        p.threads[tslot].state = ThreadState::Embryo;
        p.threads[tslot].tid = tid;

        // Kernel stack: reuse the one cached at this index, or take a
        // fresh page.
        if p.kstacks[tslot] == 0 {
            let kstack = self.hal.alloc_page();
            if kstack == 0 {
                p.threads[tslot].clear();
                self.unlock_table();
                return Err(SchedError::OutOfMemory { what: "kernel stack" });
            }
            p.kstacks[tslot] = kstack;
        }

        let kstack = p.kstacks[tslot];
        let (trap_ret, bootstrap) = (self.hal.trap_return_addr(), self.hal.bootstrap_addr());
        // Safety: the page belongs to this slot.
        unsafe {
            p.threads[tslot].prime(kstack, trap_ret, bootstrap);
            // Inherit segment registers and flags from the creator.
            *p.threads[tslot].tf = *p.threads[caller_tidx].tf;
        }

        // User stack: cached at this index, or one fresh page on top
        // of the address space.
        let aspace = p.aspace.expect("thread_create: no address space");
        let ustack_top = if p.ustacks[tslot] != 0 {
            p.ustacks[tslot]
        } else {
            let old = pg_round_up(p.sz);
            let Some(sz) = self.hal.grow_address_space(aspace, old, old + PGSIZE) else {
                // The kernel stack stays cached for the next create.
                p.threads[tslot].clear();
                self.unlock_table();
                return Err(SchedError::OutOfMemory { what: "user stack" });
            };
            p.sz = sz;
            p.ustacks[tslot] = sz;
            sz
        };

        // Seed the stack: the start routine's argument, below it a
        // return address pointing at the user-mode exit helper. The
        // helper issues the thread-exit syscall; a thread cannot
        // reach kernel teardown by merely returning.
        let word = core::mem::size_of::<usize>();
        let sp = ustack_top - 2 * word;
        if !self
            .hal
            .write_user(aspace, sp, &[self.hal.user_thread_exit_addr(), arg])
        {
            p.threads[tslot].clear();
            self.unlock_table();
            return Err(SchedError::OutOfMemory { what: "user stack" });
        }

        unsafe {
            (*p.threads[tslot].tf).sp = sp;
            (*p.threads[tslot].tf).ip = start;
        }

        p.threads[tslot].retval = 0;
        p.threads[tslot].state = ThreadState::Runnable;
        st.stats.threads_created += 1;
        self.unlock_table();

        debug!("thread: created tid {} in slot {}", tid, tslot);
        Ok(tid)
    }

    /// Terminate the current thread with `retval` for its joiner.
    pub fn thread_exit(&self, retval: usize) -> ! {
        let cur = self.current().expect("thread_exit: no current process");

        let st = self.lock_table();
        let t = st.procs[cur].current_thread_mut();
        t.retval = retval;
        let tid = t.tid;
        t.state = ThreadState::Zombie;

        // Someone may be joining on our tid.
        wakeup_locked(st, tid as usize);

        self.sched_switch();
        panic!("thread_exit: resumed a zombie");
    }

    /// Wait for thread `tid` to finish and collect its return value.
    /// The finished slot is released; its stacks stay cached at the
    /// same index.
    pub fn thread_join(&self, tid: Tid) -> SchedResult<usize> {
        let st = self.lock_table();

        let mut found = None;
        'search: for pi in 0..NPROC {
            if st.procs[pi].state != ProcState::Runnable {
                continue;
            }
            for ti in 0..NTHREAD {
                if st.procs[pi].threads[ti].tid == tid {
                    found = Some((pi, ti));
                    break 'search;
                }
            }
        }
        let Some((pi, ti)) = found else {
            self.unlock_table();
            return Err(SchedError::NotFound { what: "thread", id: tid });
        };

        if st.procs[pi].threads[ti].state != ThreadState::Zombie {
            self.sleep(tid as usize, self.table_lock());
        }

        let t = &mut st.procs[pi].threads[ti];
        let retval = t.retval;
        t.clear();

        self.unlock_table();
        Ok(retval)
    }

    /// Switch to the next runnable thread of the current process
    /// without leaving its address space: only the trap kernel-stack
    /// slot is repointed. Falls through to the CPU scheduler when no
    /// peer is runnable and the current thread cannot continue.
    pub fn next_thread(&self) {
        let st = self.lock_table();
        let cur = self.mycpu().proc.expect("next_thread: no current process");

        let p = &mut st.procs[cur];
        let from_tidx = p.tidx;

        let mut target = None;
        for off in 1..NTHREAD {
            let i = (from_tidx + off) % NTHREAD;
            if p.threads[i].state.is_runnable() {
                target = Some(i);
                break;
            }
        }

        match target {
            Some(i) => {
                p.threads[from_tidx].state = ThreadState::Runnable;
                p.threads[i].state = ThreadState::Running;
                p.tidx = i;
                self.hal.set_trap_kstack(p.threads[i].kstack_top());

                let from = p.threads[from_tidx].context;
                let to = p.threads[i].context;
                let cpu = self.mycpu();
                let intena = cpu.intena;
                unsafe { self.hal.context_switch(from, to) };
                self.mycpu().intena = intena;
            }
            None => {
                if p.current_thread().state != ThreadState::Running {
                    self.sched_switch();
                }
            }
        }

        self.unlock_table();
    }
}
