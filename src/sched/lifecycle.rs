//! Process lifecycle
//!
//! Allocation, the first process, fork, exit, wait, kill, sbrk and
//! CPU-share reservation. Every recoverable failure rolls the slot
//! back to UNUSED before surfacing.

use log::{debug, info, warn};

use crate::error::{SchedError, SchedResult};
use crate::hal::{Hal, TrapFrame};
use crate::params::{NPROC, NTHREAD};
use crate::proc::{Pid, ProcState, ThreadState};
use crate::sched::suspend::wakeup_locked;
use crate::sched::{pair_mut, proc_chan, SchedState, Scheduler};

impl<H: Hal> Scheduler<H> {
    /// Claim an UNUSED slot: process and thread 0 in EMBRYO, a fresh
    /// kernel stack primed to resume in the bootstrap glue, and a seat
    /// in MLFQ level 0.
    pub(crate) fn alloc_process(&self) -> SchedResult<usize> {
        let st = self.lock_table();

        let Some(pidx) = st.procs.iter().position(|p| p.state == ProcState::Unused) else {
            self.unlock_table();
            return Err(SchedError::OutOfSlots { table: "process", capacity: NPROC });
        };

        let pid = st.next_pid;
        st.next_pid += 1;
        let tid = st.next_tid;
        st.next_tid += 1;

        let p = &mut st.procs[pidx];
        p.state = ProcState::Embryo;
        p.pid = pid;
        p.tidx = 0;
        p.killed = false;
        p.parent = None;
        p.kstacks = [0; NTHREAD];
        p.ustacks = [0; NTHREAD];
        p.threads[0].state = ThreadState::Embryo;
        p.threads[0].tid = tid;

        let SchedState { procs, mlfq, .. } = st;
        mlfq.append(procs, pidx, 0)
            .expect("mlfq: no level-0 slot for a fresh process");
        self.unlock_table();

        // The page allocator may take its own locks; call it outside
        // ours. EMBRYO keeps the slot reserved meanwhile.
        let kstack = self.hal.alloc_page();

        let st = self.lock_table();
        if kstack == 0 {
            let SchedState { procs, mlfq, .. } = st;
            mlfq.remove(procs, pidx);
            procs[pidx].threads[0].clear();
            procs[pidx].pid = 0;
            procs[pidx].state = ProcState::Unused;
            self.unlock_table();
            return Err(SchedError::OutOfMemory { what: "kernel stack" });
        }

        st.procs[pidx].kstacks[0] = kstack;
        let (trap_ret, bootstrap) = (self.hal.trap_return_addr(), self.hal.bootstrap_addr());
        // Safety: the page was just allocated for this slot.
        unsafe { st.procs[pidx].threads[0].prime(kstack, trap_ret, bootstrap) };
        self.unlock_table();

        debug!("proc: allocated pid {} in slot {}", pid, pidx);
        Ok(pidx)
    }

    /// Set up the first user process. Fatal on failure: nothing can
    /// run without init.
    pub fn user_init(&self) -> usize {
        let pidx = self
            .alloc_process()
            .expect("user_init: no process slot at boot");

        let aspace = self
            .hal
            .create_address_space()
            .expect("user_init: out of memory");
        let sz = self.hal.init_user_image(aspace);
        let root = self.hal.root_inode();

        let st = self.lock_table();
        st.init_idx = Some(pidx);
        let p = &mut st.procs[pidx];
        p.aspace = Some(aspace);
        p.sz = sz;
        p.name.clear();
        p.name.push_str("initcode");
        p.cwd = Some(root);

        // User registers: start of the image, stack at the top of it.
        let t = &mut p.threads[0];
        unsafe {
            *t.tf = TrapFrame { ip: 0, sp: sz, ..TrapFrame::zeroed() };
        }
        t.state = ThreadState::Runnable;

        p.state = ProcState::Runnable;
        self.unlock_table();

        info!("proc: init is pid 1");
        pidx
    }

    /// Duplicate the current process. The child starts with a single
    /// thread whose trap frame is a copy of the caller's, so both
    /// return from the same syscall; the child's return value is 0.
    pub fn fork(&self) -> SchedResult<Pid> {
        let cur = self.current().expect("fork: no current process");

        let child = self.alloc_process()?;

        let st = self.lock_table();
        let parent_aspace = st.procs[cur].aspace.expect("fork: parent has no address space");
        let parent_sz = st.procs[cur].sz;
        self.unlock_table();

        let Some(aspace) = self.hal.copy_address_space(parent_aspace, parent_sz) else {
            // Roll the embryo back to UNUSED.
            let st = self.lock_table();
            let kstack = st.procs[child].kstacks[0];
            let SchedState { procs, mlfq, .. } = st;
            mlfq.remove(procs, child);
            procs[child].threads[0].clear();
            procs[child].kstacks[0] = 0;
            procs[child].pid = 0;
            procs[child].state = ProcState::Unused;
            self.unlock_table();
            self.hal.free_page(kstack);
            return Err(SchedError::OutOfMemory { what: "address space" });
        };

        let st = self.lock_table();
        let (parent, np) = pair_mut(&mut st.procs, cur, child);

        np.aspace = Some(aspace);
        np.sz = parent_sz;
        np.parent = Some(cur);
        np.tidx = 0;

        // The child inherits the whole user-stack pool; its thread 0
        // must own the stack the parent is executing on, so the pool
        // entries at index 0 and the parent's running index swap.
        np.ustacks = parent.ustacks;
        np.ustacks.swap(0, parent.tidx);

        unsafe {
            *np.threads[0].tf = *parent.threads[parent.tidx].tf;
            (*np.threads[0].tf).ret = 0;
        }

        for (slot, f) in parent.ofile.iter().enumerate() {
            if let Some(f) = f {
                np.ofile[slot] = Some(self.hal.file_dup(*f));
            }
        }
        np.cwd = parent.cwd.map(|i| self.hal.inode_dup(i));
        np.name = parent.name.clone();

        let pid = np.pid;
        np.state = ProcState::Runnable;
        np.threads[0].state = ThreadState::Runnable;
        st.stats.forks += 1;
        self.unlock_table();

        debug!("proc: fork -> pid {}", pid);
        Ok(pid)
    }

    /// Terminate the current process. Does not return; the slot stays
    /// ZOMBIE until the parent reaps it.
    pub fn exit(&self) -> ! {
        let cur = self.current().expect("exit: no current process");

        let st = self.lock_table();
        if st.init_idx == Some(cur) {
            panic!("init exiting");
        }
        let mut files = [None; crate::params::NOFILE];
        for (slot, f) in st.procs[cur].ofile.iter_mut().enumerate() {
            files[slot] = f.take();
        }
        let cwd = st.procs[cur].cwd.take();
        self.unlock_table();

        // File teardown can sleep; do it outside the table lock.
        for f in files.into_iter().flatten() {
            self.hal.file_close(f);
        }
        if let Some(cwd) = cwd {
            self.hal.begin_fs_op();
            self.hal.inode_put(cwd);
            self.hal.end_fs_op();
        }

        let st = self.lock_table();

        // Parent might be sleeping in wait().
        if let Some(parent) = st.procs[cur].parent {
            let chan = proc_chan(st, parent);
            wakeup_locked(st, chan);
        }

        // Orphans go to init; if one is already dead, init has a
        // zombie to reap right now.
        let init = st.init_idx.expect("exit: init not running");
        let init_chan = proc_chan(st, init);
        for i in 0..NPROC {
            if st.procs[i].parent == Some(cur) {
                st.procs[i].parent = Some(init);
                if st.procs[i].state == ProcState::Zombie {
                    wakeup_locked(st, init_chan);
                }
            }
        }

        let p = &mut st.procs[cur];
        p.state = ProcState::Zombie;
        for t in p.threads.iter_mut() {
            if t.state.is_allocated() {
                t.state = ThreadState::Zombie;
            }
        }

        self.sched_switch();
        panic!("zombie exit");
    }

    /// Block until a child exits, then reap it: free its kernel
    /// stacks and address space, detach it from the scheduler and
    /// release the slot. Returns the child's pid.
    pub fn wait(&self) -> SchedResult<Pid> {
        let cur = self.current().expect("wait: no current process");

        let st = self.lock_table();
        loop {
            let mut have_kids = false;
            let mut zombie = None;
            for i in 0..NPROC {
                if st.procs[i].parent != Some(cur) {
                    continue;
                }
                have_kids = true;
                if st.procs[i].state == ProcState::Zombie {
                    zombie = Some(i);
                    break;
                }
            }

            if let Some(ci) = zombie {
                let pid = st.procs[ci].pid;
                for off in 0..NTHREAD {
                    if st.procs[ci].kstacks[off] != 0 {
                        self.hal.free_page(st.procs[ci].kstacks[off]);
                        st.procs[ci].kstacks[off] = 0;
                        st.procs[ci].ustacks[off] = 0;
                    }
                    st.procs[ci].threads[off].clear();
                }
                if let Some(a) = st.procs[ci].aspace.take() {
                    self.hal.free_address_space(a);
                }
                st.procs[ci].pid = 0;
                st.procs[ci].parent = None;
                st.procs[ci].name.clear();
                st.procs[ci].killed = false;
                st.procs[ci].state = ProcState::Unused;

                let SchedState { procs, mlfq, .. } = st;
                mlfq.remove(procs, ci);
                self.unlock_table();
                debug!("proc: reaped pid {}", pid);
                return Ok(pid);
            }

            if !have_kids || st.procs[cur].killed {
                let pid = st.procs[cur].pid;
                self.unlock_table();
                return Err(SchedError::NotFound { what: "child", id: pid });
            }

            // Wait for an exit(); the child wakes us on our slot.
            let chan = proc_chan(st, cur);
            self.sleep(chan, self.table_lock());
        }
    }

    /// Flag a process as killed and wake its sleepers so it can reach
    /// user mode and exit.
    pub fn kill(&self, pid: Pid) -> SchedResult<()> {
        let st = self.lock_table();
        for p in st.procs.iter_mut() {
            if p.state == ProcState::Unused || p.pid != pid {
                continue;
            }
            p.killed = true;
            for t in p.threads.iter_mut() {
                if t.state == ThreadState::Sleeping {
                    t.state = ThreadState::Runnable;
                }
            }
            self.unlock_table();
            warn!("proc: pid {} killed", pid);
            return Ok(());
        }
        self.unlock_table();
        Err(SchedError::NotFound { what: "process", id: pid })
    }

    /// Grow (or shrink, for negative `n`) the current process's user
    /// memory. Returns the old size, the base of the fresh region.
    pub fn grow_user_memory(&self, n: i64) -> SchedResult<usize> {
        let cur = self.current().expect("sbrk: no current process");

        let st = self.lock_table();
        let aspace = st.procs[cur].aspace.expect("sbrk: no address space");
        let old = st.procs[cur].sz;
        let kstack_top = st.procs[cur].current_thread().kstack_top();
        self.unlock_table();

        let new = old as i64 + n;
        if new < 0 {
            return Err(SchedError::OutOfMemory { what: "user memory" });
        }
        let Some(sz) = self.hal.grow_address_space(aspace, old, new as usize) else {
            return Err(SchedError::OutOfMemory { what: "user memory" });
        };

        let st = self.lock_table();
        st.procs[cur].sz = sz;
        self.unlock_table();

        // Mappings changed; reload them.
        self.hal.switch_user_vm(aspace, kstack_top);
        Ok(old)
    }

    /// Reserve `percent` of the CPU for the current process, moving it
    /// from the MLFQ into the stride scheduler.
    pub fn set_cpu_share(&self, percent: i64) -> SchedResult<()> {
        let cur = self.current().expect("set_cpu_share: no current process");

        let st = self.lock_table();
        if percent <= 0 {
            let err = SchedError::ShareRefused {
                requested: 0,
                reserved: st.mlfq.stride.reserved(),
                max: crate::params::MAXSTRIDE,
            };
            self.unlock_table();
            return Err(err);
        }

        let SchedState { procs, mlfq, .. } = st;
        let res = mlfq.cpu_share(procs, cur, percent as u64);
        self.unlock_table();
        res
    }

    /// Current MLFQ level of the calling process, or -1 when it is
    /// stride-scheduled.
    pub fn getlev(&self) -> i64 {
        let Some(cur) = self.current() else {
            return -1;
        };
        let st = self.lock_table();
        let lev = st.procs[cur].level();
        self.unlock_table();
        lev
    }
}
