//! Test fixtures
//!
//! A heap-backed [`MockHal`] with a virtual clock and scripted context
//! switches, plus table builders shared by the unit tests.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::hal::{AddrSpace, Context, FileRef, Hal, InodeRef};
use crate::params::{MLFQ_QUANTUM, NPROC, PGSIZE, STRIDE_QUANTUM};
use crate::proc::{Placement, ProcState, Process, ThreadState};
use crate::sched::stride::StrideOwner;
use crate::sched::{Mlfq, Scheduler};

/// Panic payload thrown by a scripted context switch that never
/// returns (exit paths).
pub struct SwitchAway;

pub struct MockHal {
    int_enabled: AtomicBool,
    ticks: AtomicU64,

    pages: spin::Mutex<BTreeMap<usize, Box<[u8]>>>,
    pages_allocated: AtomicUsize,
    pages_freed: AtomicUsize,
    fail_pages: AtomicBool,

    next_aspace: AtomicUsize,
    aspaces_freed: AtomicUsize,
    fail_copy: AtomicBool,

    switches: AtomicUsize,
    escape: AtomicBool,
    preempt: AtomicBool,
    by_quantum: AtomicBool,
    auto_advance: AtomicU64,
    sched_ptr: AtomicUsize,

    user_vm_switches: AtomicUsize,
    trap_kstack_sets: AtomicUsize,
    user_writes: spin::Mutex<Vec<(usize, Vec<usize>)>>,

    record_sleepers: AtomicBool,
    sleepers: spin::Mutex<Vec<(usize, usize)>>,

    files_closed: AtomicUsize,
    inodes_put: AtomicUsize,
    fs_op_depth: AtomicUsize,
    fs_inited: AtomicBool,
}

impl MockHal {
    pub fn new() -> Self {
        Self {
            int_enabled: AtomicBool::new(true),
            ticks: AtomicU64::new(0),
            pages: spin::Mutex::new(BTreeMap::new()),
            pages_allocated: AtomicUsize::new(0),
            pages_freed: AtomicUsize::new(0),
            fail_pages: AtomicBool::new(false),
            next_aspace: AtomicUsize::new(1),
            aspaces_freed: AtomicUsize::new(0),
            fail_copy: AtomicBool::new(false),
            switches: AtomicUsize::new(0),
            escape: AtomicBool::new(false),
            preempt: AtomicBool::new(false),
            by_quantum: AtomicBool::new(false),
            auto_advance: AtomicU64::new(0),
            sched_ptr: AtomicUsize::new(0),
            user_vm_switches: AtomicUsize::new(0),
            trap_kstack_sets: AtomicUsize::new(0),
            user_writes: spin::Mutex::new(Vec::new()),
            record_sleepers: AtomicBool::new(false),
            sleepers: spin::Mutex::new(Vec::new()),
            files_closed: AtomicUsize::new(0),
            inodes_put: AtomicUsize::new(0),
            fs_op_depth: AtomicUsize::new(0),
            fs_inited: AtomicBool::new(false),
        }
    }

    // ── Scripting ───────────────────────────────────────────────────

    /// Point the mock back at its scheduler so scripted switches can
    /// inspect and preempt the running thread.
    pub fn attach(&self, sched: &Scheduler<MockHal>) {
        self.sched_ptr
            .store(sched as *const Scheduler<MockHal> as usize, Ordering::SeqCst);
    }

    /// Emulate timer preemption: every switched-to thread is handed
    /// back RUNNABLE.
    pub fn preempt_on_switch(&self, on: bool) {
        self.preempt.store(on, Ordering::SeqCst);
    }

    /// Advance the clock by a fixed amount per switch.
    pub fn auto_advance(&self, ticks: u64) {
        self.by_quantum.store(false, Ordering::SeqCst);
        self.auto_advance.store(ticks, Ordering::SeqCst);
    }

    /// Advance the clock by the running thread's full quantum per
    /// switch, the way the timer interrupt would pace real slices.
    pub fn advance_by_quantum(&self, on: bool) {
        self.by_quantum.store(on, Ordering::SeqCst);
    }

    pub fn record_sleepers_on_switch(&self, on: bool) {
        self.record_sleepers.store(on, Ordering::SeqCst);
    }

    pub fn set_escape(&self, on: bool) {
        self.escape.store(on, Ordering::SeqCst);
    }

    pub fn advance(&self, n: u64) {
        self.ticks.fetch_add(n, Ordering::SeqCst);
    }

    pub fn set_ticks(&self, n: u64) {
        self.ticks.store(n, Ordering::SeqCst);
    }

    pub fn fail_page_allocs(&self, on: bool) {
        self.fail_pages.store(on, Ordering::SeqCst);
    }

    pub fn fail_aspace_copy(&self, on: bool) {
        self.fail_copy.store(on, Ordering::SeqCst);
    }

    // ── Observations ────────────────────────────────────────────────

    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }

    pub fn pages_allocated(&self) -> usize {
        self.pages_allocated.load(Ordering::SeqCst)
    }

    pub fn pages_freed(&self) -> usize {
        self.pages_freed.load(Ordering::SeqCst)
    }

    pub fn aspaces_freed(&self) -> usize {
        self.aspaces_freed.load(Ordering::SeqCst)
    }

    pub fn files_closed(&self) -> usize {
        self.files_closed.load(Ordering::SeqCst)
    }

    pub fn inodes_put(&self) -> usize {
        self.inodes_put.load(Ordering::SeqCst)
    }

    pub fn user_vm_switches(&self) -> usize {
        self.user_vm_switches.load(Ordering::SeqCst)
    }

    pub fn trap_kstack_sets(&self) -> usize {
        self.trap_kstack_sets.load(Ordering::SeqCst)
    }

    pub fn user_writes(&self) -> Vec<(usize, Vec<usize>)> {
        self.user_writes.lock().clone()
    }

    pub fn sleepers_seen(&self) -> Vec<(usize, usize)> {
        self.sleepers.lock().clone()
    }

    pub fn fs_inited(&self) -> bool {
        self.fs_inited.load(Ordering::SeqCst)
    }

    pub fn fs_op_depth(&self) -> usize {
        self.fs_op_depth.load(Ordering::SeqCst)
    }

    /// Run the scripted parts of a context switch that need the
    /// scheduler state. The table lock is held by whoever initiated
    /// the switch, which is what makes the access sound.
    fn scripted_switch(&self) {
        let sched = self.sched_ptr.load(Ordering::SeqCst) as *const Scheduler<MockHal>;
        if sched.is_null() {
            self.advance(self.auto_advance.load(Ordering::SeqCst));
            return;
        }
        let st = unsafe { (*sched).table_unchecked() };

        if self.record_sleepers.load(Ordering::SeqCst) {
            let mut sleepers = self.sleepers.lock();
            for (pi, p) in st.procs.iter().enumerate() {
                for t in p.threads.iter() {
                    if t.state == ThreadState::Sleeping && t.chan != 0 {
                        sleepers.push((pi, t.chan));
                    }
                }
            }
        }

        if self.by_quantum.load(Ordering::SeqCst) {
            let running = st.procs.iter().find(|p| {
                p.state == ProcState::Runnable
                    && p.threads.iter().any(|t| t.state == ThreadState::Running)
            });
            let q = match running.map(|p| p.sched.placement) {
                Some(Placement::Stride { .. }) => STRIDE_QUANTUM,
                Some(Placement::Mlfq { level, .. }) => MLFQ_QUANTUM[level],
                _ => 1,
            };
            self.advance(q);
        } else {
            self.advance(self.auto_advance.load(Ordering::SeqCst));
        }

        if self.preempt.load(Ordering::SeqCst) {
            for p in st.procs.iter_mut() {
                for t in p.threads.iter_mut() {
                    if t.state == ThreadState::Running {
                        t.state = ThreadState::Runnable;
                    }
                }
            }
        }
    }
}

impl Hal for MockHal {
    fn cpu_id(&self) -> usize {
        0
    }

    fn interrupts_enabled(&self) -> bool {
        self.int_enabled.load(Ordering::SeqCst)
    }

    fn enable_interrupts(&self) {
        self.int_enabled.store(true, Ordering::SeqCst);
    }

    fn disable_interrupts(&self) {
        self.int_enabled.store(false, Ordering::SeqCst);
    }

    fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    unsafe fn context_switch(&self, _from: *mut Context, _to: *const Context) {
        self.switches.fetch_add(1, Ordering::SeqCst);
        if self.escape.load(Ordering::SeqCst) {
            std::panic::panic_any(SwitchAway);
        }
        self.scripted_switch();
    }

    fn alloc_page(&self) -> usize {
        if self.fail_pages.load(Ordering::SeqCst) {
            return 0;
        }
        let page = vec![0u8; PGSIZE].into_boxed_slice();
        let base = page.as_ptr() as usize;
        self.pages.lock().insert(base, page);
        self.pages_allocated.fetch_add(1, Ordering::SeqCst);
        base
    }

    fn free_page(&self, base: usize) {
        self.pages
            .lock()
            .remove(&base)
            .expect("free_page: not allocated (double free?)");
        self.pages_freed.fetch_add(1, Ordering::SeqCst);
    }

    fn create_address_space(&self) -> Option<AddrSpace> {
        Some(AddrSpace(self.next_aspace.fetch_add(1, Ordering::SeqCst)))
    }

    fn copy_address_space(&self, _src: AddrSpace, _sz: usize) -> Option<AddrSpace> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return None;
        }
        self.create_address_space()
    }

    fn grow_address_space(&self, _a: AddrSpace, _old: usize, new: usize) -> Option<usize> {
        Some(new)
    }

    fn free_address_space(&self, _a: AddrSpace) {
        self.aspaces_freed.fetch_add(1, Ordering::SeqCst);
    }

    fn init_user_image(&self, _a: AddrSpace) -> usize {
        PGSIZE
    }

    fn write_user(&self, _a: AddrSpace, addr: usize, words: &[usize]) -> bool {
        self.user_writes.lock().push((addr, words.to_vec()));
        true
    }

    fn switch_user_vm(&self, _a: AddrSpace, _kstack_top: usize) {
        self.user_vm_switches.fetch_add(1, Ordering::SeqCst);
    }

    fn switch_kernel_vm(&self) {}

    fn set_trap_kstack(&self, _kstack_top: usize) {
        self.trap_kstack_sets.fetch_add(1, Ordering::SeqCst);
    }

    fn trap_return_addr(&self) -> usize {
        0x1000
    }

    fn bootstrap_addr(&self) -> usize {
        0x2000
    }

    fn user_thread_exit_addr(&self) -> usize {
        0x3000
    }

    fn fs_init(&self) {
        self.fs_inited.store(true, Ordering::SeqCst);
    }

    fn file_dup(&self, f: FileRef) -> FileRef {
        f
    }

    fn file_close(&self, _f: FileRef) {
        self.files_closed.fetch_add(1, Ordering::SeqCst);
    }

    fn inode_dup(&self, i: InodeRef) -> InodeRef {
        i
    }

    fn inode_put(&self, _i: InodeRef) {
        self.inodes_put.fetch_add(1, Ordering::SeqCst);
    }

    fn begin_fs_op(&self) {
        self.fs_op_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn end_fs_op(&self) {
        self.fs_op_depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn root_inode(&self) -> InodeRef {
        InodeRef(1)
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn sched_with_mock() -> Scheduler<MockHal> {
    Scheduler::new(MockHal::new())
}

/// Bare table for policy-level tests.
pub fn proc_table() -> Vec<Process> {
    (0..NPROC).map(|_| Process::unused()).collect()
}

/// Mark a bare-table slot as a runnable process with one runnable
/// thread.
pub fn with_runnable(procs: &mut [Process], pidx: usize) {
    procs[pidx].pid = 100 + pidx as u64;
    procs[pidx].state = ProcState::Runnable;
    procs[pidx].tidx = 0;
    procs[pidx].threads[0].state = ThreadState::Runnable;
    procs[pidx].threads[0].tid = 500 + pidx as u64;
}

/// Install a runnable process into a live scheduler's table.
pub fn install_runnable(s: &Scheduler<MockHal>) -> usize {
    s.with_state(|st| {
        let pidx = st
            .procs
            .iter()
            .position(|p| p.state == ProcState::Unused)
            .expect("table full");
        let pid = st.next_pid;
        st.next_pid += 1;
        let tid = st.next_tid;
        st.next_tid += 1;

        let p = &mut st.procs[pidx];
        p.pid = pid;
        p.state = ProcState::Runnable;
        p.tidx = 0;
        p.threads[0].tid = tid;
        p.threads[0].state = ThreadState::Runnable;
        pidx
    })
}

/// Every placement must point back at its process.
pub fn check_placement(procs: &[Process], q: &Mlfq) {
    for (i, p) in procs.iter().enumerate() {
        match p.sched.placement {
            Placement::Mlfq { level, index } => {
                assert_eq!(q.slot(level, index), Some(i), "mlfq slot mismatch for {}", i);
            }
            Placement::Stride { index } => {
                assert_eq!(q.stride.owner(index), StrideOwner::Proc(i));
                assert!(q.stride.ticket(index) > 0);
            }
            Placement::Detached => {}
        }
    }
}

/// Run `f`, expecting it to leave through a context switch that never
/// returns (exit paths). Cleans the lock state up afterwards so the
/// test can keep inspecting the table.
pub fn expect_switch_away(s: &Scheduler<MockHal>, f: impl FnOnce()) {
    s.hal().set_escape(true);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    s.hal().set_escape(false);
    match result {
        Err(payload) if payload.is::<SwitchAway>() => {}
        Err(payload) => std::panic::resume_unwind(payload),
        Ok(()) => panic!("expected the call to switch away and never return"),
    }
    s.reset_lock_for_test();
}
