//! Hardware abstraction layer
//!
//! The scheduler never touches hardware directly. The embedding kernel
//! implements [`Hal`] with its real context-switch primitive, VM
//! operations, tick counter and trap plumbing; the unit tests implement
//! it with heap pages and a virtual clock. Address spaces, files and
//! inodes cross the boundary as opaque handles whose meaning lives
//! entirely on the HAL side.

/// Opaque handle to a user address space (page directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrSpace(pub usize);

/// Opaque handle to an open file object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef(pub usize);

/// Opaque handle to an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRef(pub usize);

/// Saved registers for kernel context switches.
///
/// Arch-neutral: a resume point, a stack pointer and a callee-saved
/// bank. The real layout is whatever the embedder's switch stub
/// expects; the scheduler only primes `ip`/`sp` and zeroes the rest.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    /// Resume point.
    pub ip: usize,
    /// Kernel stack pointer at switch time.
    pub sp: usize,
    /// Callee-saved register bank.
    pub saved: [usize; 12],
}

impl Context {
    pub const fn zeroed() -> Self {
        Self { ip: 0, sp: 0, saved: [0; 12] }
    }
}

/// Per-thread trap frame, saved at the top of the thread's kernel
/// stack on entry from user mode.
///
/// `ret` is the register a syscall result lands in; `cs`/`ds` stand in
/// for whatever segment or mode bits the architecture carries so that
/// a new thread can inherit them from its creator.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    /// User instruction pointer.
    pub ip: usize,
    /// User stack pointer.
    pub sp: usize,
    /// Syscall return-value register.
    pub ret: usize,
    /// User flags.
    pub flags: usize,
    /// Code segment / mode bits.
    pub cs: usize,
    /// Data segment / mode bits.
    pub ds: usize,
}

impl TrapFrame {
    pub const fn zeroed() -> Self {
        Self { ip: 0, sp: 0, ret: 0, flags: 0, cs: 0, ds: 0 }
    }
}

/// Collaborator interface consumed by the scheduler.
///
/// Implementations must be cheap to call: everything here runs under
/// the scheduler lock with interrupts disabled unless noted otherwise.
pub trait Hal {
    // ── CPU and interrupts ──────────────────────────────────────────

    /// Index of the executing CPU. Must only be called with
    /// interrupts disabled, or the caller may migrate mid-read.
    fn cpu_id(&self) -> usize;

    fn interrupts_enabled(&self) -> bool;
    fn enable_interrupts(&self);
    fn disable_interrupts(&self);

    // ── Clock ───────────────────────────────────────────────────────

    /// Monotonic tick counter driven by the timer interrupt.
    fn ticks(&self) -> u64;

    // ── Context switch ──────────────────────────────────────────────

    /// Save the current register state into `from` and resume `to`.
    ///
    /// # Safety
    /// Both pointers must reference live, correctly primed contexts;
    /// the call returns only when something switches back into `from`.
    unsafe fn context_switch(&self, from: *mut Context, to: *const Context);

    // ── Physical pages ──────────────────────────────────────────────

    /// Allocate one kernel page. Returns its base address, or 0 when
    /// memory is exhausted.
    fn alloc_page(&self) -> usize;

    /// Return a page previously handed out by [`Hal::alloc_page`].
    fn free_page(&self, base: usize);

    // ── Address spaces ──────────────────────────────────────────────

    /// Fresh address space with only the kernel mappings.
    fn create_address_space(&self) -> Option<AddrSpace>;

    /// Duplicate `src` up to `sz` bytes of user memory.
    fn copy_address_space(&self, src: AddrSpace, sz: usize) -> Option<AddrSpace>;

    /// Grow (`new > old`) or shrink (`new < old`) user memory.
    /// Returns the resulting size, or `None` on failure.
    fn grow_address_space(&self, a: AddrSpace, old: usize, new: usize) -> Option<usize>;

    fn free_address_space(&self, a: AddrSpace);

    /// Load the initial user image into a fresh address space and
    /// return its size in bytes.
    fn init_user_image(&self, a: AddrSpace) -> usize;

    /// Write machine words into user memory at `addr`. Returns false
    /// if the range is not mapped writable.
    fn write_user(&self, a: AddrSpace, addr: usize, words: &[usize]) -> bool;

    // ── VM switching ────────────────────────────────────────────────

    /// Switch to a process: load its page directory and point the
    /// privilege-escalation stack at `kstack_top`.
    fn switch_user_vm(&self, a: AddrSpace, kstack_top: usize);

    /// Switch back to the bare kernel page directory.
    fn switch_kernel_vm(&self);

    /// Repoint only the privilege-escalation stack, leaving the page
    /// directory alone. Used when switching threads within a process.
    fn set_trap_kstack(&self, kstack_top: usize);

    // ── Trap plumbing ───────────────────────────────────────────────

    /// Address of the stub that restores a trap frame and returns to
    /// user mode. Primed as the return slot above a new context.
    fn trap_return_addr(&self) -> usize;

    /// Address of the glue that a freshly created thread resumes in.
    /// That glue must call [`crate::Scheduler::finish_bootstrap`]
    /// before falling into the trap-return stub.
    fn bootstrap_addr(&self) -> usize;

    /// User-mode helper a thread's start routine returns into; it
    /// issues the thread-exit syscall.
    fn user_thread_exit_addr(&self) -> usize;

    /// One-time filesystem initialization, run from the context of the
    /// first process (it may sleep, so it cannot run at boot).
    fn fs_init(&self);

    // ── File and inode handles ──────────────────────────────────────

    fn file_dup(&self, f: FileRef) -> FileRef;
    fn file_close(&self, f: FileRef);
    fn inode_dup(&self, i: InodeRef) -> InodeRef;
    fn inode_put(&self, i: InodeRef);

    /// Bracket for filesystem operations that must be journaled.
    fn begin_fs_op(&self);
    fn end_fs_op(&self);

    /// Inode of the filesystem root, cwd of the first process.
    fn root_inode(&self) -> InodeRef;
}
