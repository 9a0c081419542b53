//! Thread control block
//!
//! Each thread owns one kernel-stack page; its trap frame and saved
//! context are carved out of the top of that page, so the pointers
//! here always reference memory inside `kstack`.

use core::mem::size_of;
use core::ptr;

use crate::hal::{Context, TrapFrame};
use crate::params::KSTACKSIZE;
use crate::proc::{state::ThreadState, Tid};

#[derive(Debug, Clone, Copy)]
pub struct Thread {
    pub tid: Tid,
    pub state: ThreadState,

    /// Base of the kernel stack, 0 when none is attached.
    pub kstack: usize,

    /// Saved CPU context, inside the kernel stack.
    pub context: *mut Context,

    /// Trap frame, inside the kernel stack.
    pub tf: *mut TrapFrame,

    /// Sleep channel, 0 when not sleeping.
    pub chan: usize,

    /// Value handed to `thread_exit`, collected by `thread_join`.
    pub retval: usize,
}

impl Thread {
    pub const UNUSED: Thread = Thread {
        tid: 0,
        state: ThreadState::Unused,
        kstack: 0,
        context: ptr::null_mut(),
        tf: ptr::null_mut(),
        chan: 0,
        retval: 0,
    };

    /// Top of the kernel stack, the privilege-escalation entry point.
    pub fn kstack_top(&self) -> usize {
        self.kstack + KSTACKSIZE
    }

    /// Carve a trap frame and a saved context out of the kernel stack
    /// at `kstack_base` and prime the context to resume in the
    /// bootstrap glue, which falls through into the trap-return stub.
    ///
    /// Stack layout, from the top down: trap frame, then the
    /// trap-return address, then the context.
    ///
    /// # Safety
    /// `kstack_base` must point at `KSTACKSIZE` bytes of writable
    /// memory owned by this thread's slot.
    pub unsafe fn prime(&mut self, kstack_base: usize, trap_ret: usize, bootstrap: usize) {
        self.kstack = kstack_base;
        let mut sp = kstack_base + KSTACKSIZE;

        sp -= size_of::<TrapFrame>();
        self.tf = sp as *mut TrapFrame;
        ptr::write(self.tf, TrapFrame::zeroed());

        sp -= size_of::<usize>();
        ptr::write(sp as *mut usize, trap_ret);

        sp -= size_of::<Context>();
        self.context = sp as *mut Context;
        let mut ctx = Context::zeroed();
        ctx.ip = bootstrap;
        ctx.sp = sp;
        ptr::write(self.context, ctx);
    }

    /// Reset the slot to UNUSED. Does not release the kernel stack;
    /// stacks are cached per index by the owning process.
    pub fn clear(&mut self) {
        *self = Self::UNUSED;
    }
}
