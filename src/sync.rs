//! Spinlock primitive
//!
//! A raw spinlock with explicit `acquire`/`release`/`holding`, not an
//! RAII guard: the scheduler lock is passed, held, across context
//! switches — the dispatcher acquires it and the resumed thread
//! releases it — which no scope-bound guard can express. Interrupt
//! discipline (disable on acquire, restore on final release) is
//! layered on top by [`crate::Scheduler`] through the per-CPU cli
//! nesting counter.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// No CPU holds the lock.
const NO_OWNER: usize = usize::MAX;

pub struct SpinLock {
    name: &'static str,
    locked: AtomicBool,
    /// CPU index of the holder, [`NO_OWNER`] when free.
    owner: AtomicUsize,
}

impl SpinLock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    /// Spin until the lock is held by `cpu`. Interrupts must already
    /// be disabled by the caller.
    pub fn acquire(&self, cpu: usize) {
        if self.holding(cpu) {
            panic!("spinlock {}: reacquired on cpu {}", self.name, cpu);
        }
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        self.owner.store(cpu, Ordering::Relaxed);
    }

    /// Release the lock from `cpu`.
    pub fn release(&self, cpu: usize) {
        if !self.holding(cpu) {
            panic!("spinlock {}: released while not held by cpu {}", self.name, cpu);
        }
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }

    /// Whether `cpu` currently holds the lock.
    pub fn holding(&self, cpu: usize) -> bool {
        self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == cpu
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
