//! Lifecycle state machines
//!
//! A process is runnable by the dispatcher iff at least one of its
//! threads is RUNNABLE; RUNNING and SLEEPING exist only at thread
//! granularity.

use core::fmt;

/// Process slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcState {
    /// Free slot.
    #[default]
    Unused,
    /// Allocated, not yet exposed to the dispatcher.
    Embryo,
    /// Visible to the dispatcher (threads carry the fine state).
    Runnable,
    /// Exited, waiting for the parent to reap it.
    Zombie,
}

/// Thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadState {
    /// Free slot.
    #[default]
    Unused,
    /// Has a tid and a kernel stack, not yet runnable.
    Embryo,
    Runnable,
    Running,
    Sleeping,
    /// Exited, waiting for a joiner or process teardown.
    Zombie,
}

impl ThreadState {
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Runnable)
    }

    /// Occupies its slot (everything but UNUSED).
    pub fn is_allocated(self) -> bool {
        !matches!(self, Self::Unused)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unused => "unused",
            Self::Embryo => "embryo",
            Self::Runnable => "runble",
            Self::Running => "run",
            Self::Sleeping => "sleep",
            Self::Zombie => "zombie",
        };
        f.write_str(s)
    }
}

/// Legal thread state transitions. Consulted from debug assertions;
/// an illegal edge in release builds is a logic bug upstream, not
/// something to recover from.
pub fn validate_transition(from: ThreadState, to: ThreadState) -> bool {
    use ThreadState::*;

    matches!(
        (from, to),
        (Unused, Embryo)
            | (Embryo, Runnable)
            | (Embryo, Zombie)
            | (Embryo, Unused)
            | (Runnable, Running)
            | (Runnable, Zombie)
            | (Running, Runnable)
            | (Running, Sleeping)
            | (Running, Zombie)
            | (Sleeping, Runnable)
            | (Sleeping, Zombie)
            | (Zombie, Unused)
    )
}
