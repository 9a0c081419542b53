//! Scheduler error handling
//!
//! Typed errors for every recoverable failure of the subsystem. All of
//! them surface as `-1` at the syscall boundary; anything that cannot
//! be recovered (lock discipline broken, boost overflow, init exiting)
//! panics with a diagnostic instead of becoming a value here.

use core::fmt;

/// Recoverable scheduler errors with context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// No free process or thread slot.
    OutOfSlots { table: &'static str, capacity: usize },

    /// A stack or address-space allocation failed. Partially
    /// initialized state has been rolled back to UNUSED.
    OutOfMemory { what: &'static str },

    /// A CPU-share reservation was refused: non-positive request, no
    /// free stride slot, or the reserved total would exceed the cap.
    ShareRefused { requested: u64, reserved: u64, max: u64 },

    /// The target of `kill` or `thread_join` does not exist.
    NotFound { what: &'static str, id: u64 },
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSlots { table, capacity } => {
                write!(f, "{} table full ({} slots)", table, capacity)
            }
            Self::OutOfMemory { what } => {
                write!(f, "out of memory allocating {}", what)
            }
            Self::ShareRefused { requested, reserved, max } => {
                write!(
                    f,
                    "cpu share refused: requested {} with {} reserved, cap {}",
                    requested, reserved, max
                )
            }
            Self::NotFound { what, id } => {
                write!(f, "{} {} not found", what, id)
            }
        }
    }
}

impl SchedError {
    /// Integer result delivered to userspace for this error.
    pub fn errno(&self) -> i64 {
        -1
    }

    /// Whether the failure is worth a log line. Join races against a
    /// finished thread are routine and stay quiet.
    pub fn should_log(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;
