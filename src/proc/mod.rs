//! Process and thread data model
//!
//! Pure data: slots, state machines and the per-process scheduling
//! record. All mutation happens in `sched` under the table lock.

pub mod process;
pub mod state;
pub mod thread;

pub use process::{Placement, Process, SchedInfo};
pub use state::{validate_transition, ProcState, ThreadState};
pub use thread::Thread;

/// Process identifier. Monotonic, reused only after full teardown.
pub type Pid = u64;

/// Thread identifier. Monotonic across the whole system.
pub type Tid = u64;
