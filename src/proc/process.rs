//! Process control block

use alloc::string::String;

use crate::hal::{AddrSpace, FileRef, InodeRef};
use crate::params::{NOFILE, NTHREAD};
use crate::proc::{state::ProcState, thread::Thread, Pid};

/// Where the dispatcher finds a process.
///
/// An allocated process sits in exactly one MLFQ slot or one stride
/// slot; `Detached` is the resting state of an UNUSED slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    #[default]
    Detached,
    Mlfq { level: usize, index: usize },
    Stride { index: usize },
}

/// Per-process scheduling record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedInfo {
    pub placement: Placement,

    /// Ticks consumed at the current MLFQ level, towards demotion.
    pub elapsed: u64,

    /// Tick at which the current slice started.
    pub start: u64,
}

pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub state: ProcState,

    /// User address space, shared by all threads.
    pub aspace: Option<AddrSpace>,

    /// Size of user memory in bytes.
    pub sz: usize,

    /// Parent slot index. Back-reference only, never ownership.
    pub parent: Option<usize>,

    /// Set by `kill`; honored when the process next reaches user mode.
    pub killed: bool,

    pub threads: [Thread; NTHREAD],

    /// Kernel-stack bases cached per thread index, 0 when none.
    /// Valid until the process is reaped.
    pub kstacks: [usize; NTHREAD],

    /// User-stack tops cached per thread index, 0 when none.
    pub ustacks: [usize; NTHREAD],

    /// Index of the thread currently on the CPU.
    pub tidx: usize,

    pub ofile: [Option<FileRef>; NOFILE],
    pub cwd: Option<InodeRef>,

    pub sched: SchedInfo,
}

impl Process {
    pub fn unused() -> Self {
        Self {
            pid: 0,
            name: String::new(),
            state: ProcState::Unused,
            aspace: None,
            sz: 0,
            parent: None,
            killed: false,
            threads: [Thread::UNUSED; NTHREAD],
            kstacks: [0; NTHREAD],
            ustacks: [0; NTHREAD],
            tidx: 0,
            ofile: [None; NOFILE],
            cwd: None,
            sched: SchedInfo::default(),
        }
    }

    /// Index of the first RUNNABLE thread, if any. A process is
    /// runnable by the dispatcher iff this returns `Some`.
    pub fn first_runnable(&self) -> Option<usize> {
        self.threads.iter().position(|t| t.state.is_runnable())
    }

    pub fn current_thread(&self) -> &Thread {
        &self.threads[self.tidx]
    }

    pub fn current_thread_mut(&mut self) -> &mut Thread {
        &mut self.threads[self.tidx]
    }

    /// MLFQ level exposed to userspace: 0..NMLFQ-1, or -1 for a
    /// stride participant.
    pub fn level(&self) -> i64 {
        match self.sched.placement {
            Placement::Mlfq { level, .. } => level as i64,
            _ => -1,
        }
    }
}
