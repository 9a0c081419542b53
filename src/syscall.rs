//! System-call surface
//!
//! Thin integer wrappers over the scheduler operations: every
//! recoverable error becomes -1, success is 0 or a meaningful
//! non-negative value. The embedding kernel's syscall dispatch calls
//! these after marshalling arguments out of the trap frame.

use log::warn;

use crate::error::SchedError;
use crate::hal::Hal;
use crate::proc::{Pid, Tid};
use crate::sched::Scheduler;

fn errno(op: &'static str, e: SchedError) -> i64 {
    if e.should_log() {
        warn!("{}: {}", op, e);
    }
    e.errno()
}

impl<H: Hal> Scheduler<H> {
    pub fn sys_fork(&self) -> i64 {
        match self.fork() {
            Ok(pid) => pid as i64,
            Err(e) => errno("fork", e),
        }
    }

    pub fn sys_exit(&self) -> ! {
        self.exit()
    }

    pub fn sys_wait(&self) -> i64 {
        match self.wait() {
            Ok(pid) => pid as i64,
            Err(e) => e.errno(),
        }
    }

    pub fn sys_kill(&self, pid: Pid) -> i64 {
        match self.kill(pid) {
            Ok(()) => 0,
            Err(e) => e.errno(),
        }
    }

    pub fn sys_yield(&self) -> i64 {
        self.yield_now();
        0
    }

    /// Current MLFQ level, or -1 for a stride participant (and for a
    /// CPU with no process, which only happens during boot).
    pub fn sys_getlev(&self) -> i64 {
        self.getlev()
    }

    pub fn sys_set_cpu_share(&self, percent: i64) -> i64 {
        match self.set_cpu_share(percent) {
            Ok(()) => 0,
            Err(e) => errno("set_cpu_share", e),
        }
    }

    /// Grow user memory by `n` bytes; returns the old size, which is
    /// the base of the new region.
    pub fn sys_sbrk(&self, n: i64) -> i64 {
        match self.grow_user_memory(n) {
            Ok(old) => old as i64,
            Err(e) => errno("sbrk", e),
        }
    }

    pub fn sys_thread_create(&self, tid_out: &mut Tid, start: usize, arg: usize) -> i64 {
        match self.thread_create(start, arg) {
            Ok(tid) => {
                *tid_out = tid;
                0
            }
            Err(e) => errno("thread_create", e),
        }
    }

    pub fn sys_thread_exit(&self, retval: usize) -> ! {
        self.thread_exit(retval)
    }

    pub fn sys_thread_join(&self, tid: Tid, retval_out: &mut usize) -> i64 {
        match self.thread_join(tid) {
            Ok(retval) => {
                *retval_out = retval;
                0
            }
            Err(e) => e.errno(),
        }
    }
}
