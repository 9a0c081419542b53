//! Multi-level feedback queue
//!
//! Three priority levels with per-level quanta, demotion once a
//! level's run-time budget is spent, and a periodic boost that lifts
//! everything back to the top. The embedded [`Stride`] meta-scheduler
//! arbitrates between the whole queue (as one aggregate participant)
//! and share-reserving processes.

use log::{debug, trace};

use crate::error::{SchedError, SchedResult};
use crate::params::{MLFQ_EXPIRE, MLFQ_QUANTUM, NMLFQ, NPROC, STRIDE_QUANTUM};
use crate::proc::{Placement, ProcState, Process};
use crate::sched::stride::{Stride, MLFQ_SLOT};

/// Post-slice verdict: keep running the same process, or pick anew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    Keep,
    Next,
}

pub struct Mlfq {
    /// One fixed-size slot array per level, holding table indices.
    queue: [[Option<usize>; NPROC]; NMLFQ],

    /// Per-level round-robin cursor: index of the last slot a
    /// selection was served from. Persists across invocations.
    cursor: [usize; NMLFQ],

    /// The meta-scheduler partitioning CPU between this queue and the
    /// share reservations.
    pub stride: Stride,
}

impl Mlfq {
    pub fn new() -> Self {
        Self {
            queue: [[None; NPROC]; NMLFQ],
            cursor: [0; NMLFQ],
            stride: Stride::new(),
        }
    }

    /// Admit a process at `level`, in the first free slot.
    pub fn append(&mut self, procs: &mut [Process], pidx: usize, level: usize) -> SchedResult<()> {
        let index = self.queue[level]
            .iter()
            .position(|s| s.is_none())
            .ok_or(SchedError::OutOfSlots { table: "mlfq", capacity: NPROC })?;

        self.queue[level][index] = Some(pidx);
        procs[pidx].sched.placement = Placement::Mlfq { level, index };
        procs[pidx].sched.elapsed = 0;
        Ok(())
    }

    /// Detach a process from whichever scheduler holds it.
    pub fn remove(&mut self, procs: &mut [Process], pidx: usize) {
        match procs[pidx].sched.placement {
            Placement::Mlfq { level, index } => self.queue[level][index] = None,
            Placement::Stride { index } => self.stride.remove(index),
            Placement::Detached => {}
        }
        procs[pidx].sched.placement = Placement::Detached;
    }

    /// Move a process from the queue into the stride scheduler with
    /// `usage` tickets. Only queue residents can reserve a share.
    pub fn cpu_share(&mut self, procs: &mut [Process], pidx: usize, usage: u64) -> SchedResult<()> {
        let Placement::Mlfq { level, index } = procs[pidx].sched.placement else {
            return Err(SchedError::ShareRefused {
                requested: usage,
                reserved: self.stride.reserved(),
                max: crate::params::MAXSTRIDE,
            });
        };

        self.stride.append(procs, pidx, usage)?;
        self.queue[level][index] = None;
        Ok(())
    }

    /// Select the next process: scan each level circularly from its
    /// cursor for the first entry with a runnable thread, top level
    /// first. Advances the winning level's cursor past the choice.
    pub fn next(&mut self, procs: &[Process]) -> Option<(usize, usize)> {
        for level in 0..NMLFQ {
            let start = self.cursor[level];
            for off in 1..=NPROC {
                let slot = (start + off) % NPROC;
                let Some(pidx) = self.queue[level][slot] else {
                    continue;
                };
                if let Some(tidx) = procs[pidx].first_runnable() {
                    self.cursor[level] = slot;
                    trace!("mlfq: picked pid {} at level {}", procs[pidx].pid, level);
                    return Some((pidx, tidx));
                }
            }
        }
        None
    }

    /// Account a completed slice ending at tick `now` and decide
    /// whether the dispatcher may keep the process.
    pub fn update(&mut self, procs: &mut [Process], pidx: usize, now: u64) -> Slice {
        // A dead process is detached by wait(); nothing to account.
        if procs[pidx].state == ProcState::Zombie || procs[pidx].killed {
            return Slice::Next;
        }

        let slice_len = now.saturating_sub(procs[pidx].sched.start);
        match procs[pidx].sched.placement {
            Placement::Stride { index } => {
                self.stride.update(index, slice_len);
                Slice::Next
            }
            Placement::Mlfq { level, index } => {
                // The aggregate accrues virtual time whenever one of
                // its members ran.
                self.stride.update(MLFQ_SLOT, slice_len);

                if level + 1 < NMLFQ && procs[pidx].sched.elapsed >= MLFQ_EXPIRE[level] {
                    self.queue[level][index] = None;
                    if self.append(procs, pidx, level + 1).is_err() {
                        panic!("mlfq: demotion found no slot at level {}", level + 1);
                    }
                    debug!("mlfq: pid {} demoted to level {}", procs[pidx].pid, level + 1);
                    return Slice::Next;
                }

                if now - procs[pidx].sched.start >= MLFQ_QUANTUM[level] {
                    Slice::Next
                } else {
                    Slice::Keep
                }
            }
            Placement::Detached => Slice::Next,
        }
    }

    /// Lift every process below the top back to level 0, preserving
    /// allocation order and resetting demotion progress.
    pub fn boost(&mut self, procs: &mut [Process]) {
        let mut top = 0;
        for level in 1..NMLFQ {
            for slot in 0..NPROC {
                let Some(pidx) = self.queue[level][slot] else {
                    continue;
                };

                let dest = loop {
                    if top == NPROC {
                        // Cannot happen while the table holds at most
                        // NPROC processes; a full top level here means
                        // the queues are corrupted.
                        panic!("mlfq boost: no free slot at the top level");
                    }
                    if self.queue[0][top].is_none() {
                        break top;
                    }
                    top += 1;
                };

                self.queue[0][dest] = Some(pidx);
                self.queue[level][slot] = None;
                procs[pidx].sched.placement = Placement::Mlfq { level: 0, index: dest };
                procs[pidx].sched.elapsed = 0;
                top = dest + 1;
            }
        }
        debug!("mlfq: boost complete");
    }

    /// Should the timer interrupt force a reschedule of `p`?
    pub fn yieldable(&self, p: &Process, now: u64) -> bool {
        let dur = now - p.sched.start;
        match p.sched.placement {
            Placement::Stride { .. } => dur >= STRIDE_QUANTUM,
            Placement::Mlfq { level, .. } => dur >= MLFQ_QUANTUM[level],
            Placement::Detached => true,
        }
    }

    /// Occupant of a queue slot, for introspection.
    pub fn slot(&self, level: usize, index: usize) -> Option<usize> {
        self.queue[level][index]
    }

    /// Occupied slots at `level`, for introspection.
    pub fn level_len(&self, level: usize) -> usize {
        self.queue[level].iter().filter(|s| s.is_some()).count()
    }

    /// Occupants of `level` in slot order, for introspection.
    pub fn level_members(&self, level: usize) -> impl Iterator<Item = usize> + '_ {
        self.queue[level].iter().filter_map(|s| *s)
    }
}

impl Default for Mlfq {
    fn default() -> Self {
        Self::new()
    }
}
