//! Stride meta-scheduler
//!
//! Proportional-share selection over up to `NPROC` participants.
//! Slot 0 is the MLFQ aggregate: it starts with the whole ticket
//! supply, and every share reservation moves tickets from it into a
//! fresh slot. Picking slot 0 means "defer to the MLFQ".
//!
//! Pass values are Q32.32 fixed point so no floating-point state has
//! to be saved at scheduling boundaries.

use log::{debug, info};

use crate::error::{SchedError, SchedResult};
use crate::params::{
    MAXPASS, MAXSTRIDE, MAXTICKET, NPROC, PASS_FRAC_BITS, SCALEPASS, STRIDE_QUANTUM,
};
use crate::proc::{Placement, Process};

/// The reserved MLFQ-aggregate slot.
pub const MLFQ_SLOT: usize = 0;

/// Accumulated virtual time, Q32.32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Pass(pub u64);

impl Pass {
    /// One slice worth of virtual time for a participant holding
    /// `ticket` tickets.
    fn stride(ticket: u64) -> u64 {
        (MAXTICKET << PASS_FRAC_BITS) / ticket
    }
}

/// Who owns a stride slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrideOwner {
    #[default]
    Free,
    /// The MLFQ as a single aggregate participant.
    MlfqPool,
    /// A share-reserving process, by table index.
    Proc(usize),
}

/// Selection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StridePick {
    /// Slot 0 won: ask the MLFQ for a concrete process.
    Mlfq,
    Proc { pidx: usize, tidx: usize },
}

pub struct Stride {
    ticket: [u64; NPROC],
    pass: [Pass; NPROC],
    owner: [StrideOwner; NPROC],

    /// Tickets reserved by processes (slots above 0).
    total: u64,
}

impl Stride {
    pub fn new() -> Self {
        let mut s = Self {
            ticket: [0; NPROC],
            pass: [Pass(0); NPROC],
            owner: [StrideOwner::Free; NPROC],
            total: 0,
        };
        s.ticket[MLFQ_SLOT] = MAXTICKET;
        s.owner[MLFQ_SLOT] = StrideOwner::MlfqPool;
        s
    }

    /// Tickets reserved by processes.
    pub fn reserved(&self) -> u64 {
        self.total
    }

    /// Tickets left with the MLFQ aggregate.
    pub fn pool_ticket(&self) -> u64 {
        self.ticket[MLFQ_SLOT]
    }

    pub fn owner(&self, slot: usize) -> StrideOwner {
        self.owner[slot]
    }

    pub fn ticket(&self, slot: usize) -> u64 {
        self.ticket[slot]
    }

    /// Raw Q32.32 pass value of a slot, for introspection.
    pub fn pass_raw(&self, slot: usize) -> u64 {
        self.pass[slot].0
    }

    /// Admit a process with `usage` tickets moved out of the MLFQ
    /// aggregate. Seeds its pass at the current minimum so it neither
    /// starves the others nor starts in arrears.
    pub fn append(&mut self, procs: &mut [Process], pidx: usize, usage: u64) -> SchedResult<usize> {
        if usage == 0 || self.total + usage > MAXSTRIDE {
            return Err(SchedError::ShareRefused {
                requested: usage,
                reserved: self.total,
                max: MAXSTRIDE,
            });
        }

        let slot = self
            .owner
            .iter()
            .position(|o| *o == StrideOwner::Free)
            .ok_or(SchedError::OutOfSlots { table: "stride", capacity: NPROC })?;

        let seed = self.min_pass();
        self.owner[slot] = StrideOwner::Proc(pidx);
        self.total += usage;
        self.ticket[MLFQ_SLOT] -= usage;
        self.ticket[slot] = usage;
        self.pass[slot] = seed;

        procs[pidx].sched.placement = Placement::Stride { index: slot };

        info!(
            "stride: admitted pid {} with {} tickets (slot {}, {} reserved)",
            procs[pidx].pid, usage, slot, self.total
        );
        Ok(slot)
    }

    /// Release a slot, returning its tickets to the MLFQ aggregate.
    pub fn remove(&mut self, slot: usize) {
        let usage = self.ticket[slot];
        self.total -= usage;
        self.ticket[MLFQ_SLOT] += usage;

        self.ticket[slot] = 0;
        self.pass[slot] = Pass(0);
        self.owner[slot] = StrideOwner::Free;

        debug!("stride: slot {} released, {} tickets back to the pool", slot, usage);
    }

    /// Account a completed slice of `len` ticks to `slot`, in
    /// stride-quantum units (minimum one, so even an instant yield is
    /// charged). Rescales every active pass when the updated value
    /// would leave the working range.
    pub fn update(&mut self, slot: usize, len: u64) {
        let units = ((len + STRIDE_QUANTUM - 1) / STRIDE_QUANTUM).max(1);
        self.pass[slot].0 += units * Pass::stride(self.ticket[slot]);

        if self.pass[slot].0 > MAXPASS {
            for (pass, owner) in self.pass.iter_mut().zip(self.owner.iter()) {
                if *owner != StrideOwner::Free {
                    pass.0 = pass.0.saturating_sub(MAXPASS - SCALEPASS);
                }
            }
        }
    }

    /// Pick the active, runnable slot with the smallest pass. The
    /// MLFQ aggregate participates unconditionally; ties go to the
    /// lower slot index, so the aggregate wins a tie with anyone.
    pub fn next(&self, procs: &[Process]) -> StridePick {
        let mut best = MLFQ_SLOT;
        let mut best_tidx = 0;

        for slot in MLFQ_SLOT + 1..NPROC {
            if let StrideOwner::Proc(pidx) = self.owner[slot] {
                if let Some(tidx) = procs[pidx].first_runnable() {
                    if self.pass[slot] < self.pass[best] {
                        best = slot;
                        best_tidx = tidx;
                    }
                }
            }
        }

        match self.owner[best] {
            StrideOwner::Proc(pidx) => StridePick::Proc { pidx, tidx: best_tidx },
            _ => StridePick::Mlfq,
        }
    }

    fn min_pass(&self) -> Pass {
        let mut min = self.pass[MLFQ_SLOT];
        for (pass, owner) in self.pass.iter().zip(self.owner.iter()).skip(1) {
            if *owner != StrideOwner::Free && *pass < min {
                min = *pass;
            }
        }
        min
    }

    /// Sum over every slot, the aggregate included. Always equals
    /// `MAXTICKET`.
    #[cfg(test)]
    fn ticket_sum(&self) -> u64 {
        self.ticket.iter().sum()
    }
}

impl Default for Stride {
    fn default() -> Self {
        Self::new()
    }
}
