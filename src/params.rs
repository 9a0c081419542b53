//! Tunable constants
//!
//! Every knob of the subsystem in one place, with the relations the
//! algorithms depend on pinned at compile time.

use static_assertions::const_assert;

/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Maximum number of threads per process.
pub const NTHREAD: usize = 8;

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Size of a user page.
pub const PGSIZE: usize = 4096;

/// Size of a per-thread kernel stack. One page: kernel stacks come
/// straight from the page allocator.
pub const KSTACKSIZE: usize = PGSIZE;

/// Number of MLFQ priority levels.
pub const NMLFQ: usize = 3;

/// Round-robin time quantum per MLFQ level, in ticks.
pub const MLFQ_QUANTUM: [u64; NMLFQ] = [5, 10, 20];

/// Cumulative run-time budget per MLFQ level before demotion, in ticks.
pub const MLFQ_EXPIRE: [u64; NMLFQ] = [20, 40, 200];

/// Priority boost period: every process returns to the top level this
/// often. Equal to the bottom level's demotion budget.
pub const BOOST_INTERVAL: u64 = MLFQ_EXPIRE[NMLFQ - 1];

/// Time quantum of a stride-scheduled process, in ticks.
pub const STRIDE_QUANTUM: u64 = 5;

/// Total scheduling weight. A share request moves this many tickets
/// per percentage point, so the full supply is 100.
pub const MAXTICKET: u64 = 100;

/// Maximum total weight reservable by stride processes. The remainder
/// always stays with the MLFQ aggregate so it keeps accruing time.
pub const MAXSTRIDE: u64 = 80;

/// Pass values are Q32.32 fixed point: 32 integer bits, 32 fractional
/// bits. The fractional part absorbs `MAXTICKET / ticket` divisions
/// without floating point at the scheduling boundary.
pub const PASS_FRAC_BITS: u32 = 32;

/// Upper bound on a pass value before rescaling, raw Q32.32.
pub const MAXPASS: u64 = 1 << 48;

/// Value the largest pass is brought back to by a rescale, raw Q32.32.
/// Active passes never differ by more than one maximal charge (a few
/// stride-quantum units of the largest stride), so subtracting
/// `MAXPASS - SCALEPASS` keeps every active pass positive and all
/// differences intact.
pub const SCALEPASS: u64 = 1 << 43;

const_assert!(MAXSTRIDE < MAXTICKET);
const_assert!(SCALEPASS < MAXPASS);
const_assert!(KSTACKSIZE == PGSIZE);
const_assert!((MAXTICKET << PASS_FRAC_BITS) * 8 < SCALEPASS);
