//! Error kinds for the arena and the fragment protocol.
//!
//! Recoverable failures are plain `Result` values. Invariant violations are
//! programming errors: they are reported through [`fatal`], which logs and
//! aborts the current thread of control.

use crate::wire::{BlockRef, WireError};

/// Pool capacity is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("segment pool exhausted ({capacity} segments in use)")]
    Exhausted { capacity: usize },
}

/// Section-level failures that the caller can act on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SectionError {
    #[error("write of {len} words at offset {offset} exceeds section size {size}")]
    OutOfRange { offset: usize, len: usize, size: usize },

    #[error("section records {recorded} segments but chain has {walked}")]
    SegmentCountMismatch { recorded: usize, walked: usize },

    #[error("section tail is segment {walked}, header says {recorded}")]
    TailMismatch { recorded: u32, walked: u32 },

    #[error("section chain references dead segment {0}")]
    DeadSegment(u32),

    #[error("destination holds {have} words, {need} required")]
    DestinationTooSmall { have: usize, need: usize },
}

/// Broken invariants. Never returned: see [`fatal`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("segment handle {index} out of range")]
    HandleOutOfRange { index: u32 },

    #[error("stale segment handle {index} (generation {generation})")]
    StaleHandle { index: u32, generation: u32 },

    #[error("release list of {count} segments from {head} did not end at {tail}")]
    ReleaseListMismatch { count: usize, head: u32, tail: u32 },

    #[error("pool capacity {0} must stay below RNIL")]
    CapacityTooLarge(usize),

    #[error("cannot splice onto a section of {len} words (not segment aligned)")]
    UnalignedSplice { len: usize },

    #[error("cannot split {keep} segments off a section of {segments}")]
    InvalidSplit { keep: usize, segments: usize },

    #[error("fragment assembly table full ({capacity} entries)")]
    AssemblyTableFull { capacity: usize },

    #[error("fragment train {fragment_id} from {sender} already in progress")]
    DuplicateFragmentTrain { fragment_id: u32, sender: BlockRef },

    #[error("fragment for unknown train {fragment_id} from {sender}")]
    UnknownFragmentTrain { fragment_id: u32, sender: BlockRef },

    #[error("malformed fragment from {sender}: {error}")]
    MalformedFragment { sender: BlockRef, error: WireError },
}

/// Report an invariant violation and abort.
#[cold]
#[track_caller]
pub fn fatal(violation: InvariantViolation) -> ! {
    tracing::error!(error = %violation, "invariant violation");
    panic!("invariant violation: {violation}")
}
