//! # Synchronization Error Types
//!
//! Everything except [`SyncError::Closed`] is a construction-time error:
//! a ring that reports one of them was never started.

use thiserror::Error;

/// Errors raised while wiring or driving a stage ring.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The semaphore set was closed while (or before) waiting.
    #[error("semaphore set closed")]
    Closed,

    /// A stage references a slot the set does not have.
    #[error("stage {role}: slot {index} out of range (set has {size} slots)")]
    IndexOutOfRange {
        /// Offending stage.
        role: String,
        /// Offending slot index.
        index: usize,
        /// Number of slots in the set.
        size: usize,
    },

    /// The same role appears twice in one ring.
    #[error("stage role {0} declared twice")]
    DuplicateRole(String),

    /// A ring needs at least one stage.
    #[error("ring has no stages")]
    EmptyRing,

    /// Two stages wait on (or post to) the same slot.
    #[error("slot {slot} is the {side} slot of both {first} and {second}")]
    SharedSlot {
        /// Contested slot.
        slot: usize,
        /// `"wait"` or `"post"`.
        side: &'static str,
        /// First stage using it.
        first: String,
        /// Second stage using it.
        second: String,
    },

    /// A stage posts a slot nobody waits on: the token leaves the ring.
    #[error("stage {role} posts slot {slot}, which no stage waits on")]
    DanglingPost {
        /// Offending stage.
        role: String,
        /// Slot posted.
        slot: usize,
    },

    /// A stage waits on a slot nobody posts: it can run at most as many
    /// times as the slot's initial count.
    #[error("stage {role} waits on slot {slot}, which no stage posts")]
    DanglingWait {
        /// Offending stage.
        role: String,
        /// Slot waited on.
        slot: usize,
    },

    /// A cycle whose slots start with zero tokens never runs.
    #[error("cycle {stages:?} carries no token and can never start")]
    NoToken {
        /// Stages of the dead cycle, in token order.
        stages: Vec<String>,
    },

    /// A role lookup failed.
    #[error("unknown stage role {0}")]
    UnknownRole(String),
}

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
