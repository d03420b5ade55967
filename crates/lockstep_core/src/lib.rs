//! # LOCKSTEP Core
//!
//! The synchronization substrate shared by every stage of a simulation
//! object:
//! - A counting [`SemaphoreSet`] per object, the only real synchronization
//!   primitive in the system
//! - A validated [`StageRing`] that relays one token between stages, so
//!   exactly one stage at a time owns the object's state
//! - A [`DoubleBuffer`] that swaps `current`/`previous` instead of copying
//! - A three-phase Verlet [`Integrator`] that depends on the swap
//!
//! ## Architecture Rules
//!
//! 1. **No global lock** - Mutual exclusion comes from the ring wiring
//! 2. **Wiring errors are construction errors** - A ring that cannot cycle
//!    is rejected by [`RingBuilder::build`], never discovered as a stall
//! 3. **Swap last** - The buffer swap is the final action before `post()`
//!
//! ## Example
//!
//! ```rust
//! use lockstep_core::{RingBuilder, Role};
//!
//! // graphics owns the token first, then hands it to physics
//! let ring = RingBuilder::new()
//!     .slot(1)
//!     .slot(0)
//!     .stage(Role::GRAPHICS, 0, 1)
//!     .stage(Role::PHYSICS, 1, 0)
//!     .build()
//!     .unwrap();
//!
//! let graphics = ring.gate(Role::GRAPHICS.as_str()).unwrap().clone();
//! ring.pass(&graphics, || { /* draw */ }).unwrap();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod integrator;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use integrator::{Integrator, Phase, StepFactors};
pub use sync::{
    DoubleBuffer, RingAdvisory, RingBuilder, Role, SemaphoreSet, SlotStats, StageGate, StageRing,
};
