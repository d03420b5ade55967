//! # Stage Synchronization
//!
//! ## The Problem
//!
//! ```text
//! Thread 1 (physics):   WRITE vertex positions
//! Thread 2 (collision): WRITE vertex positions
//! Thread 3 (render):    READ vertex positions
//!
//! Without synchronization: TORN FRAMES
//! With one big mutex:      EVERY OBJECT SERIALIZED BEHIND EVERY OTHER
//! ```
//!
//! ## The Solution: A Token Ring Per Object
//!
//! ```text
//!        ┌──────── slot 0 ────────┐
//!        ▼                        │
//!   [graphics] ── slot 1 ──> [physics]
//!   wait 0 / post 1          wait 1 / post 0
//! ```
//!
//! One token circulates. A stage waits on its slot, computes, posts the
//! next stage's slot. The double buffer is swapped as the last step of
//! the physics stage, so the render stage always finds a committed frame.

mod double_buffer;
mod ring;
mod semaphore;

pub use double_buffer::DoubleBuffer;
pub use ring::{RingAdvisory, RingBuilder, Role, StageGate, StageRing};
pub use semaphore::{SemaphoreSet, SlotStats};
