//! # Counting Semaphore Set
//!
//! A fixed array of counting semaphores, one per ring slot.
//!
//! ## Contract
//!
//! - `push`: construction only (needs `&mut self`, which nobody has once
//!   the set is shared between stage threads)
//! - `wait`: block until the slot count is positive, then decrement
//! - `post`: increment and wake at most one waiter
//! - `close`: wake every waiter with [`SyncError::Closed`]
//!
//! There is no timeout on the protocol path. A thread in `wait` stays
//! there until a matching `post` or `close`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{SyncError, SyncResult};

/// Counters protected by the slot lock.
#[derive(Debug)]
struct SlotState {
    /// Tokens currently available.
    value: u64,
    /// Completed `wait()` calls.
    waits: u64,
    /// Completed `post()` calls.
    posts: u64,
}

/// One counting semaphore.
#[derive(Debug)]
struct Slot {
    initial: u64,
    state: Mutex<SlotState>,
    available: Condvar,
}

impl Slot {
    fn new(initial: u64) -> Self {
        Self {
            initial,
            state: Mutex::new(SlotState {
                value: initial,
                waits: 0,
                posts: 0,
            }),
            available: Condvar::new(),
        }
    }
}

/// Consistent snapshot of one slot's counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotStats {
    /// Initial token count.
    pub initial: u64,
    /// Tokens currently available.
    pub value: u64,
    /// Completed waits.
    pub waits: u64,
    /// Completed posts.
    pub posts: u64,
}

impl SlotStats {
    /// Returns true if `waits <= posts + initial` and the current value
    /// accounts for every wait and post.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.waits <= self.posts + self.initial
            && self.value == self.initial + self.posts - self.waits
    }
}

/// A dynamically sized set of counting semaphores.
#[derive(Debug, Default)]
pub struct SemaphoreSet {
    slots: Vec<Slot>,
    closed: AtomicBool,
}

impl SemaphoreSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set with one slot per initial count.
    #[must_use]
    pub fn with_tokens(tokens: &[u32]) -> Self {
        let mut set = Self::new();
        for &t in tokens {
            set.push(t);
        }
        set
    }

    /// Appends a slot and returns its index.
    pub fn push(&mut self, initial: u32) -> usize {
        self.slots.push(Slot::new(u64::from(initial)));
        self.slots.len() - 1
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the set has no slots.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Blocks until slot `index` has a token, then takes it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Closed` if the set is closed before a token is
    /// taken.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range. Ring construction rules this out.
    pub fn wait(&self, index: usize) -> SyncResult<()> {
        let slot = &self.slots[index];
        let mut state = slot.state.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(SyncError::Closed);
            }
            if state.value > 0 {
                break;
            }
            slot.available.wait(&mut state);
        }
        state.value -= 1;
        state.waits += 1;
        Ok(())
    }

    /// Like [`SemaphoreSet::wait`], but gives up after `timeout`.
    ///
    /// Returns `Ok(true)` if a token was taken. Diagnostics only: the ring
    /// protocol itself never times out.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Closed` if the set is closed while waiting.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn wait_timeout(&self, index: usize, timeout: Duration) -> SyncResult<bool> {
        let deadline = Instant::now() + timeout;
        let slot = &self.slots[index];
        let mut state = slot.state.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(SyncError::Closed);
            }
            if state.value > 0 {
                break;
            }
            if slot.available.wait_until(&mut state, deadline).timed_out() && state.value == 0 {
                return Ok(false);
            }
        }
        state.value -= 1;
        state.waits += 1;
        Ok(true)
    }

    /// Adds a token to slot `index` and wakes one waiter.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn post(&self, index: usize) {
        let slot = &self.slots[index];
        let mut state = slot.state.lock();
        state.value += 1;
        state.posts += 1;
        slot.available.notify_one();
    }

    /// Closes the set: every current and future `wait` returns
    /// `SyncError::Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for slot in &self.slots {
            // Taking the lock orders the flag store before any waiter's
            // re-check.
            let _state = slot.state.lock();
            slot.available.notify_all();
        }
    }

    /// Returns true once [`SemaphoreSet::close`] has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn stats(&self, index: usize) -> SlotStats {
        let slot = &self.slots[index];
        let state = slot.state.lock();
        SlotStats {
            initial: slot.initial,
            value: state.value,
            waits: state.waits,
            posts: state.posts,
        }
    }

    /// Initial token count of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn initial(&self, index: usize) -> u64 {
        self.slots[index].initial
    }
}
