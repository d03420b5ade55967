//! # Double-Buffered Vertex State
//!
//! Two same-shaped storages, a `current` index and a buffer-select flag.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────────────────┐
//!                    │        DoubleBuffer         │
//!                    │                             │
//!                    │  ┌─────────┐  ┌─────────┐   │
//!                    │  │ Storage │  │ Storage │   │
//!                    │  │    0    │  │    1    │   │
//!                    │  └────┬────┘  └────┬────┘   │
//!                    │       │            │        │
//!                    │  ┌────┴────────────┴────┐   │
//!                    │  │ current (0/1) + flag │   │
//!                    │  └──────────────────────┘   │
//!                    └─────────────────────────────┘
//! ```
//!
//! ## Lap Protocol
//!
//! 1. The stage holding the token writes the future state into the
//!    `previous` storage (it is no longer needed once read)
//! 2. `current` and `previous` swap roles - an index flip, never a copy
//! 3. The select flag toggles
//!
//! Steps 2 and 3 run in that order, as the last action before the stage
//! posts. A reader that entered after the post sees the flag and the
//! storage it names, both frozen until the token comes back.
//!
//! ## Thread Safety
//!
//! None of its own. The stage ring decides who may touch it.

/// Two storages swapped by index.
#[derive(Clone, Debug)]
pub struct DoubleBuffer<T> {
    /// The two storages. Never reallocated after construction.
    buffers: [Vec<T>; 2],
    /// Index of the `current` storage. `previous` is `current ^ 1`.
    current: usize,
    /// Buffer-select flag, toggled once per swap.
    select: bool,
    /// Completed swaps.
    swaps: u64,
}

impl<T: Clone> DoubleBuffer<T> {
    /// Creates a buffer whose `current` and `previous` both hold `initial`.
    #[must_use]
    pub fn new(initial: Vec<T>) -> Self {
        Self {
            buffers: [initial.clone(), initial],
            current: 0,
            select: false,
            swaps: 0,
        }
    }
}

impl<T> DoubleBuffer<T> {
    /// Elements per storage.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers[self.current].len()
    }

    /// Returns true if the storages are empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The committed state.
    #[inline]
    #[must_use]
    pub fn current(&self) -> &[T] {
        &self.buffers[self.current]
    }

    /// The state one lap older than `current`.
    #[inline]
    #[must_use]
    pub fn previous(&self) -> &[T] {
        &self.buffers[self.current ^ 1]
    }

    /// Mutable access to the committed state, for stages that correct it
    /// in place (collision, input).
    #[inline]
    pub fn current_mut(&mut self) -> &mut [T] {
        &mut self.buffers[self.current]
    }

    /// Buffer-select flag.
    #[inline]
    #[must_use]
    pub fn select(&self) -> bool {
        self.select
    }

    /// Index of the storage currently playing `current` (for debugging).
    #[inline]
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Completed swaps.
    #[inline]
    #[must_use]
    pub fn swaps(&self) -> u64 {
        self.swaps
    }

    /// Addresses of the two storages, in storage order.
    ///
    /// Stable for the lifetime of the buffer: laps swap roles, they never
    /// reallocate.
    #[must_use]
    pub fn storage_ids(&self) -> [usize; 2] {
        [
            self.buffers[0].as_ptr() as usize,
            self.buffers[1].as_ptr() as usize,
        ]
    }

    /// Returns true if both storages have the same length.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.buffers[0].len() == self.buffers[1].len()
    }

    /// Runs one lap: `f(current, back)` writes the future state into `back`
    /// (which holds `previous` on entry), then the roles swap and the flag
    /// toggles.
    pub fn advance<R>(&mut self, f: impl FnOnce(&[T], &mut [T]) -> R) -> R {
        let [first, second] = &mut self.buffers;
        let (current, back) = if self.current == 0 {
            (first.as_slice(), second.as_mut_slice())
        } else {
            (second.as_slice(), first.as_mut_slice())
        };
        let result = f(current, back);
        self.swap();
        result
    }

    /// Swap first, flag second.
    fn swap(&mut self) {
        self.current ^= 1;
        self.select = !self.select;
        self.swaps += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_buffer_creation() {
        let db = DoubleBuffer::new(vec![1, 2, 3]);
        assert_eq!(db.current(), &[1, 2, 3]);
        assert_eq!(db.previous(), &[1, 2, 3]);
        assert!(!db.select());
        assert_eq!(db.swaps(), 0);
        assert!(db.is_consistent());
    }

    #[test]
    fn test_advance_writes_back_and_swaps() {
        let mut db = DoubleBuffer::new(vec![0; 3]);

        db.advance(|current, back| {
            for (b, c) in back.iter_mut().zip(current) {
                *b = c + 1;
            }
        });

        assert_eq!(db.current(), &[1, 1, 1]);
        assert_eq!(db.previous(), &[0, 0, 0]);
        assert!(db.select());
        assert_eq!(db.current_index(), 1);
    }

    #[test]
    fn test_select_alternates() {
        let mut db = DoubleBuffer::new(vec![0u8; 4]);
        let mut last = db.select();
        for _ in 0..10 {
            db.advance(|_, _| ());
            assert_ne!(db.select(), last);
            last = db.select();
        }
        assert_eq!(db.swaps(), 10);
    }

    #[test]
    fn test_storage_identity_survives_laps() {
        let mut db = DoubleBuffer::new(vec![0.0f64; 64]);
        let ids = db.storage_ids();
        let first_current = db.current().as_ptr() as usize;

        for lap in 1..=7u64 {
            db.advance(|current, back| back.copy_from_slice(current));
            assert_eq!(db.storage_ids(), ids);
            let now = db.current().as_ptr() as usize;
            // odd laps: roles swapped; even laps: back to the start
            assert_eq!(now == first_current, lap % 2 == 0);
        }
    }

    #[test]
    fn test_current_mut_edits_committed_state() {
        let mut db = DoubleBuffer::new(vec![5]);
        db.current_mut()[0] = 9;
        assert_eq!(db.current(), &[9]);
        assert_eq!(db.previous(), &[5]);
    }
}
