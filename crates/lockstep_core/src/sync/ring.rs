//! # Stage Ring
//!
//! Stages bound to wait/post slot pairs of one [`SemaphoreSet`].
//!
//! ## Wiring Rules (checked by [`RingBuilder::build`])
//!
//! ```text
//! 1. Every slot index < slot count
//! 2. Role names unique
//! 3. A slot is the wait slot of at most one stage, the post slot of at most one
//! 4. Every post slot is some stage's wait slot and vice versa
//!    => "next stage" is a permutation => disjoint simple cycles
//! 5. Every cycle carries at least one token
//! ```
//!
//! A graph that passes can still be slow, but it cannot stall on its own.
//! A cycle with more than one token is accepted with a warning: the extra
//! tokens are pipelining slack and relax mutual exclusion between its
//! stages.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::sync::semaphore::{SemaphoreSet, SlotStats};

/// A stage role name.
///
/// The role set is open: the well-known roles are constants, but any name
/// a scene declares is a valid role.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Physics integrator stage.
    pub const PHYSICS: Self = Self(Cow::Borrowed(lockstep_shared::ROLE_PHYSICS));
    /// Collision response stage.
    pub const COLLISION: Self = Self(Cow::Borrowed(lockstep_shared::ROLE_COLLISION));
    /// Intersection stage.
    pub const INTERSECTION: Self = Self(Cow::Borrowed(lockstep_shared::ROLE_INTERSECTION));
    /// Rendering stage, driven by the render consumer.
    pub const GRAPHICS: Self = Self(Cow::Borrowed(lockstep_shared::ROLE_GRAPHICS));

    /// Creates a role from any name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The role name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the render consumer's role.
    #[must_use]
    pub fn is_graphics(&self) -> bool {
        self.as_str() == lockstep_shared::ROLE_GRAPHICS
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A role bound to its wait and post slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageGate {
    /// Role name.
    pub role: Role,
    /// Slot waited on before the stage runs.
    pub wait: usize,
    /// Slot posted after the stage runs.
    pub post: usize,
}

/// Non-fatal findings from ring construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RingAdvisory {
    /// A declared slot no stage waits on.
    UnusedSlot(usize),
    /// A cycle carrying more than one token.
    Slack {
        /// Stages of the cycle, in token order.
        stages: Vec<String>,
        /// Tokens carried.
        tokens: u64,
    },
}

impl fmt::Display for RingAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnusedSlot(slot) => write!(f, "slot {slot} is declared but never waited on"),
            Self::Slack { stages, tokens } => write!(
                f,
                "cycle {stages:?} carries {tokens} tokens; its stages may overlap"
            ),
        }
    }
}

/// Builder for a [`StageRing`].
#[derive(Clone, Debug, Default)]
pub struct RingBuilder {
    tokens: Vec<u32>,
    gates: Vec<StageGate>,
}

impl RingBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a slot with `tokens` initial tokens.
    #[must_use]
    pub fn slot(mut self, tokens: u32) -> Self {
        self.tokens.push(tokens);
        self
    }

    /// Appends one slot per entry of `tokens`.
    #[must_use]
    pub fn slots(mut self, tokens: &[u32]) -> Self {
        self.tokens.extend_from_slice(tokens);
        self
    }

    /// Binds `role` to a wait/post slot pair.
    #[must_use]
    pub fn stage(mut self, role: impl Into<Role>, wait: usize, post: usize) -> Self {
        self.gates.push(StageGate {
            role: role.into(),
            wait,
            post,
        });
        self
    }

    /// Builds a ring, rejecting any wiring that is not a disjoint union of
    /// simple cycles each carrying at least one token.
    ///
    /// # Errors
    ///
    /// Returns the first wiring violation found.
    pub fn build(self) -> SyncResult<StageRing> {
        self.check_indices()?;

        let mut roles = HashSet::with_capacity(self.gates.len());
        for gate in &self.gates {
            if !roles.insert(gate.role.as_str()) {
                return Err(SyncError::DuplicateRole(gate.role.to_string()));
            }
        }

        let waiter_of = self.slot_owners(|g| g.wait, "wait")?;
        let poster_of = self.slot_owners(|g| g.post, "post")?;

        // next[i] = the stage that receives the token stage i posts
        let mut next = Vec::with_capacity(self.gates.len());
        for gate in &self.gates {
            let Some(successor) = waiter_of[gate.post] else {
                return Err(SyncError::DanglingPost {
                    role: gate.role.to_string(),
                    slot: gate.post,
                });
            };
            next.push(successor);
        }
        if let Some(gate) = self.gates.iter().find(|g| poster_of[g.wait].is_none()) {
            return Err(SyncError::DanglingWait {
                role: gate.role.to_string(),
                slot: gate.wait,
            });
        }

        let cycles = decompose(&next);
        let mut advisories = Vec::new();

        for cycle in &cycles {
            let tokens: u64 = cycle
                .iter()
                .map(|&s| u64::from(self.tokens[self.gates[s].wait]))
                .sum();
            let names = || -> Vec<String> {
                cycle.iter().map(|&s| self.gates[s].role.to_string()).collect()
            };
            if tokens == 0 {
                return Err(SyncError::NoToken { stages: names() });
            }
            if tokens > 1 {
                advisories.push(RingAdvisory::Slack {
                    stages: names(),
                    tokens,
                });
            }
        }

        for (slot, waiter) in waiter_of.iter().enumerate() {
            if waiter.is_none() {
                advisories.push(RingAdvisory::UnusedSlot(slot));
            }
        }

        for advisory in &advisories {
            tracing::warn!(%advisory, "stage ring advisory");
        }

        Ok(self.finish(cycles, advisories))
    }

    /// Builds a ring checking only slot bounds.
    ///
    /// The result may deadlock silently: a stage whose slot never receives
    /// a post blocks its thread forever. Use only to reproduce legacy
    /// wiring.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::IndexOutOfRange` for an out-of-bounds slot.
    pub fn build_unchecked(self) -> SyncResult<StageRing> {
        self.check_indices()?;
        Ok(self.finish(Vec::new(), Vec::new()))
    }

    fn check_indices(&self) -> SyncResult<()> {
        if self.gates.is_empty() {
            return Err(SyncError::EmptyRing);
        }
        let size = self.tokens.len();
        for gate in &self.gates {
            for index in [gate.wait, gate.post] {
                if index >= size {
                    return Err(SyncError::IndexOutOfRange {
                        role: gate.role.to_string(),
                        index,
                        size,
                    });
                }
            }
        }
        Ok(())
    }

    /// Maps each slot to the single stage using it on one side.
    fn slot_owners(
        &self,
        side_of: impl Fn(&StageGate) -> usize,
        side: &'static str,
    ) -> SyncResult<Vec<Option<usize>>> {
        let mut owners: Vec<Option<usize>> = vec![None; self.tokens.len()];
        for (i, gate) in self.gates.iter().enumerate() {
            let slot = side_of(gate);
            if let Some(first) = owners[slot] {
                return Err(SyncError::SharedSlot {
                    slot,
                    side,
                    first: self.gates[first].role.to_string(),
                    second: gate.role.to_string(),
                });
            }
            owners[slot] = Some(i);
        }
        Ok(owners)
    }

    fn finish(self, cycles: Vec<Vec<usize>>, advisories: Vec<RingAdvisory>) -> StageRing {
        StageRing {
            semaphores: SemaphoreSet::with_tokens(&self.tokens),
            gates: self.gates,
            cycles,
            advisories,
        }
    }
}

/// Splits a permutation into its cycles, each starting at its lowest stage.
fn decompose(next: &[usize]) -> Vec<Vec<usize>> {
    let mut visited = vec![false; next.len()];
    let mut cycles = Vec::new();
    for start in 0..next.len() {
        if visited[start] {
            continue;
        }
        let mut cycle = Vec::new();
        let mut s = start;
        while !visited[s] {
            visited[s] = true;
            cycle.push(s);
            s = next[s];
        }
        cycles.push(cycle);
    }
    cycles
}

/// A set of stage gates over one semaphore set.
///
/// Each stage runs `wait(gate.wait); compute; post(gate.post)`. With one
/// token per cycle, at most one stage of a cycle is between its `wait`
/// and its `post` at any instant.
#[derive(Debug)]
pub struct StageRing {
    semaphores: SemaphoreSet,
    gates: Vec<StageGate>,
    cycles: Vec<Vec<usize>>,
    advisories: Vec<RingAdvisory>,
}

impl StageRing {
    /// Looks up a gate by role name.
    #[must_use]
    pub fn gate(&self, role: &str) -> Option<&StageGate> {
        self.gates.iter().find(|g| g.role.as_str() == role)
    }

    /// Looks up a gate, failing with `SyncError::UnknownRole`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownRole` if no stage has this role.
    pub fn require(&self, role: &str) -> SyncResult<&StageGate> {
        self.gate(role).ok_or_else(|| SyncError::UnknownRole(role.to_string()))
    }

    /// All gates, in declaration order.
    #[must_use]
    pub fn gates(&self) -> &[StageGate] {
        &self.gates
    }

    /// Cycles as stage indices in token order. Empty for unchecked rings.
    #[must_use]
    pub fn cycles(&self) -> &[Vec<usize>] {
        &self.cycles
    }

    /// Non-fatal findings from construction.
    #[must_use]
    pub fn advisories(&self) -> &[RingAdvisory] {
        &self.advisories
    }

    /// Returns true if every cycle carries exactly one token, i.e. the
    /// ring guarantees mutual exclusion between its stages.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        !self.cycles.is_empty()
            && !self
                .advisories
                .iter()
                .any(|a| matches!(a, RingAdvisory::Slack { .. }))
    }

    /// The underlying semaphore set.
    #[must_use]
    pub fn semaphores(&self) -> &SemaphoreSet {
        &self.semaphores
    }

    /// Blocks until `gate` holds the token.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Closed` if the ring is closed.
    pub fn enter(&self, gate: &StageGate) -> SyncResult<()> {
        self.semaphores.wait(gate.wait)
    }

    /// Like [`StageRing::enter`] with a timeout. Diagnostics only.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Closed` if the ring is closed.
    pub fn enter_timeout(&self, gate: &StageGate, timeout: Duration) -> SyncResult<bool> {
        self.semaphores.wait_timeout(gate.wait, timeout)
    }

    /// Hands the token to the next stage.
    pub fn leave(&self, gate: &StageGate) {
        self.semaphores.post(gate.post);
    }

    /// Runs `f` while holding `gate`'s token.
    ///
    /// If `f` panics the token is not passed on: the ring stalls rather
    /// than exposing a half-written buffer, until someone calls
    /// [`StageRing::close`].
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Closed` if the ring is closed before the token
    /// arrives.
    pub fn pass<R>(&self, gate: &StageGate, f: impl FnOnce() -> R) -> SyncResult<R> {
        self.enter(gate)?;
        let result = f();
        self.leave(gate);
        Ok(result)
    }

    /// Closes the ring, releasing every blocked stage with
    /// `SyncError::Closed`.
    pub fn close(&self) {
        self.semaphores.close();
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphores.is_closed()
    }

    /// Snapshot of every slot.
    #[must_use]
    pub fn stats(&self) -> Vec<SlotStats> {
        (0..self.semaphores.len()).map(|i| self.semaphores.stats(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn two_stage() -> RingBuilder {
        RingBuilder::new()
            .slots(&[1, 0])
            .stage(Role::GRAPHICS, 0, 1)
            .stage(Role::PHYSICS, 1, 0)
    }

    #[test]
    fn test_two_stage_ring_is_one_cycle() {
        let ring = two_stage().build().unwrap();
        assert_eq!(ring.cycles(), &[vec![0, 1]]);
        assert!(ring.advisories().is_empty());
        assert!(ring.is_exclusive());
        assert_eq!(ring.gate("physics").unwrap().wait, 1);
    }

    #[test]
    fn test_three_stage_ring_in_token_order() {
        let ring = RingBuilder::new()
            .slots(&[1, 0, 0])
            .stage(Role::GRAPHICS, 0, 1)
            .stage(Role::COLLISION, 2, 0)
            .stage(Role::PHYSICS, 1, 2)
            .build()
            .unwrap();
        // graphics -> physics -> collision -> graphics
        assert_eq!(ring.cycles(), &[vec![0, 2, 1]]);
    }

    #[test]
    fn test_disjoint_cycles_accepted() {
        let ring = RingBuilder::new()
            .slots(&[1, 0, 1, 0])
            .stage("a", 0, 1)
            .stage("b", 1, 0)
            .stage("c", 2, 3)
            .stage("d", 3, 2)
            .build()
            .unwrap();
        assert_eq!(ring.cycles().len(), 2);
    }

    #[test]
    fn test_index_out_of_range() {
        let err = RingBuilder::new()
            .slots(&[1])
            .stage(Role::PHYSICS, 0, 3)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::IndexOutOfRange {
                role: "physics".into(),
                index: 3,
                size: 1
            }
        );
    }

    #[test]
    fn test_duplicate_role() {
        let err = RingBuilder::new()
            .slots(&[1, 0])
            .stage(Role::PHYSICS, 0, 1)
            .stage(Role::PHYSICS, 1, 0)
            .build()
            .unwrap_err();
        assert_eq!(err, SyncError::DuplicateRole("physics".into()));
    }

    #[test]
    fn test_shared_wait_slot() {
        let err = RingBuilder::new()
            .slots(&[1, 0])
            .stage(Role::PHYSICS, 0, 1)
            .stage(Role::GRAPHICS, 0, 0)
            .build()
            .unwrap_err();
        assert!(matches!(err, SyncError::SharedSlot { slot: 0, side: "wait", .. }));
    }

    #[test]
    fn test_dangling_post() {
        let err = RingBuilder::new()
            .slots(&[1, 0, 0])
            .stage(Role::PHYSICS, 0, 1)
            .stage(Role::GRAPHICS, 1, 2)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::DanglingPost {
                role: "graphics".into(),
                slot: 2
            }
        );
    }

    #[test]
    fn test_zero_token_cycle_rejected() {
        let err = RingBuilder::new()
            .slots(&[0])
            .stage(Role::PHYSICS, 0, 0)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::NoToken {
                stages: vec!["physics".into()]
            }
        );
    }

    #[test]
    fn test_slack_and_unused_slot_are_advisory() {
        let ring = RingBuilder::new()
            .slots(&[1, 1, 0])
            .stage(Role::GRAPHICS, 0, 1)
            .stage(Role::PHYSICS, 1, 0)
            .build()
            .unwrap();
        assert!(!ring.is_exclusive());
        assert!(ring.advisories().contains(&RingAdvisory::UnusedSlot(2)));
        assert!(ring
            .advisories()
            .iter()
            .any(|a| matches!(a, RingAdvisory::Slack { tokens: 2, .. })));
    }

    #[test]
    fn test_unchecked_keeps_dead_wiring() {
        let ring = RingBuilder::new()
            .slots(&[0])
            .stage(Role::PHYSICS, 0, 0)
            .build_unchecked()
            .unwrap();
        let gate = ring.gate("physics").unwrap();
        assert!(!ring.enter_timeout(gate, Duration::from_millis(20)).unwrap());
        assert!(ring.cycles().is_empty());
        assert!(!ring.is_exclusive());
    }

    #[test]
    fn test_strict_round_robin() {
        let ring = Arc::new(two_stage().build().unwrap());
        let inside = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let spawn = |role: &'static str| {
            let ring = Arc::clone(&ring);
            let inside = Arc::clone(&inside);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let gate = ring.gate(role).unwrap().clone();
                for _ in 0..200 {
                    ring.pass(&gate, || {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        order.lock().push(role);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
        };

        let g = spawn("graphics");
        let p = spawn("physics");
        g.join().unwrap();
        p.join().unwrap();

        let order = order.lock();
        assert_eq!(order.len(), 400);
        for (i, role) in order.iter().enumerate() {
            let expected = if i % 2 == 0 { "graphics" } else { "physics" };
            assert_eq!(*role, expected);
        }
        assert!(ring.stats().iter().all(SlotStats::is_balanced));
    }

    #[test]
    fn test_close_releases_stage() {
        let ring = Arc::new(two_stage().build().unwrap());
        let physics = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let gate = ring.gate("physics").unwrap().clone();
                ring.enter(&gate)
            })
        };
        thread::sleep(Duration::from_millis(20));
        ring.close();
        assert_eq!(physics.join().unwrap(), Err(SyncError::Closed));
    }
}
