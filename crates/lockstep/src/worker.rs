//! # Stage Workers
//!
//! One OS thread per (object, non-graphics stage):
//!
//! ```text
//! Starting ──► Running ──► Stopped
//!                 │
//!                 └─ loop { dt = clock.tick(); wait; kernel.step(dt); post }
//! ```
//!
//! A worker leaves the loop when its ring is closed, it reaches its lap
//! limit, or its kernel panics. A worker blocked in `wait` stays there until
//! the token arrives or [`StageRing::close`] releases it. A panicking kernel
//! keeps the token, so the worker closes the ring itself: every other stage
//! of the object, the render consumer included, then fails with
//! `SyncError::Closed` instead of waiting forever.
//!
//! [`StageRing::close`]: lockstep_core::StageRing::close

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use lockstep_core::{Role, SyncError};

use crate::error::{EngineError, EngineResult};
use crate::kernel::StageKernel;
use crate::object::{ObjectId, SimObject};

/// Worker lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Spawned, not yet looping.
    Starting = 0,
    /// In the wait/compute/post loop.
    Running = 1,
    /// Left the loop; the thread is finished or finishing.
    Stopped = 2,
}

impl WorkerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

/// Why a worker left its loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// The ring was closed.
    Closed,
    /// The configured lap limit was reached.
    LapLimit,
    /// The kernel panicked. The token was not passed on and the ring was
    /// closed.
    Panicked,
}

/// Final account of one worker, returned by `join`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    /// Module that spawned the worker.
    pub module: String,
    /// Object driven.
    pub object: ObjectId,
    /// Stage driven.
    pub role: Role,
    /// Completed laps.
    pub laps: u64,
    /// Terminal state. Always `Stopped` once joined.
    pub state: WorkerState,
    /// Why the loop ended.
    pub exit: WorkerExit,
}

/// Rolling pair of wall-clock timestamps.
#[derive(Clone, Copy, Debug, Default)]
pub struct LapClock {
    previous: Option<Instant>,
    last: Option<Instant>,
}

impl LapClock {
    /// Creates a clock with no samples.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records now and returns the seconds since the previous tick
    /// (0 on the first tick).
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        self.previous = self.last.replace(now);
        self.previous
            .map_or(0.0, |previous| now.duration_since(previous).as_secs_f64())
    }
}

/// Counters shared with the worker thread.
#[derive(Debug)]
struct WorkerShared {
    state: AtomicU8,
    laps: AtomicU64,
}

/// A thread bound to one (object, stage).
pub struct StageWorker {
    module: String,
    object: Arc<SimObject>,
    role: Role,
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<WorkerExit>>,
}

impl StageWorker {
    /// Spawns a worker driving `role` of `object` with `kernel`.
    ///
    /// With `max_laps` the worker stops by itself after that many laps.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownRole` if the object has no such stage
    /// and `EngineError::Spawn` if the thread cannot be created.
    pub fn spawn(
        module: &str,
        object: Arc<SimObject>,
        role: Role,
        mut kernel: Box<dyn StageKernel>,
        max_laps: Option<u64>,
    ) -> EngineResult<Self> {
        let gate = object.ring().require(role.as_str())?.clone();
        let name = format!("{module}:{}:{role}", object.id());
        let shared = Arc::new(WorkerShared {
            state: AtomicU8::new(WorkerState::Starting as u8),
            laps: AtomicU64::new(0),
        });

        let thread_object = Arc::clone(&object);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let object = thread_object;
                let shared = thread_shared;
                let mut clock = LapClock::new();
                shared.state.store(WorkerState::Running as u8, Ordering::Release);
                tracing::debug!(object = %object.id(), role = %gate.role, kernel = kernel.name(), "worker started");

                let exit = loop {
                    let laps = shared.laps.load(Ordering::Relaxed);
                    if max_laps.is_some_and(|max| laps >= max) {
                        break WorkerExit::LapLimit;
                    }
                    let dt = clock.tick();
                    let stepped = panic::catch_unwind(AssertUnwindSafe(|| {
                        object.run_stage(&gate, |state| kernel.step(&object, state, dt))
                    }));
                    match stepped {
                        Ok(Ok(())) => {
                            shared.laps.store(laps + 1, Ordering::Release);
                        }
                        Ok(Err(SyncError::Closed)) => break WorkerExit::Closed,
                        Ok(Err(err)) => {
                            tracing::error!(object = %object.id(), role = %gate.role, error = %err, "worker failed");
                            break WorkerExit::Closed;
                        }
                        Err(_) => {
                            // The token died with the kernel.
                            tracing::error!(object = %object.id(), role = %gate.role, lap = laps, "kernel panicked, closing ring");
                            object.ring().close();
                            break WorkerExit::Panicked;
                        }
                    }
                };

                shared.state.store(WorkerState::Stopped as u8, Ordering::Release);
                tracing::debug!(
                    object = %object.id(),
                    role = %gate.role,
                    laps = shared.laps.load(Ordering::Relaxed),
                    ?exit,
                    "worker stopped"
                );
                exit
            })
            .map_err(|source| EngineError::Spawn { name, source })?;

        Ok(Self {
            module: module.to_string(),
            object,
            role,
            shared,
            handle: Some(handle),
        })
    }

    /// Object driven.
    #[must_use]
    pub fn object(&self) -> &Arc<SimObject> {
        &self.object
    }

    /// Stage driven.
    #[must_use]
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Completed laps.
    #[must_use]
    pub fn laps(&self) -> u64 {
        self.shared.laps.load(Ordering::Acquire)
    }

    /// Waits for the thread to finish.
    ///
    /// Blocks until the worker leaves its loop: close the ring first
    /// unless the worker has a lap limit.
    #[must_use]
    pub fn join(mut self) -> WorkerReport {
        let exit = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(exit)) => exit,
            Some(Err(_)) => {
                tracing::error!(object = %self.object.id(), role = %self.role, "worker panicked");
                WorkerExit::Panicked
            }
            None => WorkerExit::Closed,
        };
        self.shared.state.store(WorkerState::Stopped as u8, Ordering::Release);

        WorkerReport {
            module: self.module.clone(),
            object: self.object.id().clone(),
            role: self.role.clone(),
            laps: self.laps(),
            state: self.state(),
            exit,
        }
    }
}

impl fmt::Debug for StageWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageWorker")
            .field("module", &self.module)
            .field("object", self.object.id())
            .field("role", &self.role)
            .field("state", &self.state())
            .field("laps", &self.laps())
            .finish_non_exhaustive()
    }
}

impl Drop for StageWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // An unjoined worker may be parked in wait(): release it.
            self.object.ring().close();
            let _ = handle.join();
        }
    }
}
