//! # Variable-Step Verlet Integrator
//!
//! A two-sample corrector needs two prior samples, so the first two laps
//! are special:
//!
//! ```text
//! lap 0  Cold     future = current
//! lap 1  Warming  future = current + ½·dt₁²·F
//! lap n  Steady   future = current + (dtₙ/dtₙ₋₁)·(current − previous) + dtₙ²·F
//! ```
//!
//! Each call to [`Integrator::advance`] is one lap and one phase
//! transition. The integrator does not own positions: it writes into the
//! back storage of a [`DoubleBuffer`](crate::DoubleBuffer), which holds
//! `previous` on entry.

use lockstep_shared::constants::{MAX_DT, MIN_DT};
use lockstep_shared::Vec3;

/// Integrator phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// No sample yet: positions are carried over unchanged.
    #[default]
    Cold,
    /// One sample: start from rest with a half step.
    Warming,
    /// Two samples: general variable-step corrector.
    Steady,
}

impl Phase {
    /// The phase that follows one completed lap.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Cold => Self::Warming,
            Self::Warming | Self::Steady => Self::Steady,
        }
    }
}

/// Coefficients applied by one lap, for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepFactors {
    /// Phase that ran.
    pub phase: Phase,
    /// Clamped time step of this lap.
    pub dt: f64,
    /// Weight of `current − previous`.
    pub factor0: f64,
    /// Weight of the force.
    pub factor1: f64,
}

/// Three-phase variable-step Verlet corrector.
#[derive(Clone, Debug)]
pub struct Integrator {
    phase: Phase,
    /// Step of the previous completed lap, once one exists.
    last_dt: Option<f64>,
    laps: u64,
    min_dt: f64,
    max_dt: f64,
}

impl Default for Integrator {
    fn default() -> Self {
        Self::new(MIN_DT, MAX_DT)
    }
}

impl Integrator {
    /// Creates a cold integrator clamping steps to `[min_dt, max_dt]`.
    #[must_use]
    pub fn new(min_dt: f64, max_dt: f64) -> Self {
        Self {
            phase: Phase::Cold,
            last_dt: None,
            laps: 0,
            min_dt,
            max_dt,
        }
    }

    /// Current phase (the one the next lap will run).
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Completed laps.
    #[inline]
    #[must_use]
    pub fn laps(&self) -> u64 {
        self.laps
    }

    /// Clamps a raw step into the accepted range.
    #[must_use]
    pub fn clamp(&self, dt: f64) -> f64 {
        if dt.is_nan() {
            return self.min_dt;
        }
        dt.clamp(self.min_dt, self.max_dt)
    }

    /// Coefficients the next lap would apply for a step of `dt`.
    #[must_use]
    pub fn factors(&self, dt: f64) -> StepFactors {
        let dt = self.clamp(dt);
        let (factor0, factor1) = match (self.phase, self.last_dt) {
            (Phase::Cold, _) => (0.0, 0.0),
            (Phase::Warming, _) | (Phase::Steady, None) => (0.0, 0.5 * dt * dt),
            (Phase::Steady, Some(last)) => (dt / last, dt * dt),
        };
        StepFactors {
            phase: self.phase,
            dt,
            factor0,
            factor1,
        }
    }

    /// Runs one lap.
    ///
    /// `back` holds `previous` on entry and the future state on return.
    /// All slices must have the same length.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the slice lengths differ.
    pub fn advance(&mut self, dt: f64, current: &[Vec3], back: &mut [Vec3], force: &[Vec3]) -> StepFactors {
        debug_assert_eq!(current.len(), back.len());
        debug_assert_eq!(current.len(), force.len());

        let step = self.factors(dt);
        match step.phase {
            Phase::Cold => back.copy_from_slice(current),
            Phase::Warming => {
                for ((b, &c), &f) in back.iter_mut().zip(current).zip(force) {
                    *b = c + f * step.factor1;
                }
            }
            Phase::Steady => {
                for ((b, &c), &f) in back.iter_mut().zip(current).zip(force) {
                    let previous = *b;
                    *b = c + (c - previous) * step.factor0 + f * step.factor1;
                }
            }
        }

        // Cold has no meaningful step: the lap only establishes a sample.
        self.last_dt = match step.phase {
            Phase::Cold => None,
            Phase::Warming | Phase::Steady => Some(step.dt),
        };
        self.phase = self.phase.next();
        self.laps += 1;
        step
    }
}
