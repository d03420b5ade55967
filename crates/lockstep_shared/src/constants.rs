//! # Stage Roles & Physics Defaults
//!
//! **CRITICAL:** The role names are matched against scene files verbatim.
//! Renaming one breaks every scene that declares it.

// =============================================================================
// STAGE ROLES
// =============================================================================

/// Physics integrator stage. Owns the double-buffer swap.
pub const ROLE_PHYSICS: &str = "physics";

/// Collision response stage, usually driven by a collision module.
pub const ROLE_COLLISION: &str = "collision";

/// Intersection stage (ray/volume queries against the committed buffer).
pub const ROLE_INTERSECTION: &str = "intersection";

/// Rendering stage. Driven by the render consumer, never by a worker.
pub const ROLE_GRAPHICS: &str = "graphics";

// =============================================================================
// PHYSICS DEFAULTS
// =============================================================================

/// Default spring stiffness for edge constraints.
pub const DEFAULT_STIFFNESS: f64 = 50.0;

/// Default gravity (units per second squared, +Y is up).
pub const DEFAULT_GRAVITY: [f64; 3] = [0.0, -9.81, 0.0];

/// Default vertex mass when the model carries no mass table.
pub const DEFAULT_MASS: f64 = 1.0;

/// Smallest time step the integrator accepts (seconds).
///
/// Keeps `dtN / dt(N-1)` finite when two laps complete within the clock
/// resolution.
pub const MIN_DT: f64 = 1.0e-6;

/// Largest time step the integrator accepts (seconds).
///
/// Clamps the step after a stall (debugger, suspended process) so the
/// corrector does not explode.
pub const MAX_DT: f64 = 0.1;

// =============================================================================
// RUNTIME DEFAULTS
// =============================================================================

/// Frames rendered by `lockstep run` when the scene does not say.
pub const DEFAULT_FRAMES: u64 = 600;

/// Capacity of a per-object command mailbox.
pub const MAILBOX_CAPACITY: usize = 64;

/// Largest vertex count a generated grid may have.
pub const MAX_GRID_VERTICES: usize = 1 << 20;
