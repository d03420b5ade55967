//! # Stage Kernels
//!
//! The compute step of a stage. A worker runs
//! `wait; kernel.step(object, state, dt); post` forever; the kernel never
//! sees the ring.

use std::fmt;

use lockstep_shared::{ROLE_COLLISION, ROLE_INTERSECTION, ROLE_PHYSICS};

use crate::model::Aabb;
use crate::object::{SimObject, SimState};

/// One stage's compute step.
pub trait StageKernel: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Runs while the stage holds the token. `dt` is the wall-clock time
    /// since this stage's previous lap, in seconds.
    fn step(&mut self, object: &SimObject, state: &mut SimState, dt: f64);
}

impl fmt::Debug for dyn StageKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kernel for a built-in role, or `None` if the role has none.
///
/// `ground` is the collision plane height.
#[must_use]
pub fn builtin(role: &str, ground: f64) -> Option<Box<dyn StageKernel>> {
    match role {
        ROLE_PHYSICS => Some(Box::new(PhysicsKernel)),
        ROLE_COLLISION => Some(Box::new(CollisionKernel::new(ground))),
        ROLE_INTERSECTION => Some(Box::new(IntersectionKernel)),
        _ => None,
    }
}

// ============================================================================
// PHYSICS
// ============================================================================

/// Applies pending touches, then runs one integrator lap (which swaps).
///
/// Uses the object's `fixed_dt` when configured, the measured `dt`
/// otherwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhysicsKernel;

impl StageKernel for PhysicsKernel {
    fn name(&self) -> &'static str {
        "physics"
    }

    fn step(&mut self, object: &SimObject, state: &mut SimState, dt: f64) {
        object.apply_input(state);
        let dt = object.physics().fixed_dt.unwrap_or(dt);
        let step = state.integrate(object.model(), object.physics(), dt);
        tracing::trace!(object = %object.id(), lap = state.lap(), phase = ?step.phase, dt = step.dt, "physics lap");
    }
}

// ============================================================================
// COLLISION
// ============================================================================

/// Projects free vertices below a horizontal ground plane back onto it.
#[derive(Clone, Copy, Debug)]
pub struct CollisionKernel {
    ground: f64,
}

impl CollisionKernel {
    /// Creates a kernel for the plane `y = ground`.
    #[must_use]
    pub const fn new(ground: f64) -> Self {
        Self { ground }
    }

    /// Plane height.
    #[must_use]
    pub const fn ground(&self) -> f64 {
        self.ground
    }
}

impl StageKernel for CollisionKernel {
    fn name(&self) -> &'static str {
        "collision"
    }

    fn step(&mut self, object: &SimObject, state: &mut SimState, _dt: f64) {
        let inv_mass = object.model().inv_mass();
        let mut contacts = 0;
        for (p, &w) in state.positions_mut().current_mut().iter_mut().zip(inv_mass) {
            if w != 0.0 && p.y < self.ground {
                p.y = self.ground;
                contacts += 1;
            }
        }
        state.set_contacts(contacts);
    }
}

// ============================================================================
// INTERSECTION
// ============================================================================

/// Refreshes the object-space bounds of the committed buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntersectionKernel;

impl StageKernel for IntersectionKernel {
    fn name(&self) -> &'static str {
        "intersection"
    }

    fn step(&mut self, _object: &SimObject, state: &mut SimState, _dt: f64) {
        let bounds = Aabb::from_points(state.positions().current());
        state.set_bounds(bounds);
    }
}

// ============================================================================
// CLOSURE
// ============================================================================

/// Adapts a closure. Used for custom roles and in tests.
pub struct FnKernel<F> {
    name: &'static str,
    f: F,
}

impl<F> FnKernel<F>
where
    F: FnMut(&SimObject, &mut SimState, f64) + Send,
{
    /// Wraps `f`.
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> StageKernel for FnKernel<F>
where
    F: FnMut(&SimObject, &mut SimState, f64) + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn step(&mut self, object: &SimObject, state: &mut SimState, dt: f64) {
        (self.f)(object, state, dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectId;
    use lockstep_core::RingBuilder;
    use lockstep_shared::{ModelData, PhysicsConfig, Vec3};
    use std::sync::Arc;

    use crate::capability::SoftBody;
    use crate::model::Model;

    fn hanging_pair(physics: PhysicsConfig) -> SimObject {
        let model = Model::from_data(
            "pair",
            &ModelData {
                vertices: vec![Vec3::ZERO, Vec3::new(0.0, -1.0, 0.0)],
                edges: vec![[0, 1]],
                masses: Vec::new(),
                pinned: vec![0],
            },
        )
        .unwrap();
        let ring = RingBuilder::new().slot(1).stage("work", 0, 0).build().unwrap();
        SimObject::new(ObjectId::new("pair", "test"), Box::new(SoftBody), Arc::new(model), physics, ring)
    }

    fn run(object: &SimObject, kernel: &mut dyn StageKernel, dt: f64) {
        let gate = object.ring().require("work").unwrap().clone();
        object.run_stage(&gate, |state| kernel.step(object, state, dt)).unwrap();
    }

    #[test]
    fn test_builtin_roles() {
        assert_eq!(builtin("physics", 0.0).unwrap().name(), "physics");
        assert_eq!(builtin("collision", 0.0).unwrap().name(), "collision");
        assert_eq!(builtin("intersection", 0.0).unwrap().name(), "intersection");
        assert!(builtin("graphics", 0.0).is_none());
        assert!(builtin("audio", 0.0).is_none());
    }

    #[test]
    fn test_physics_uses_fixed_dt_and_falls() {
        let physics = PhysicsConfig {
            fixed_dt: Some(0.01),
            ..PhysicsConfig::default()
        };
        let object = hanging_pair(physics);
        let mut kernel = PhysicsKernel;

        // measured dt is ignored in favour of fixed_dt
        for _ in 0..3 {
            run(&object, &mut kernel, 5.0);
        }

        object.inspect(|state| {
            let step = state.last_step().unwrap();
            assert_eq!(step.dt, 0.01);
            assert_eq!(state.lap(), 3);
            let free = state.positions().current()[1];
            assert!(free.y < -1.0, "free vertex should sag under gravity: {free:?}");
            assert_eq!(state.positions().current()[0], Vec3::ZERO);
        });
    }

    #[test]
    fn test_collision_projects_free_vertices() {
        let object = hanging_pair(PhysicsConfig::default());
        let mut kernel = CollisionKernel::new(-0.5);
        run(&object, &mut kernel, 0.0);

        object.inspect(|state| {
            assert_eq!(state.contacts(), 1);
            assert_eq!(state.positions().current()[1].y, -0.5);
            // collision edits in place, no swap
            assert_eq!(state.lap(), 0);
        });
    }

    #[test]
    fn test_intersection_refreshes_bounds() {
        let object = hanging_pair(PhysicsConfig::default());
        let mut touch = FnKernel::new("touch", |_: &SimObject, state: &mut SimState, _| {
            state.positions_mut().current_mut()[1] = Vec3::new(2.0, -3.0, 0.0);
        });
        run(&object, &mut touch, 0.0);
        run(&object, &mut IntersectionKernel, 0.0);

        object.inspect(|state| {
            let bounds = state.bounds().unwrap();
            assert_eq!(bounds.min, Vec3::new(0.0, -3.0, 0.0));
            assert_eq!(bounds.max, Vec3::new(2.0, 0.0, 0.0));
        });
    }
}
