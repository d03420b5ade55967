//! # Object Capabilities
//!
//! What an object can do beyond being simulated, expressed as one trait per
//! capability. A variant exposes the capabilities it has through
//! [`Capabilities`]; a request for a capability the variant lacks is
//! skipped.
//!
//! | Variant    | draw | touch | transform | reprogram |
//! |------------|------|-------|-----------|-----------|
//! | `SoftBody` | yes  | yes   | yes       | yes       |
//! | `Anchor`   | yes  | -     | yes       | -         |
//!
//! Every method receives the object's state by `&mut` or `&`, which only
//! the stage holding the token can provide.

use std::fmt;

use lockstep_shared::{ObjectVariant, Transform, Vec3};

use crate::model::Model;
use crate::object::{ObjectId, SimState};
use crate::render::{Canvas, DrawItem, DrawMode};

/// Presents the committed buffer to a canvas.
pub trait Drawable {
    /// Draws the object as of `state`.
    fn draw(&self, id: &ObjectId, frame: u64, model: &Model, state: &SimState, canvas: &mut dyn Canvas);
}

/// Accepts direct manipulation of vertices.
pub trait Touchable {
    /// Displaces `vertex` by `offset` in the committed buffer. Returns
    /// false if the touch was ignored.
    fn touch(&self, model: &Model, state: &mut SimState, vertex: usize, offset: Vec3) -> bool;
}

/// Accepts a presentation transform.
pub trait Transformable {
    /// Applies `transform` after the current presentation transform.
    fn transform(&self, state: &mut SimState, transform: Transform);
}

/// Accepts a new presentation program.
pub trait Reprogrammable {
    /// Replaces the program name used at draw time.
    fn reprogram(&self, state: &mut SimState, program: String);
}

/// Capability lookup for one object variant.
pub trait Capabilities: Send + Sync + fmt::Debug {
    /// The variant these capabilities belong to.
    fn variant(&self) -> ObjectVariant;

    /// Draw capability.
    fn drawable(&self) -> Option<&dyn Drawable> {
        None
    }

    /// Touch capability.
    fn touchable(&self) -> Option<&dyn Touchable> {
        None
    }

    /// Transform capability.
    fn transformable(&self) -> Option<&dyn Transformable> {
        None
    }

    /// Reprogram capability.
    fn reprogrammable(&self) -> Option<&dyn Reprogrammable> {
        None
    }
}

/// Capabilities of a configured variant.
#[must_use]
pub fn for_variant(variant: ObjectVariant) -> Box<dyn Capabilities> {
    match variant {
        ObjectVariant::SoftBody => Box::new(SoftBody),
        ObjectVariant::Anchor => Box::new(Anchor),
    }
}

// ============================================================================
// SOFT BODY
// ============================================================================

/// Mass-spring body: drawn as a wireframe, fully interactive.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftBody;

impl Drawable for SoftBody {
    fn draw(&self, id: &ObjectId, frame: u64, model: &Model, state: &SimState, canvas: &mut dyn Canvas) {
        canvas.draw(&DrawItem::new(id, frame, state, DrawMode::Wireframe(model.edges())));
    }
}

impl Touchable for SoftBody {
    fn touch(&self, model: &Model, state: &mut SimState, vertex: usize, offset: Vec3) -> bool {
        if vertex >= model.vertex_count() || model.is_pinned(vertex) || !offset.is_finite() {
            return false;
        }
        state.positions_mut().current_mut()[vertex] += offset;
        true
    }
}

impl Transformable for SoftBody {
    fn transform(&self, state: &mut SimState, transform: Transform) {
        state.set_transform(transform.then(&state.transform()));
    }
}

impl Reprogrammable for SoftBody {
    fn reprogram(&self, state: &mut SimState, program: String) {
        state.set_program(program);
    }
}

impl Capabilities for SoftBody {
    fn variant(&self) -> ObjectVariant {
        ObjectVariant::SoftBody
    }

    fn drawable(&self) -> Option<&dyn Drawable> {
        Some(self)
    }

    fn touchable(&self) -> Option<&dyn Touchable> {
        Some(self)
    }

    fn transformable(&self) -> Option<&dyn Transformable> {
        Some(self)
    }

    fn reprogrammable(&self) -> Option<&dyn Reprogrammable> {
        Some(self)
    }
}

// ============================================================================
// ANCHOR
// ============================================================================

/// Static body: every vertex pinned, drawn as points, movable only as a
/// whole.
#[derive(Clone, Copy, Debug, Default)]
pub struct Anchor;

impl Drawable for Anchor {
    fn draw(&self, id: &ObjectId, frame: u64, _model: &Model, state: &SimState, canvas: &mut dyn Canvas) {
        canvas.draw(&DrawItem::new(id, frame, state, DrawMode::Points));
    }
}

impl Transformable for Anchor {
    fn transform(&self, state: &mut SimState, transform: Transform) {
        state.set_transform(transform.then(&state.transform()));
    }
}

impl Capabilities for Anchor {
    fn variant(&self) -> ObjectVariant {
        ObjectVariant::Anchor
    }

    fn drawable(&self) -> Option<&dyn Drawable> {
        Some(self)
    }

    fn transformable(&self) -> Option<&dyn Transformable> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_shared::{ModelData, PhysicsConfig};

    fn model() -> Model {
        Model::from_data(
            "pair",
            &ModelData {
                vertices: vec![Vec3::ZERO, Vec3::X],
                edges: vec![[0, 1]],
                masses: Vec::new(),
                pinned: vec![0],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_variant_capability_table() {
        let soft = for_variant(ObjectVariant::SoftBody);
        assert!(soft.drawable().is_some());
        assert!(soft.touchable().is_some());
        assert!(soft.transformable().is_some());
        assert!(soft.reprogrammable().is_some());

        let anchor = for_variant(ObjectVariant::Anchor);
        assert_eq!(anchor.variant(), ObjectVariant::Anchor);
        assert!(anchor.drawable().is_some());
        assert!(anchor.touchable().is_none());
        assert!(anchor.transformable().is_some());
        assert!(anchor.reprogrammable().is_none());
    }

    #[test]
    fn test_touch_skips_pinned_and_out_of_range() {
        let model = model();
        let mut state = SimState::new(&model, &PhysicsConfig::default());
        let offset = Vec3::new(0.0, 0.5, 0.0);

        assert!(!SoftBody.touch(&model, &mut state, 0, offset));
        assert!(!SoftBody.touch(&model, &mut state, 9, offset));
        assert!(SoftBody.touch(&model, &mut state, 1, offset));
        assert_eq!(state.positions().current()[1], Vec3::new(1.0, 0.5, 0.0));
    }

    #[test]
    fn test_transforms_compose() {
        let model = model();
        let mut state = SimState::new(&model, &PhysicsConfig::default());
        SoftBody.transform(&mut state, Transform::new(Vec3::X, 1.0));
        SoftBody.transform(&mut state, Transform::new(Vec3::ZERO, 2.0));
        // scale after translate: the translation is scaled too
        assert_eq!(state.transform(), Transform::new(Vec3::new(2.0, 0.0, 0.0), 2.0));
    }
}
