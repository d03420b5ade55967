//! # Simulation Objects
//!
//! A [`SimObject`] couples static data with mutable state and the ring that
//! decides who may touch that state:
//!
//! ```text
//! ┌────────────────────────── SimObject ──────────────────────────┐
//! │ id (name, owner)      capabilities (per variant)              │
//! │ Arc<Model>            read-only, shared without locking       │
//! │ StageRing             graphics ─► physics ─► ... ─► graphics  │
//! │ Mutex<SimState>       ownership witness, never contended      │
//! │   DoubleBuffer<Vec3>  current / previous + select flag        │
//! │   Integrator          Cold ─► Warming ─► Steady               │
//! │ mailboxes             input (physics) / presentation (graphics)│
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The state lock never provides mutual exclusion: the ring does. Every
//! stage takes it with `try_lock` first and counts a failure as contention,
//! so a miswired ring shows up as a nonzero [`SimObject::contention`]
//! instead of a silent data race.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use lockstep_core::{
    DoubleBuffer, Integrator, Phase, RingAdvisory, RingBuilder, Role, StageGate, StageRing,
    StepFactors, SyncResult,
};
use lockstep_shared::constants::MAILBOX_CAPACITY;
use lockstep_shared::{ObjectConfig, ObjectVariant, PhysicsConfig, Transform, Vec3};
use parking_lot::Mutex;

use crate::capability::{self, Capabilities};
use crate::error::{EngineError, EngineResult};
use crate::model::{Aabb, Model};

// ============================================================================
// IDENTITY
// ============================================================================

/// Object identity, unique across the scene.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    /// Object name.
    pub name: String,
    /// Owning module.
    pub owner: String,
}

impl ObjectId {
    /// Creates an identity.
    #[must_use]
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

/// An input request, applied by the stage that owns the matching state.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Displace one vertex. Applied by the physics stage.
    Touch {
        /// Vertex index.
        vertex: usize,
        /// Displacement.
        offset: Vec3,
    },
    /// Compose a presentation transform. Applied by the graphics stage.
    Transform(Transform),
    /// Replace the presentation program. Applied by the graphics stage.
    Reprogram(String),
}

/// A bounded single-consumer queue.
#[derive(Debug)]
struct Mailbox {
    sender: Sender<Command>,
    receiver: Receiver<Command>,
}

impl Mailbox {
    fn new() -> Self {
        let (sender, receiver) = bounded(MAILBOX_CAPACITY);
        Self { sender, receiver }
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Mutable per-object state. Reachable only through
/// [`SimObject::run_stage`], i.e. only by the stage holding the token.
#[derive(Debug)]
pub struct SimState {
    positions: DoubleBuffer<Vec3>,
    force: Vec<Vec3>,
    integrator: Integrator,
    transform: Transform,
    program: String,
    bounds: Option<Aabb>,
    contacts: usize,
    last_step: Option<StepFactors>,
}

impl SimState {
    /// Fresh state at the model's rest positions.
    #[must_use]
    pub fn new(model: &Model, physics: &PhysicsConfig) -> Self {
        Self {
            positions: DoubleBuffer::new(model.rest().to_vec()),
            force: vec![Vec3::ZERO; model.vertex_count()],
            integrator: Integrator::new(physics.min_dt, physics.max_dt),
            transform: Transform::IDENTITY,
            program: String::new(),
            bounds: model.bounds(),
            contacts: 0,
            last_step: None,
        }
    }

    /// Double-buffered positions.
    #[must_use]
    pub fn positions(&self) -> &DoubleBuffer<Vec3> {
        &self.positions
    }

    /// Mutable double-buffered positions.
    pub fn positions_mut(&mut self) -> &mut DoubleBuffer<Vec3> {
        &mut self.positions
    }

    /// Forces of the last physics lap (already scaled by inverse mass).
    #[must_use]
    pub fn force(&self) -> &[Vec3] {
        &self.force
    }

    /// Integrator state.
    #[must_use]
    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    /// Completed physics laps (one swap each).
    #[must_use]
    pub fn lap(&self) -> u64 {
        self.positions.swaps()
    }

    /// Presentation transform.
    #[must_use]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Sets the presentation transform.
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Presentation program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Sets the presentation program.
    pub fn set_program(&mut self, program: String) {
        self.program = program;
    }

    /// Object-space bounds, as of the last intersection pass.
    #[must_use]
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Sets the bounds.
    pub fn set_bounds(&mut self, bounds: Option<Aabb>) {
        self.bounds = bounds;
    }

    /// Vertices resolved by the last collision pass.
    #[must_use]
    pub fn contacts(&self) -> usize {
        self.contacts
    }

    /// Records the last collision pass.
    pub fn set_contacts(&mut self, contacts: usize) {
        self.contacts = contacts;
    }

    /// Coefficients of the last physics lap.
    #[must_use]
    pub fn last_step(&self) -> Option<StepFactors> {
        self.last_step
    }

    /// One physics lap: recompute forces from `current`, write the future
    /// state into the back storage, restore pins, then swap.
    ///
    /// The swap and flag toggle are the last actions, so the caller must
    /// not touch positions after this returns and before it posts.
    pub fn integrate(&mut self, model: &Model, physics: &PhysicsConfig, dt: f64) -> StepFactors {
        let Self {
            positions,
            force,
            integrator,
            ..
        } = self;

        model.accumulate_forces(positions.current(), physics.stiffness, physics.gravity, force);
        let step = positions.advance(|current, back| {
            let step = integrator.advance(dt, current, back, force.as_slice());
            for &p in model.pinned() {
                back[p] = model.rest()[p];
            }
            step
        });
        self.last_step = Some(step);
        step
    }
}

// ============================================================================
// ADVISORIES
// ============================================================================

/// Non-fatal findings of the post-construction self-check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectAdvisory {
    /// A position storage does not match the vertex count.
    BufferLength {
        /// Vertex count.
        expected: usize,
        /// Storage length.
        found: usize,
    },
    /// The mass table does not cover every vertex.
    MassTable {
        /// Vertex count.
        expected: usize,
        /// Mass table length.
        found: usize,
    },
    /// A spring references a vertex the buffers do not hold.
    EdgeIndex {
        /// Edge index.
        edge: usize,
        /// Vertex count.
        vertex_count: usize,
    },
    /// A finding from ring construction.
    Ring(RingAdvisory),
}

impl fmt::Display for ObjectAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferLength { expected, found } => {
                write!(f, "position buffer holds {found} vertices, model has {expected}")
            }
            Self::MassTable { expected, found } => write!(
                f,
                "mass table has {found} entries for {expected} vertices; missing masses use the default"
            ),
            Self::EdgeIndex { edge, vertex_count } => {
                write!(f, "edge {edge} references a vertex outside 0..{vertex_count}")
            }
            Self::Ring(advisory) => write!(f, "{advisory}"),
        }
    }
}

// ============================================================================
// SIM OBJECT
// ============================================================================

/// An entity with double-buffered state and a stage ring.
#[derive(Debug)]
pub struct SimObject {
    id: ObjectId,
    capabilities: Box<dyn Capabilities>,
    model: Arc<Model>,
    physics: PhysicsConfig,
    ring: StageRing,
    state: Mutex<SimState>,
    /// Stages currently between enter and leave.
    occupancy: AtomicUsize,
    /// Entries that found another stage inside.
    overlaps: AtomicU64,
    /// `try_lock` failures on the state witness.
    contention: AtomicU64,
    input: Mailbox,
    presentation: Mailbox,
}

impl SimObject {
    /// Builds an object from its configuration: model, ring and state.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidModel` for an unusable model and
    /// `EngineError::Ring` for miswired stages.
    pub fn from_config(config: &ObjectConfig) -> EngineResult<Self> {
        let mut model = Model::from_source(&config.name, &config.model)?;
        if config.variant == ObjectVariant::Anchor {
            model = model.pin_all();
        }

        let ring = config
            .stages
            .iter()
            .fold(RingBuilder::new().slots(&config.initial_tokens()), |builder, (role, stage)| {
                builder.stage(Role::new(role.as_str()), stage.wait, stage.post)
            })
            .build()
            .map_err(|source| EngineError::Ring {
                object: config.name.clone(),
                source,
            })?;

        let object = Self::new(
            ObjectId::new(&config.name, &config.owner),
            capability::for_variant(config.variant),
            Arc::new(model),
            config.physics.clone(),
            ring,
        );
        for advisory in object.self_check() {
            tracing::warn!(object = %object.id, %advisory, "object self-check");
        }
        Ok(object)
    }

    /// Assembles an object from parts. The ring is used as given.
    #[must_use]
    pub fn new(
        id: ObjectId,
        capabilities: Box<dyn Capabilities>,
        model: Arc<Model>,
        physics: PhysicsConfig,
        ring: StageRing,
    ) -> Self {
        let state = SimState::new(&model, &physics);
        Self {
            id,
            capabilities,
            model,
            physics,
            ring,
            state: Mutex::new(state),
            occupancy: AtomicUsize::new(0),
            overlaps: AtomicU64::new(0),
            contention: AtomicU64::new(0),
            input: Mailbox::new(),
            presentation: Mailbox::new(),
        }
    }

    /// Identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Capabilities of this object's variant.
    #[must_use]
    pub fn capabilities(&self) -> &dyn Capabilities {
        self.capabilities.as_ref()
    }

    /// Static data.
    #[inline]
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Integrator parameters.
    #[must_use]
    pub fn physics(&self) -> &PhysicsConfig {
        &self.physics
    }

    /// The stage ring.
    #[must_use]
    pub fn ring(&self) -> &StageRing {
        &self.ring
    }

    /// Runs `f` on the state while holding `gate`'s token.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Closed` once the ring is closed.
    pub fn run_stage<R>(&self, gate: &StageGate, f: impl FnOnce(&mut SimState) -> R) -> SyncResult<R> {
        self.ring.pass(gate, || {
            if self.occupancy.fetch_add(1, Ordering::AcqRel) != 0 {
                self.overlaps.fetch_add(1, Ordering::Relaxed);
            }
            let result = {
                let mut state = if let Some(state) = self.state.try_lock() {
                    state
                } else {
                    self.contention.fetch_add(1, Ordering::Relaxed);
                    self.state.lock()
                };
                f(&mut state)
            };
            self.occupancy.fetch_sub(1, Ordering::AcqRel);
            result
        })
    }

    /// Times a stage entered while another was inside.
    #[must_use]
    pub fn overlaps(&self) -> u64 {
        self.overlaps.load(Ordering::Relaxed)
    }

    /// Times the state witness was found locked.
    #[must_use]
    pub fn contention(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    /// Reads the state outside the ring. For inspection after shutdown and
    /// in tests; counts as contention if a stage is inside.
    pub fn inspect<R>(&self, f: impl FnOnce(&SimState) -> R) -> R {
        let state = if let Some(state) = self.state.try_lock() {
            state
        } else {
            self.contention.fetch_add(1, Ordering::Relaxed);
            self.state.lock()
        };
        f(&state)
    }

    /// Current integrator phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inspect(|state| state.integrator().phase())
    }

    // ========================================================================
    // INPUT
    // ========================================================================

    /// Queues a command for the stage that applies it.
    ///
    /// Returns false if the mailbox is full; the command is dropped.
    pub fn send(&self, command: Command) -> bool {
        let mailbox = match command {
            Command::Touch { .. } => &self.input,
            Command::Transform(_) | Command::Reprogram(_) => &self.presentation,
        };
        match mailbox.sender.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                tracing::warn!(object = %self.id, ?command, "mailbox full, command dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Applies pending touches. Call from the physics stage.
    ///
    /// Returns the number applied; touches the variant cannot take are
    /// discarded.
    pub fn apply_input(&self, state: &mut SimState) -> usize {
        let mut applied = 0;
        for command in self.input.receiver.try_iter() {
            if let Command::Touch { vertex, offset } = command {
                if let Some(touchable) = self.capabilities.touchable() {
                    if touchable.touch(&self.model, state, vertex, offset) {
                        applied += 1;
                    }
                }
            }
        }
        applied
    }

    /// Applies pending transform and reprogram requests. Call from the
    /// graphics stage.
    pub fn apply_presentation(&self, state: &mut SimState) -> usize {
        let mut applied = 0;
        for command in self.presentation.receiver.try_iter() {
            match command {
                Command::Transform(t) => {
                    if let Some(cap) = self.capabilities.transformable() {
                        cap.transform(state, t);
                        applied += 1;
                    }
                }
                Command::Reprogram(program) => {
                    if let Some(cap) = self.capabilities.reprogrammable() {
                        cap.reprogram(state, program);
                        applied += 1;
                    }
                }
                Command::Touch { .. } => {}
            }
        }
        applied
    }

    // ========================================================================
    // SELF-CHECK
    // ========================================================================

    /// Post-construction consistency check. Findings are advisory.
    #[must_use]
    pub fn self_check(&self) -> Vec<ObjectAdvisory> {
        let n = self.model.vertex_count();
        let mut advisories = Vec::new();

        self.inspect(|state| {
            let positions = state.positions();
            for found in [positions.current().len(), positions.previous().len()] {
                if found != n {
                    advisories.push(ObjectAdvisory::BufferLength { expected: n, found });
                }
            }
        });

        let masses = self.model.mass_table_len();
        if masses != 0 && masses != n {
            advisories.push(ObjectAdvisory::MassTable {
                expected: n,
                found: masses,
            });
        }

        for (edge, e) in self.model.edges().iter().enumerate() {
            if e.a >= n || e.b >= n {
                advisories.push(ObjectAdvisory::EdgeIndex { edge, vertex_count: n });
            }
        }

        advisories.extend(self.ring.advisories().iter().cloned().map(ObjectAdvisory::Ring));
        advisories
    }
}
