//! # LOCKSTEP
//!
//! Simulation objects whose stages (physics, collision, intersection,
//! graphics) take turns on shared state by relaying one token around a
//! semaphore ring.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────── Orchestrator ─────────────────────────────┐
//! │                                                                        │
//! │  ┌──────────────┐   ┌──────────────┐        ┌───────────────────────┐  │
//! │  │ PluginModule │   │ PluginModule │  ...   │ Render Consumer       │  │
//! │  │  (softbody)  │   │ (collision)  │        │ (one thread, graphics │  │
//! │  │  objects     │   │  bindings ───┼──┐     │  gate of every object)│  │
//! │  │  workers     │   │  workers     │  │     └───────────┬───────────┘  │
//! │  └──────┬───────┘   └──────────────┘  │                 │              │
//! │         │                             │                 │              │
//! │         ▼                             ▼                 ▼              │
//! │  ┌──────────────────────── SimObject ─────────────────────────────┐    │
//! │  │ graphics ──► physics ──► collision ──► graphics   (StageRing)  │    │
//! │  │ DoubleBuffer<Vec3> + Integrator                    (SimState)  │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `model`: static vertex/edge/mass data and bounds
//! - `object`: `SimObject`, its state and its command mailboxes
//! - `capability`: draw/touch/transform/reprogram per object variant
//! - `kernel`: the compute step of each built-in role
//! - `worker`: one thread per (object, non-graphics stage)
//! - `render`: the render consumer and the `Canvas` it draws into
//! - `module`: plugin modules and the static factory map
//! - `orchestrator`: scene construction, verification and shutdown

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod capability;
pub mod error;
pub mod kernel;
pub mod model;
pub mod module;
pub mod object;
pub mod orchestrator;
pub mod render;
pub mod worker;

// Re-export the substrate
pub use lockstep_core as substrate;
pub use lockstep_shared as shared;

// Re-export commonly used types
pub use capability::{Capabilities, Drawable, Reprogrammable, Touchable, Transformable};
pub use error::{EngineError, EngineResult};
pub use kernel::{CollisionKernel, FnKernel, IntersectionKernel, PhysicsKernel, StageKernel};
pub use model::{Aabb, Edge, Model};
pub use module::{ModuleFactory, ModuleRegistry, PluginModule, Registry, StageModule};
pub use object::{Command, ObjectAdvisory, ObjectId, SimObject, SimState};
pub use orchestrator::{Lifecycle, Orchestrator, RunSummary};
pub use render::{Canvas, DrawItem, DrawMode, DrawRecord, FrameRecorder, RenderConsumer, RenderStats};
pub use worker::{LapClock, StageWorker, WorkerExit, WorkerReport, WorkerState};
