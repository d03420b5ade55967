//! # Orchestrator
//!
//! Owns every module and the render consumer.
//!
//! ```text
//! from_config ─► create modules (publish objects)
//!             ─► synchronize (cross-module bindings)
//!             ─► verify: every non-graphics stage driven exactly once
//! start       ─► module.run() for each module
//! render(N)   ─► dedicated render thread, N frames, joined
//! shutdown    ─► close every ring, cleanup modules in reverse order
//! ```
//!
//! Everything that can be wrong with a scene is reported by `from_config`,
//! before a single worker exists.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use lockstep_core::Role;
use lockstep_shared::SceneConfig;

use crate::error::{EngineError, EngineResult};
use crate::module::{ModuleRegistry, PluginModule, Registry};
use crate::object::{ObjectId, SimObject};
use crate::render::{Canvas, RenderConsumer, RenderStats};
use crate::worker::WorkerReport;

/// Orchestrator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Built and verified, no workers.
    Built,
    /// Workers running.
    Running,
    /// Every worker joined.
    Stopped,
}

impl Lifecycle {
    const fn describe(self) -> &'static str {
        match self {
            Self::Built => "not started",
            Self::Running => "already running",
            Self::Stopped => "stopped",
        }
    }
}

/// Outcome of [`Orchestrator::run`].
#[derive(Debug)]
pub struct RunSummary<C> {
    /// The canvas, after the last frame.
    pub canvas: C,
    /// Render statistics.
    pub stats: RenderStats,
    /// One report per worker.
    pub reports: Vec<WorkerReport>,
}

/// Owner of all modules and the render consumer.
pub struct Orchestrator {
    registry: Registry,
    modules: Vec<Box<dyn PluginModule>>,
    frames: u64,
    lifecycle: Lifecycle,
}

impl Orchestrator {
    /// Builds a scene with the built-in module kinds.
    ///
    /// # Errors
    ///
    /// Returns the first construction, binding or verification error.
    pub fn from_config(scene: &SceneConfig) -> EngineResult<Self> {
        Self::with_modules(scene, &ModuleRegistry::with_builtins())
    }

    /// Builds a scene with a custom factory map.
    ///
    /// # Errors
    ///
    /// Returns the first construction, binding or verification error.
    pub fn with_modules(scene: &SceneConfig, factories: &ModuleRegistry) -> EngineResult<Self> {
        let mut registry = Registry::new();
        let mut modules = Vec::with_capacity(scene.modules.len());
        for config in &scene.modules {
            modules.push(factories.create(config, &mut registry)?);
        }
        for (module, config) in modules.iter_mut().zip(&scene.modules) {
            module.synchronize(config, &registry)?;
        }
        verify_bindings(&registry, &modules)?;

        tracing::info!(
            modules = modules.len(),
            objects = registry.len(),
            frames = scene.frames,
            "scene built"
        );
        Ok(Self {
            registry,
            modules,
            frames: scene.frames,
            lifecycle: Lifecycle::Built,
        })
    }

    /// Published objects.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Looks up an object.
    #[must_use]
    pub fn object(&self, name: &str, owner: &str) -> Option<&Arc<SimObject>> {
        self.registry.get(name, owner)
    }

    /// Loaded modules, in creation order.
    #[must_use]
    pub fn modules(&self) -> &[Box<dyn PluginModule>] {
        &self.modules
    }

    /// Frames the scene asks for.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Spawns every module's workers.
    ///
    /// # Errors
    ///
    /// Fails if not freshly built or a worker cannot be spawned; in the
    /// latter case every worker already started is shut down.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.lifecycle != Lifecycle::Built {
            return Err(EngineError::Lifecycle(self.lifecycle.describe()));
        }
        self.lifecycle = Lifecycle::Running;
        if let Err(err) = self.modules.iter_mut().try_for_each(|module| module.run()) {
            self.shutdown();
            return Err(err);
        }
        Ok(())
    }

    /// Renders `frames` frames on a dedicated thread and waits for it.
    ///
    /// # Errors
    ///
    /// Fails if not running, if the render thread cannot be spawned or
    /// panics, or if a ring is closed mid-frame.
    pub fn render<C>(&mut self, frames: u64, canvas: C) -> EngineResult<(C, RenderStats)>
    where
        C: Canvas + 'static,
    {
        if self.lifecycle != Lifecycle::Running {
            return Err(EngineError::Lifecycle(self.lifecycle.describe()));
        }

        let mut consumer = RenderConsumer::new(self.registry.iter());
        let name = "lockstep-render".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut canvas = canvas;
                let result = consumer.run(frames, &mut canvas);
                (canvas, result)
            })
            .map_err(|source| EngineError::Spawn { name, source })?;

        let (canvas, result) = handle.join().map_err(|_| EngineError::RenderPanicked)?;
        let stats = result?;
        tracing::info!(frames = stats.frames, draws = stats.draws, elapsed = ?stats.elapsed, "render finished");
        Ok((canvas, stats))
    }

    /// Closes every ring and joins every worker, newest module first.
    ///
    /// Idempotent: returns nothing once stopped.
    pub fn shutdown(&mut self) -> Vec<WorkerReport> {
        if self.lifecycle == Lifecycle::Stopped {
            return Vec::new();
        }
        for object in self.registry.iter() {
            object.ring().close();
        }
        let mut reports = Vec::new();
        for module in self.modules.iter_mut().rev() {
            reports.extend(module.cleanup());
        }
        self.lifecycle = Lifecycle::Stopped;
        tracing::info!(workers = reports.len(), "orchestrator stopped");
        reports
    }

    /// Starts, renders the scene's frame count into `canvas`, and shuts
    /// down.
    ///
    /// # Errors
    ///
    /// As for [`Orchestrator::start`] and [`Orchestrator::render`]; workers
    /// are shut down on every path.
    pub fn run<C>(&mut self, canvas: C) -> EngineResult<RunSummary<C>>
    where
        C: Canvas + 'static,
    {
        self.start()?;
        let rendered = self.render(self.frames, canvas);
        let reports = self.shutdown();
        let (canvas, stats) = rendered?;
        Ok(RunSummary { canvas, stats, reports })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("modules", &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("objects", &self.registry.len())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Every non-graphics stage must be driven by exactly one module.
fn verify_bindings(registry: &Registry, modules: &[Box<dyn PluginModule>]) -> EngineResult<()> {
    let mut drivers: HashMap<(ObjectId, Role), &str> = HashMap::new();
    for module in modules {
        for (object, role) in module.drives() {
            if let Some(first) = drivers.get(&(object.clone(), role.clone())) {
                return Err(EngineError::DuplicateBinding {
                    object: object.to_string(),
                    role: role.to_string(),
                    first: (*first).to_string(),
                    second: module.name().to_string(),
                });
            }
            drivers.insert((object, role), module.name());
        }
    }

    for object in registry.iter() {
        for gate in object.ring().gates() {
            if gate.role.is_graphics() {
                continue;
            }
            if !drivers.contains_key(&(object.id().clone(), gate.role.clone())) {
                return Err(EngineError::UnboundStage {
                    object: object.id().to_string(),
                    role: gate.role.to_string(),
                });
            }
        }
    }
    Ok(())
}
