//! # Plugin Modules
//!
//! A module owns a subset of the scene's objects and the workers that drive
//! their stages. Modules are created through a static factory map keyed by
//! kind; there is no dynamic loading.
//!
//! ## Lifecycle
//!
//! ```text
//! factory(config, &mut registry)   build objects, publish them
//! synchronize(config, &registry)   resolve bindings to foreign objects
//! run()                            one worker per driven stage
//! cleanup()                        close driven rings, join, report
//! ```
//!
//! ## Built-in Kinds
//!
//! | Kind        | Drives on its own objects | Bindings            |
//! |-------------|---------------------------|---------------------|
//! | `softbody`  | `physics`                 | any built-in kernel |
//! | `collision` | `collision`, `intersection` | any built-in kernel |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use lockstep_core::Role;
use lockstep_shared::{ModuleConfig, ROLE_COLLISION, ROLE_INTERSECTION, ROLE_PHYSICS};

use crate::error::{EngineError, EngineResult};
use crate::kernel;
use crate::object::{ObjectId, SimObject};
use crate::worker::{StageWorker, WorkerReport};

// ============================================================================
// OBJECT REGISTRY
// ============================================================================

/// Every published object, in publication order.
#[derive(Debug, Default)]
pub struct Registry {
    objects: Vec<Arc<SimObject>>,
    index: HashMap<ObjectId, usize>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an object.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DuplicateObject` if the identity is taken.
    pub fn publish(&mut self, object: Arc<SimObject>) -> EngineResult<()> {
        let id = object.id().clone();
        if self.index.contains_key(&id) {
            return Err(lockstep_shared::ConfigError::DuplicateObject {
                name: id.name,
                owner: id.owner,
            }
            .into());
        }
        self.index.insert(id, self.objects.len());
        self.objects.push(object);
        Ok(())
    }

    /// Looks up an object by name and owner.
    #[must_use]
    pub fn get(&self, name: &str, owner: &str) -> Option<&Arc<SimObject>> {
        self.by_id(&ObjectId::new(name, owner))
    }

    /// Looks up an object by identity.
    #[must_use]
    pub fn by_id(&self, id: &ObjectId) -> Option<&Arc<SimObject>> {
        self.index.get(id).map(|&i| &self.objects[i])
    }

    /// Objects in publication order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SimObject>> {
        self.objects.iter()
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing was published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

// ============================================================================
// MODULE TRAIT
// ============================================================================

/// A composed owner of objects and workers.
pub trait PluginModule: Send {
    /// Module name (unique in the scene).
    fn name(&self) -> &str;

    /// Factory kind.
    fn kind(&self) -> &str;

    /// Objects this module owns.
    fn objects(&self) -> &[Arc<SimObject>];

    /// Every (object, role) this module will drive once running.
    fn drives(&self) -> Vec<(ObjectId, Role)>;

    /// Binds to objects owned by other modules. Called once, after every
    /// module exists.
    ///
    /// # Errors
    ///
    /// Fails on unknown objects or roles.
    fn synchronize(&mut self, config: &ModuleConfig, registry: &Registry) -> EngineResult<()>;

    /// Spawns one worker per driven stage.
    ///
    /// # Errors
    ///
    /// Fails if a thread cannot be spawned or the module already runs.
    fn run(&mut self) -> EngineResult<()>;

    /// Running workers.
    fn workers(&self) -> &[StageWorker];

    /// Closes the rings this module drives and joins its workers.
    fn cleanup(&mut self) -> Vec<WorkerReport>;
}

/// Builds a module and publishes its objects.
pub type ModuleFactory = fn(&ModuleConfig, &mut Registry) -> EngineResult<Box<dyn PluginModule>>;

/// Static factory map.
#[derive(Clone, Debug, Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map holding the built-in kinds.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("softbody", softbody);
        registry.register("collision", collision);
        registry
    }

    /// Registers a factory, returning the one it replaces.
    pub fn register(&mut self, kind: impl Into<String>, factory: ModuleFactory) -> Option<ModuleFactory> {
        self.factories.insert(kind.into(), factory)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Builds the module `config` describes.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownModule` for an unregistered kind, or
    /// whatever the factory returns.
    pub fn create(&self, config: &ModuleConfig, registry: &mut Registry) -> EngineResult<Box<dyn PluginModule>> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| EngineError::UnknownModule {
            module: config.name.clone(),
            kind: config.kind.clone(),
        })?;
        let module = factory(config, registry)?;
        tracing::debug!(module = %config.name, kind = %config.kind, objects = module.objects().len(), "module created");
        Ok(module)
    }
}

// ============================================================================
// BUILT-IN MODULES
// ============================================================================

/// A stage this module will drive.
#[derive(Debug)]
struct Drive {
    object: Arc<SimObject>,
    role: Role,
    ground: f64,
}

/// Built-in module: drives a fixed role set on its own objects plus any
/// bound foreign stages with the built-in kernels.
#[derive(Debug)]
pub struct StageModule {
    name: String,
    kind: &'static str,
    objects: Vec<Arc<SimObject>>,
    plan: Vec<Drive>,
    workers: Vec<StageWorker>,
    max_laps: Option<u64>,
}

impl StageModule {
    /// Builds the module's objects, publishes them and plans the stages of
    /// `own_roles` each object declares.
    ///
    /// # Errors
    ///
    /// Fails if an object cannot be built or its identity is taken.
    pub fn build(
        kind: &'static str,
        own_roles: &[&str],
        config: &ModuleConfig,
        registry: &mut Registry,
    ) -> EngineResult<Self> {
        let mut objects = Vec::with_capacity(config.objects.len());
        let mut plan = Vec::new();

        for object_config in &config.objects {
            let object = Arc::new(SimObject::from_config(object_config)?);
            registry.publish(Arc::clone(&object))?;
            for &role in own_roles {
                if object.ring().gate(role).is_some() {
                    plan.push(Drive {
                        object: Arc::clone(&object),
                        role: Role::new(role),
                        ground: 0.0,
                    });
                }
            }
            objects.push(object);
        }

        Ok(Self {
            name: config.name.clone(),
            kind,
            objects,
            plan,
            workers: Vec::new(),
            max_laps: None,
        })
    }

    /// Stops every worker after `laps` laps.
    #[must_use]
    pub fn with_max_laps(mut self, laps: u64) -> Self {
        self.max_laps = Some(laps);
        self
    }
}

impl PluginModule for StageModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn objects(&self) -> &[Arc<SimObject>] {
        &self.objects
    }

    fn drives(&self) -> Vec<(ObjectId, Role)> {
        self.plan
            .iter()
            .map(|d| (d.object.id().clone(), d.role.clone()))
            .collect()
    }

    fn synchronize(&mut self, config: &ModuleConfig, registry: &Registry) -> EngineResult<()> {
        for binding in &config.bindings {
            let object = registry.get(&binding.object, &binding.owner).ok_or_else(|| {
                EngineError::UnknownObject {
                    module: self.name.clone(),
                    object: binding.object.clone(),
                    owner: binding.owner.clone(),
                }
            })?;
            object.ring().require(&binding.role)?;
            if kernel::builtin(&binding.role, binding.ground).is_none() {
                return Err(EngineError::UnsupportedRole {
                    module: self.name.clone(),
                    object: object.id().to_string(),
                    role: binding.role.clone(),
                });
            }
            tracing::debug!(module = %self.name, object = %object.id(), role = %binding.role, "stage bound");
            self.plan.push(Drive {
                object: Arc::clone(object),
                role: Role::new(binding.role.as_str()),
                ground: binding.ground,
            });
        }
        Ok(())
    }

    fn run(&mut self) -> EngineResult<()> {
        if !self.workers.is_empty() {
            return Err(EngineError::Lifecycle("already running"));
        }
        for drive in &self.plan {
            let kernel = kernel::builtin(drive.role.as_str(), drive.ground).ok_or_else(|| {
                EngineError::UnsupportedRole {
                    module: self.name.clone(),
                    object: drive.object.id().to_string(),
                    role: drive.role.to_string(),
                }
            })?;
            let worker = StageWorker::spawn(
                &self.name,
                Arc::clone(&drive.object),
                drive.role.clone(),
                kernel,
                self.max_laps,
            )?;
            self.workers.push(worker);
        }
        tracing::info!(module = %self.name, workers = self.workers.len(), "module running");
        Ok(())
    }

    fn workers(&self) -> &[StageWorker] {
        &self.workers
    }

    fn cleanup(&mut self) -> Vec<WorkerReport> {
        for drive in &self.plan {
            drive.object.ring().close();
        }
        let reports: Vec<_> = self.workers.drain(..).map(StageWorker::join).collect();
        tracing::debug!(module = %self.name, workers = reports.len(), "module cleaned up");
        reports
    }
}

/// Factory for `softbody` modules.
///
/// # Errors
///
/// Fails if an object cannot be built.
pub fn softbody(config: &ModuleConfig, registry: &mut Registry) -> EngineResult<Box<dyn PluginModule>> {
    Ok(Box::new(StageModule::build("softbody", &[ROLE_PHYSICS], config, registry)?))
}

/// Factory for `collision` modules.
///
/// # Errors
///
/// Fails if an object cannot be built.
pub fn collision(config: &ModuleConfig, registry: &mut Registry) -> EngineResult<Box<dyn PluginModule>> {
    Ok(Box::new(StageModule::build(
        "collision",
        &[ROLE_COLLISION, ROLE_INTERSECTION],
        config,
        registry,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_shared::SceneConfig;

    const SCENE: &str = r#"
        [[module]]
        name = "cloth"
        kind = "softbody"

        [[module.object]]
        name = "flag"
        model = { source = "grid", rows = 2, cols = 2, spacing = 1.0 }
        slot = [{ index = 0, tokens = 1 }, { index = 1, tokens = 0 }, { index = 2, tokens = 0 }]
        stages = { graphics = { wait = 0, post = 1 }, physics = { wait = 1, post = 2 }, collision = { wait = 2, post = 0 } }

        [[module]]
        name = "floor"
        kind = "collision"

        [[module.bind]]
        object = "flag"
        owner = "cloth"
        role = "collision"
        ground = -3.0
    "#;

    #[test]
    fn test_registry_rejects_duplicates() {
        let scene = SceneConfig::from_toml_str(SCENE).unwrap();
        let mut registry = Registry::new();
        softbody(&scene.modules[0], &mut registry).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("flag", "cloth").is_some());

        let err = softbody(&scene.modules[0], &mut registry).err().unwrap();
        assert!(matches!(
            err,
            EngineError::Config(lockstep_shared::ConfigError::DuplicateObject { .. })
        ));
    }

    #[test]
    fn test_unknown_kind() {
        let mut scene = SceneConfig::from_toml_str(SCENE).unwrap();
        scene.modules[0].kind = "fluid".into();
        let err = ModuleRegistry::with_builtins()
            .create(&scene.modules[0], &mut Registry::new())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnknownModule { ref kind, .. } if kind == "fluid"));
    }

    #[test]
    fn test_builtin_kinds() {
        let registry = ModuleRegistry::with_builtins();
        assert_eq!(registry.kinds().collect::<Vec<_>>(), ["collision", "softbody"]);
    }

    #[test]
    fn test_synchronize_binds_foreign_stage() {
        let scene = SceneConfig::from_toml_str(SCENE).unwrap();
        let factories = ModuleRegistry::with_builtins();
        let mut registry = Registry::new();
        let cloth = factories.create(&scene.modules[0], &mut registry).unwrap();
        let mut floor = factories.create(&scene.modules[1], &mut registry).unwrap();

        assert_eq!(cloth.drives(), vec![(ObjectId::new("flag", "cloth"), Role::PHYSICS)]);
        assert!(floor.drives().is_empty());

        floor.synchronize(&scene.modules[1], &registry).unwrap();
        assert_eq!(floor.drives(), vec![(ObjectId::new("flag", "cloth"), Role::COLLISION)]);
    }

    #[test]
    fn test_synchronize_unknown_object() {
        let mut scene = SceneConfig::from_toml_str(SCENE).unwrap();
        scene.modules[1].bindings[0].owner = "nobody".into();
        let factories = ModuleRegistry::with_builtins();
        let mut registry = Registry::new();
        factories.create(&scene.modules[0], &mut registry).unwrap();
        let mut floor = factories.create(&scene.modules[1], &mut registry).unwrap();

        let err = floor.synchronize(&scene.modules[1], &registry).unwrap_err();
        assert!(matches!(err, EngineError::UnknownObject { .. }));
    }

    #[test]
    fn test_graphics_cannot_be_bound() {
        let mut scene = SceneConfig::from_toml_str(SCENE).unwrap();
        scene.modules[1].bindings[0].role = "graphics".into();
        let factories = ModuleRegistry::with_builtins();
        let mut registry = Registry::new();
        factories.create(&scene.modules[0], &mut registry).unwrap();
        let mut floor = factories.create(&scene.modules[1], &mut registry).unwrap();

        let err = floor.synchronize(&scene.modules[1], &registry).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedRole { .. }));
    }

    #[test]
    fn test_run_and_cleanup_with_lap_limit() {
        let scene = SceneConfig::from_toml_str(SCENE).unwrap();
        let mut registry = Registry::new();
        let mut cloth = StageModule::build("softbody", &[ROLE_PHYSICS], &scene.modules[0], &mut registry)
            .unwrap()
            .with_max_laps(0);
        cloth.run().unwrap();
        assert_eq!(cloth.workers().len(), 1);
        assert!(matches!(cloth.run(), Err(EngineError::Lifecycle(_))));

        let reports = cloth.cleanup();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].laps, 0);
        assert!(cloth.workers().is_empty());
    }
}
