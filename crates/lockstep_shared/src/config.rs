//! # Scene Configuration
//!
//! A scene is a list of modules; a module owns objects and may bind to
//! stages of objects owned by other modules.
//!
//! ```toml
//! frames = 600
//!
//! [[module]]
//! name = "cloth"
//! kind = "softbody"
//!
//! [[module.object]]
//! name = "flag"
//! model = { source = "grid", rows = 8, cols = 8, spacing = 0.1, pin_top_row = true }
//! slot = [{ index = 0, tokens = 1 }, { index = 1, tokens = 0 }]
//! stages = { graphics = { wait = 0, post = 1 }, physics = { wait = 1, post = 0 } }
//! ```
//!
//! Everything is validated eagerly: `SceneConfig::load` either returns a
//! scene whose slot tables and physics parameters are well formed, or a
//! `ConfigError`. Ring topology is validated later, when the stage ring is
//! built.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FRAMES, DEFAULT_GRAVITY, DEFAULT_MASS, DEFAULT_STIFFNESS, MAX_DT, MAX_GRID_VERTICES, MIN_DT,
};
use crate::error::{ConfigError, ConfigResult};
use crate::math::Vec3;

/// The whole scene: every module in construction order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneConfig {
    /// Frames to render before shutting down.
    #[serde(default = "default_frames")]
    pub frames: u64,
    /// Modules, constructed in declaration order.
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleConfig>,
}

fn default_frames() -> u64 {
    DEFAULT_FRAMES
}

impl SceneConfig {
    /// Parses and validates a scene from TOML text.
    ///
    /// Relative model paths are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on malformed TOML, missing keys or invalid
    /// values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let mut scene: Self = toml::from_str(text)?;
        scene.normalize(None);
        scene.validate()?;
        Ok(scene)
    }

    /// Loads a scene file. Relative model paths are resolved against the
    /// directory containing the scene.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as
    /// for [`SceneConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut scene: Self = toml::from_str(&text)?;
        scene.normalize(path.parent());
        scene.validate()?;
        Ok(scene)
    }

    /// Fills defaulted owners and resolves relative model paths.
    fn normalize(&mut self, base_dir: Option<&Path>) {
        for module in &mut self.modules {
            for object in &mut module.objects {
                if object.owner.is_empty() {
                    object.owner.clone_from(&module.name);
                }
                if let (Some(base), ModelSource::File { path }) = (base_dir, &mut object.model) {
                    if path.is_relative() {
                        *path = base.join(&*path);
                    }
                }
            }
        }
    }

    /// Validates every module and the uniqueness of module and object
    /// identities.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut modules = HashSet::new();
        let mut objects = HashSet::new();

        for module in &self.modules {
            if !modules.insert(module.name.as_str()) {
                return Err(ConfigError::DuplicateModule(module.name.clone()));
            }
            for object in &module.objects {
                if !objects.insert((object.name.as_str(), object.owner.as_str())) {
                    return Err(ConfigError::DuplicateObject {
                        name: object.name.clone(),
                        owner: object.owner.clone(),
                    });
                }
                object.validate()?;
            }
        }

        Ok(())
    }
}

/// One module: a factory kind plus the objects it owns and the foreign
/// stages it drives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Unique module name; the default owner of its objects.
    pub name: String,
    /// Factory key in the module registry (`softbody`, `collision`, ...).
    pub kind: String,
    /// Objects owned by this module.
    #[serde(default, rename = "object")]
    pub objects: Vec<ObjectConfig>,
    /// Stages of objects owned by other modules that this module drives.
    #[serde(default, rename = "bind")]
    pub bindings: Vec<BindingConfig>,
}

/// A cross-module stage binding, resolved during `synchronize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    /// Target object name.
    pub object: String,
    /// Target object owner (module name).
    pub owner: String,
    /// Stage role to drive on the target.
    pub role: String,
    /// Height of the ground plane for collision bindings.
    #[serde(default)]
    pub ground: f64,
}

/// Which concrete object variant to build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectVariant {
    /// Mass-spring body driven by a physics stage.
    #[default]
    SoftBody,
    /// Static body; only presentation stages.
    Anchor,
}

/// One simulation object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectConfig {
    /// Object name, unique per owner.
    pub name: String,
    /// Owning module; defaults to the declaring module's name.
    #[serde(default)]
    pub owner: String,
    /// Concrete variant.
    #[serde(default)]
    pub variant: ObjectVariant,
    /// Where the vertices, edges and masses come from.
    pub model: ModelSource,
    /// Semaphore slots with their initial token counts.
    #[serde(rename = "slot")]
    pub slots: Vec<SlotConfig>,
    /// Role name → slot wiring.
    pub stages: BTreeMap<String, StageConfig>,
    /// Integrator parameters.
    #[serde(default)]
    pub physics: PhysicsConfig,
}

impl ObjectConfig {
    /// Validates slot numbering and physics ranges.
    ///
    /// Slot indices must be exactly `0..N`; stage indices are checked
    /// against `N` when the ring is built.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(self.invalid("name", "must not be empty".to_string()));
        }
        if self.stages.is_empty() {
            return Err(self.invalid("stages", "at least one stage is required".to_string()));
        }

        let mut seen = vec![false; self.slots.len()];
        for slot in &self.slots {
            let Some(flag) = seen.get_mut(slot.index) else {
                return Err(ConfigError::SlotIndex {
                    object: self.name.clone(),
                    index: slot.index,
                    reason: "is out of range for the declared slot count",
                });
            };
            if *flag {
                return Err(ConfigError::SlotIndex {
                    object: self.name.clone(),
                    index: slot.index,
                    reason: "is declared twice",
                });
            }
            *flag = true;
        }

        if let ModelSource::Grid(grid) = &self.model {
            grid.validate().map_err(|reason| self.invalid("model", reason))?;
        }
        self.physics.validate().map_err(|(field, reason)| self.invalid(field, reason))
    }

    /// Initial token counts ordered by slot index.
    #[must_use]
    pub fn initial_tokens(&self) -> Vec<u32> {
        let mut tokens = vec![0; self.slots.len()];
        for slot in &self.slots {
            if let Some(t) = tokens.get_mut(slot.index) {
                *t = slot.tokens;
            }
        }
        tokens
    }

    fn invalid(&self, field: &'static str, reason: String) -> ConfigError {
        ConfigError::InvalidField {
            object: self.name.clone(),
            field,
            reason,
        }
    }
}

/// A semaphore slot declaration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotConfig {
    /// Slot index.
    pub index: usize,
    /// Initial token count.
    pub tokens: u32,
}

/// A stage's wait/post slot pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Slot waited on before the stage runs.
    pub wait: usize,
    /// Slot posted after the stage runs.
    pub post: usize,
}

/// Integrator parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PhysicsConfig {
    /// Edge spring stiffness.
    pub stiffness: f64,
    /// Gravity acceleration.
    pub gravity: Vec3,
    /// Lower clamp for the lap time step.
    pub min_dt: f64,
    /// Upper clamp for the lap time step.
    pub max_dt: f64,
    /// Use this step every lap instead of the wall clock.
    pub fixed_dt: Option<f64>,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            stiffness: DEFAULT_STIFFNESS,
            gravity: Vec3::from_array(DEFAULT_GRAVITY),
            min_dt: MIN_DT,
            max_dt: MAX_DT,
            fixed_dt: None,
        }
    }
}

impl PhysicsConfig {
    fn validate(&self) -> Result<(), (&'static str, String)> {
        if !(self.stiffness.is_finite() && self.stiffness >= 0.0) {
            return Err(("stiffness", format!("{} is not a finite non-negative number", self.stiffness)));
        }
        if !self.gravity.is_finite() {
            return Err(("gravity", "must be finite".to_string()));
        }
        if !(self.min_dt > 0.0 && self.min_dt.is_finite()) {
            return Err(("min_dt", format!("{} must be positive", self.min_dt)));
        }
        if !(self.max_dt >= self.min_dt && self.max_dt.is_finite()) {
            return Err(("max_dt", format!("{} must be at least min_dt ({})", self.max_dt, self.min_dt)));
        }
        if let Some(dt) = self.fixed_dt {
            if !(dt > 0.0 && dt.is_finite()) {
                return Err(("fixed_dt", format!("{dt} must be positive")));
            }
            if !(self.min_dt..=self.max_dt).contains(&dt) {
                return Err((
                    "fixed_dt",
                    format!("{dt} is outside [{}, {}]", self.min_dt, self.max_dt),
                ));
            }
        }
        Ok(())
    }
}

/// Where an object's model comes from.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ModelSource {
    /// Vertices and edges written directly in the scene.
    Inline(ModelData),
    /// A generated rectangular grid (cloth).
    Grid(GridSpec),
    /// A separate TOML file holding a [`ModelData`] table.
    File {
        /// Path to the model file.
        path: PathBuf,
    },
}

/// Raw model data as written in a scene or model file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelData {
    /// Rest positions.
    pub vertices: Vec<Vec3>,
    /// Spring edges as vertex index pairs.
    #[serde(default)]
    pub edges: Vec<[usize; 2]>,
    /// Per-vertex masses; empty means every vertex has the default mass.
    #[serde(default)]
    pub masses: Vec<f64>,
    /// Vertices that never move.
    #[serde(default)]
    pub pinned: Vec<usize>,
}

impl ModelData {
    /// Reads a model file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if unreadable, `ConfigError::Parse` if
    /// malformed.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }
}

/// A generated rectangular grid of vertices with structural and shear
/// springs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSpec {
    /// Vertex rows (along -Y).
    pub rows: usize,
    /// Vertex columns (along +X).
    pub cols: usize,
    /// Distance between neighbouring vertices.
    pub spacing: f64,
    /// Position of the first vertex.
    #[serde(default)]
    pub origin: Vec3,
    /// Mass of every vertex.
    #[serde(default = "default_mass")]
    pub mass: f64,
    /// Pin the first row in place.
    #[serde(default)]
    pub pin_top_row: bool,
}

fn default_mass() -> f64 {
    DEFAULT_MASS
}

impl GridSpec {
    /// Vertex count, or `None` if `rows * cols` overflows.
    #[must_use]
    pub fn vertex_count(&self) -> Option<usize> {
        self.rows.checked_mul(self.cols)
    }

    /// Checks dimensions, spacing, mass and origin.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.rows == 0 || self.cols == 0 {
            return Err(format!("grid {}x{} has no vertices", self.rows, self.cols));
        }
        match self.vertex_count() {
            Some(count) if count <= MAX_GRID_VERTICES => {}
            _ => {
                return Err(format!(
                    "grid {}x{} exceeds {MAX_GRID_VERTICES} vertices",
                    self.rows, self.cols
                ))
            }
        }
        if !(self.spacing > 0.0 && self.spacing.is_finite()) {
            return Err(format!("grid spacing {} must be positive", self.spacing));
        }
        if !(self.mass > 0.0 && self.mass.is_finite()) {
            return Err(format!("grid mass {} must be positive", self.mass));
        }
        if !self.origin.is_finite() {
            return Err("grid origin must be finite".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"
        frames = 120

        [[module]]
        name = "cloth"
        kind = "softbody"

        [[module.object]]
        name = "flag"
        model = { source = "grid", rows = 3, cols = 4, spacing = 0.5, pin_top_row = true }
        slot = [{ index = 0, tokens = 1 }, { index = 1, tokens = 0 }]
        stages = { graphics = { wait = 0, post = 1 }, physics = { wait = 1, post = 0 } }

        [module.object.physics]
        stiffness = 80.0
        fixed_dt = 0.01

        [[module]]
        name = "ground"
        kind = "collision"

        [[module.bind]]
        object = "flag"
        owner = "cloth"
        role = "collision"
        ground = -2.0
    "#;

    #[test]
    fn test_parse_scene() {
        let scene = SceneConfig::from_toml_str(SCENE).unwrap();
        assert_eq!(scene.frames, 120);
        assert_eq!(scene.modules.len(), 2);

        let flag = &scene.modules[0].objects[0];
        assert_eq!(flag.owner, "cloth");
        assert_eq!(flag.variant, ObjectVariant::SoftBody);
        assert_eq!(flag.initial_tokens(), vec![1, 0]);
        assert_eq!(flag.stages["physics"], StageConfig { wait: 1, post: 0 });
        assert_eq!(flag.physics.fixed_dt, Some(0.01));
        assert!(matches!(flag.model, ModelSource::Grid(GridSpec { rows: 3, cols: 4, .. })));

        let bind = &scene.modules[1].bindings[0];
        assert_eq!(bind.role, "collision");
        assert!((bind.ground + 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let text = SCENE.replace("kind = \"softbody\"", "");
        assert!(matches!(SceneConfig::from_toml_str(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_non_numeric_field_is_fatal() {
        let text = SCENE.replace("stiffness = 80.0", "stiffness = \"stiff\"");
        assert!(matches!(SceneConfig::from_toml_str(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_slot_gap_rejected() {
        let text = SCENE.replace("{ index = 1, tokens = 0 }", "{ index = 2, tokens = 0 }");
        let err = SceneConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::SlotIndex { index: 2, .. }));
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let text = SCENE.replace("{ index = 1, tokens = 0 }", "{ index = 0, tokens = 0 }");
        let err = SceneConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::SlotIndex { index: 0, .. }));
    }

    #[test]
    fn test_bad_dt_rejected() {
        let text = SCENE.replace("fixed_dt = 0.01", "fixed_dt = -1.0");
        let err = SceneConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "fixed_dt", .. }));
    }

    #[test]
    fn test_fixed_dt_outside_clamp_rejected() {
        let text = SCENE.replace("fixed_dt = 0.01", "fixed_dt = 0.5");
        let err = SceneConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { field: "fixed_dt", .. }), "{err}");

        let text = SCENE.replace("fixed_dt = 0.01", "fixed_dt = 0.5\n        max_dt = 0.5");
        assert!(SceneConfig::from_toml_str(&text).is_ok());
    }

    #[test]
    fn test_bad_grid_rejected() {
        let grid = "rows = 3, cols = 4, spacing = 0.5";
        for bad in [
            "rows = 0, cols = 4, spacing = 0.5",
            "rows = 3, cols = 4, spacing = 0.0",
            "rows = 3, cols = 4, spacing = nan",
            "rows = 3, cols = 4, spacing = 0.5, mass = -1.0",
            "rows = 100000, cols = 100000, spacing = 0.5",
            "rows = 4294967296, cols = 4294967296, spacing = 0.5",
        ] {
            let text = SCENE.replace(grid, bad);
            let err = SceneConfig::from_toml_str(&text).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidField { field: "model", .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn test_unknown_grid_key_is_fatal() {
        let text = SCENE.replace("spacing = 0.5,", "spacing = 0.5, spacng = 0.2,");
        assert!(matches!(SceneConfig::from_toml_str(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unreadable_file_is_fatal() {
        let err = SceneConfig::load("/nonexistent/lockstep/scene.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
