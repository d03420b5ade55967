//! # Object Models
//!
//! The static, read-only half of a simulation object: rest positions,
//! spring topology, inverse masses and pins. A [`Model`] is built once and
//! shared behind an `Arc`; nothing mutates it afterwards, so stages read it
//! without synchronization.
//!
//! Structural problems (edge or pin indices out of range, non-finite
//! coordinates, non-positive masses) are fatal. A mass table of the wrong
//! length is only an advisory: missing entries take the default mass.

use lockstep_shared::constants::DEFAULT_MASS;
use lockstep_shared::{GridSpec, ModelData, ModelSource, Vec3};

use crate::error::{EngineError, EngineResult};

// ============================================================================
// AABB (Axis-Aligned Bounding Box)
// ============================================================================

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Creates a box from its corners.
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box holding every point, or `None` for no points.
    #[must_use]
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (&first, rest) = points.split_first()?;
        Some(rest.iter().fold(Self::new(first, first), |aabb, &p| Self {
            min: aabb.min.min(p),
            max: aabb.max.max(p),
        }))
    }

    /// Checks if this box intersects another.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Checks if a point lies inside (boundary included).
    #[must_use]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Box extent on each axis.
    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

// ============================================================================
// MODEL
// ============================================================================

/// A spring between two vertices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edge {
    /// First vertex.
    pub a: usize,
    /// Second vertex.
    pub b: usize,
    /// Rest length, measured on the rest positions.
    pub rest: f64,
}

/// Static object data.
#[derive(Clone, Debug)]
pub struct Model {
    rest: Vec<Vec3>,
    edges: Vec<Edge>,
    inv_mass: Vec<f64>,
    pinned: Vec<usize>,
    bounds: Option<Aabb>,
    /// Length of the mass table as written, kept for the self-check.
    mass_table_len: usize,
}

impl Model {
    /// Builds a model from any configured source.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if a model file cannot be loaded and
    /// `EngineError::InvalidModel` if the data is unusable.
    pub fn from_source(object: &str, source: &ModelSource) -> EngineResult<Self> {
        match source {
            ModelSource::Inline(data) => Self::from_data(object, data),
            ModelSource::Grid(spec) => {
                spec.validate().map_err(|reason| EngineError::InvalidModel {
                    object: object.to_string(),
                    reason,
                })?;
                Self::from_data(object, &grid(spec))
            }
            ModelSource::File { path } => {
                let data = ModelData::load(path)?;
                Self::from_data(object, &data)
            }
        }
    }

    /// Builds and validates a model.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidModel` on out-of-range edge or pin
    /// indices, self-edges, non-finite coordinates or non-positive masses.
    pub fn from_data(object: &str, data: &ModelData) -> EngineResult<Self> {
        let invalid = |reason: String| EngineError::InvalidModel {
            object: object.to_string(),
            reason,
        };
        let n = data.vertices.len();

        if let Some(i) = data.vertices.iter().position(|v| !v.is_finite()) {
            return Err(invalid(format!("vertex {i} is not finite")));
        }

        let mut edges = Vec::with_capacity(data.edges.len());
        for (e, &[a, b]) in data.edges.iter().enumerate() {
            if a >= n || b >= n {
                return Err(invalid(format!(
                    "edge {e} ({a}, {b}) references a vertex outside 0..{n}"
                )));
            }
            if a == b {
                return Err(invalid(format!("edge {e} connects vertex {a} to itself")));
            }
            edges.push(Edge {
                a,
                b,
                rest: data.vertices[a].distance(data.vertices[b]),
            });
        }

        let mut inv_mass = Vec::with_capacity(n);
        for i in 0..n {
            let mass = data.masses.get(i).copied().unwrap_or(DEFAULT_MASS);
            if !(mass.is_finite() && mass > 0.0) {
                return Err(invalid(format!("vertex {i} has mass {mass}")));
            }
            inv_mass.push(1.0 / mass);
        }

        let mut pinned = data.pinned.clone();
        pinned.sort_unstable();
        pinned.dedup();
        if let Some(&p) = pinned.last() {
            if p >= n {
                return Err(invalid(format!("pinned vertex {p} is outside 0..{n}")));
            }
        }
        for &p in &pinned {
            inv_mass[p] = 0.0;
        }

        Ok(Self {
            bounds: Aabb::from_points(&data.vertices),
            rest: data.vertices.clone(),
            edges,
            inv_mass,
            pinned,
            mass_table_len: data.masses.len(),
        })
    }

    /// Pins every vertex. Used for static variants.
    #[must_use]
    pub fn pin_all(mut self) -> Self {
        self.pinned = (0..self.rest.len()).collect();
        self.inv_mass.iter_mut().for_each(|m| *m = 0.0);
        self
    }

    /// Rest positions.
    #[inline]
    #[must_use]
    pub fn rest(&self) -> &[Vec3] {
        &self.rest
    }

    /// Vertex count.
    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.rest.len()
    }

    /// Springs.
    #[inline]
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Inverse masses; zero for pinned vertices.
    #[inline]
    #[must_use]
    pub fn inv_mass(&self) -> &[f64] {
        &self.inv_mass
    }

    /// Pinned vertex indices, sorted.
    #[inline]
    #[must_use]
    pub fn pinned(&self) -> &[usize] {
        &self.pinned
    }

    /// Returns true if vertex `i` is pinned.
    #[must_use]
    pub fn is_pinned(&self, i: usize) -> bool {
        self.pinned.binary_search(&i).is_ok()
    }

    /// Bounding box of the rest positions.
    #[must_use]
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Length of the mass table as configured (0 = all default).
    #[must_use]
    pub fn mass_table_len(&self) -> usize {
        self.mass_table_len
    }

    /// Spring and gravity forces, scaled by inverse mass, into `force`.
    ///
    /// Springs shorter than `f64::EPSILON` have no direction and are
    /// skipped.
    pub fn accumulate_forces(&self, positions: &[Vec3], stiffness: f64, gravity: Vec3, force: &mut [Vec3]) {
        for (f, &w) in force.iter_mut().zip(&self.inv_mass) {
            *f = if w == 0.0 { Vec3::ZERO } else { gravity };
        }
        for edge in &self.edges {
            let delta = positions[edge.b] - positions[edge.a];
            let length = delta.length();
            if length < f64::EPSILON {
                continue;
            }
            let pull = delta * (stiffness * (length - edge.rest) / length);
            force[edge.a] += pull * self.inv_mass[edge.a];
            force[edge.b] -= pull * self.inv_mass[edge.b];
        }
    }
}

/// Generates a cloth grid: structural springs along rows and columns plus
/// both shear diagonals of every cell.
///
/// Expects a spec that passed [`GridSpec::validate`].
#[must_use]
pub fn grid(spec: &GridSpec) -> ModelData {
    let (rows, cols) = (spec.rows, spec.cols);
    let index = |r: usize, c: usize| r * cols + c;

    let mut vertices = Vec::with_capacity(spec.vertex_count().unwrap_or_default());
    for r in 0..rows {
        for c in 0..cols {
            #[allow(clippy::cast_precision_loss)]
            let offset = Vec3::new(c as f64 * spec.spacing, -(r as f64) * spec.spacing, 0.0);
            vertices.push(spec.origin + offset);
        }
    }

    let mut edges = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            if c + 1 < cols {
                edges.push([index(r, c), index(r, c + 1)]);
            }
            if r + 1 < rows {
                edges.push([index(r, c), index(r + 1, c)]);
            }
            if r + 1 < rows && c + 1 < cols {
                edges.push([index(r, c), index(r + 1, c + 1)]);
                edges.push([index(r, c + 1), index(r + 1, c)]);
            }
        }
    }

    ModelData {
        masses: vec![spec.mass; vertices.len()],
        pinned: if spec.pin_top_row && rows > 0 { (0..cols).collect() } else { Vec::new() },
        vertices,
        edges,
    }
}
