//! # LOCKSTEP Shared
//!
//! Common types used by every LOCKSTEP crate.
//!
//! ## Contents
//!
//! - `constants`: well-known stage roles and physics defaults
//! - `math`: `Vec3` and `Transform`, plain-old-data so vertex buffers can be
//!   viewed as bytes
//! - `config`: the scene description (modules, objects, slots, stages)
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER spawn threads or own synchronization state.
//! If you need a semaphore, put it in `lockstep_core`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod math;

pub use config::{
    BindingConfig, GridSpec, ModelData, ModelSource, ModuleConfig, ObjectConfig, ObjectVariant,
    PhysicsConfig, SceneConfig, SlotConfig, StageConfig,
};
pub use constants::{
    ROLE_COLLISION, ROLE_GRAPHICS, ROLE_INTERSECTION, ROLE_PHYSICS,
};
pub use error::{ConfigError, ConfigResult};
pub use math::{Transform, Vec3};
