//! # Engine Error Types
//!
//! Everything that can stop a scene from starting, plus the few failures
//! that can only happen at runtime (thread spawn, a panicked render thread).

use lockstep_core::SyncError;
use lockstep_shared::ConfigError;
use thiserror::Error;

/// Errors raised while building, wiring or running a scene.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The scene description is malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A stage ring operation failed outside construction (e.g. it was
    /// closed during shutdown).
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// An object's stage ring is miswired.
    #[error("object {object}: {source}")]
    Ring {
        /// Object whose ring failed to build.
        object: String,
        /// The wiring violation.
        source: SyncError,
    },

    /// No factory is registered for a module kind.
    #[error("module {module}: unknown module kind {kind:?}")]
    UnknownModule {
        /// Module being created.
        module: String,
        /// Requested kind.
        kind: String,
    },

    /// A binding names an object nobody published.
    #[error("module {module}: no object {object} owned by {owner}")]
    UnknownObject {
        /// Module declaring the binding.
        module: String,
        /// Requested object name.
        object: String,
        /// Requested owner.
        owner: String,
    },

    /// A module was asked to drive a role it has no kernel for.
    #[error("module {module}: cannot drive stage {role} of {object}")]
    UnsupportedRole {
        /// Module declaring the binding.
        module: String,
        /// Target object.
        object: String,
        /// Requested role.
        role: String,
    },

    /// A non-graphics stage has no worker: its ring would stall forever.
    #[error("object {object}: stage {role} is not driven by any module")]
    UnboundStage {
        /// Object whose stage is undriven.
        object: String,
        /// The undriven role.
        role: String,
    },

    /// Two workers would drive the same stage.
    #[error("object {object}: stage {role} is driven by both {first} and {second}")]
    DuplicateBinding {
        /// Target object.
        object: String,
        /// Contested role.
        role: String,
        /// First driving module.
        first: String,
        /// Second driving module.
        second: String,
    },

    /// A model is not usable (bad indices, non-finite values, bad masses).
    #[error("object {object}: invalid model: {reason}")]
    InvalidModel {
        /// Object whose model failed.
        object: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The OS refused to create a thread.
    #[error("cannot spawn thread {name}: {source}")]
    Spawn {
        /// Intended thread name.
        name: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The render thread panicked.
    #[error("render thread panicked")]
    RenderPanicked,

    /// A lifecycle call arrived in the wrong state.
    #[error("orchestrator is {0}")]
    Lifecycle(&'static str),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
