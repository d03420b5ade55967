//! # Configuration Error Types
//!
//! Every error here is fatal: a scene that fails to load never starts.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or validating a scene description.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A source file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The file is not valid TOML, a required key is missing, or a field has
    /// the wrong type.
    #[error("malformed description: {0}")]
    Parse(#[from] toml::de::Error),

    /// Slot indices must be exactly `0..N`, each declared once.
    #[error("object {object}: slot {index} {reason}")]
    SlotIndex {
        /// Object being configured.
        object: String,
        /// Offending slot index.
        index: usize,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A field holds a value outside its valid range.
    #[error("object {object}: invalid {field}: {reason}")]
    InvalidField {
        /// Object being configured.
        object: String,
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Two objects share the same `(name, owner)` identity.
    #[error("duplicate object {name} (owner {owner})")]
    DuplicateObject {
        /// Object name.
        name: String,
        /// Owning module.
        owner: String,
    },

    /// Two modules share the same name.
    #[error("duplicate module {0}")]
    DuplicateModule(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
