//! Error types for the stage runtime

use crate::property::PropertyKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a stage while executing or being configured
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing bundle entry: {0}")]
    MissingEntry(String),

    #[error("Stage execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Stage panicked: {0}")]
    Panicked(String),

    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors raised when reading or writing a stage property
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    #[error("Unknown property: {0}")]
    Unknown(String),

    #[error("Property is read-only: {0}")]
    ReadOnly(String),

    #[error("Property '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: PropertyKind,
        found: PropertyKind,
    },

    #[error("Invalid value for property '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// A discovery source could not be scanned
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Cannot scan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Manifest {path} builds on unknown stage type: {base}")]
    UnknownBase { path: PathBuf, base: String },

    #[error("Manifest {path} declares {name} on top of itself")]
    SelfBase { path: PathBuf, name: String },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// A descriptor could not be turned into a live stage
#[derive(Error, Debug)]
pub enum InstantiationError {
    #[error("No '{capability}' implementation named {name}")]
    NotFound { capability: String, name: String },

    #[error("Stage type {0} is not default-constructible and no constructor arguments were given")]
    NotDefaultConstructible(String),

    #[error("Failed to construct {name}: {source}")]
    Factory {
        name: String,
        #[source]
        source: StageError,
    },
}

/// Errors raised while loading or saving a persisted stage list
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Unknown stage type: {0}")]
    UnknownStageType(String),

    #[error("Instantiation error: {0}")]
    Instantiation(#[from] InstantiationError),

    #[error("Cannot restore property of {stage}: {source}")]
    Property {
        stage: String,
        #[source]
        source: PropertyError,
    },

    #[error("Stage #{0} was not created from a registered type and cannot be saved")]
    Anonymous(usize),

    #[error("Unsupported stage list format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A stage failed during a run; the run was terminated
#[derive(Error, Debug)]
#[error("Stage #{stage_index} ({stage_name}) failed on tick {tick}: {source}")]
pub struct ExecutionError {
    /// Position of the failing stage in the list
    pub stage_index: usize,

    /// Type name of the failing stage
    pub stage_name: String,

    /// Zero-based tick in which the failure happened
    pub tick: u64,

    /// The error the stage returned
    #[source]
    pub source: StageError,
}

/// Errors raised by the engine control surface
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised by the pipeline host
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Reconfiguration failed: {0}")]
    Instantiation(#[from] InstantiationError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Errors raised while loading host configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}
