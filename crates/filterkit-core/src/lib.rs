//! Filterkit Core - pluggable pipeline runtime
//!
//! This crate provides the capability registry that discovers stage
//! implementations, the engine that runs an ordered stage list against a
//! shared bundle on its own thread, and the reconfiguration that hot-swaps
//! changed stages while keeping their configured properties.

pub mod bundle;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod interaction;
pub mod property;
pub mod reconfigure;
pub mod registry;
pub mod source;
pub mod stage;
pub mod stage_list;

#[cfg(test)]
mod test_support;

pub use bundle::{keys, Bundle};
pub use config::HostConfig;
pub use descriptor::{capability, CapabilityDescriptor, Fingerprint, StageFactory};
pub use engine::{Engine, EngineConfig, EngineEvent, EngineHandle, EngineState, StopReason};
pub use error::{
    ConfigError, DiscoveryError, EngineError, ExecutionError, HostError, InstantiationError,
    PersistError, PropertyError, StageError,
};
pub use event::{EventHandlers, EventQueue};
pub use host::{PipelineHost, ReloadOutcome, SharedRegistry};
pub use interaction::{ConsoleInteraction, Interactor, ScriptedInteraction, ShownImage};
pub use property::{Access, PropertyKind, PropertySpec, PropertyValue};
pub use reconfigure::{migrate_state, reconfigure, MigrationReport};
pub use registry::{DiscoveryReport, Registry};
pub use source::{
    DirectorySource, DiscoverySource, ModuleBatch, ModuleWatcher, StageManifest,
    StageRegistration, StaticSource, MANIFEST_SUFFIXES,
};
pub use stage::{Flow, FnStage, Stage, StageHandle, StageListProvider};
pub use stage_list::{StageList, StageListFile, StageRecord};

#[doc(hidden)]
pub use inventory;
