//! Pipeline host: owns the registry, the current stage list and the engine
//!
//! Reloads follow a fixed protocol so execution and reconfiguration never
//! overlap:
//!
//! 1. discover the new implementations into the shared registry
//! 2. request a graceful stop and wait for the engine to report Stopped
//! 3. reconfigure the current list against a registry snapshot and migrate
//!    property state
//! 4. run again if the run ended because of that stop request
//!
//! When step 3 fails the old list stays in effect and is restarted. A run that
//! ended on its own while the host waited (failure, iteration limit, a stage
//! stopping it) is never restarted, so its last error stays queryable.

use crate::bundle::Bundle;
use crate::engine::{Engine, EngineConfig, StopReason};
use crate::error::{EngineError, HostError};
use crate::reconfigure::{migrate_state, reconfigure, MigrationReport};
use crate::registry::Registry;
use crate::source::DiscoverySource;
use crate::stage_list::StageList;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Registry shared between the host and whoever discovers into it
pub type SharedRegistry = Arc<RwLock<Registry>>;

type SeedFn = Box<dyn Fn() -> Bundle + Send + Sync>;

/// Result of [`PipelineHost::reload`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// Descriptors the source yielded
    pub discovered: usize,

    /// State migration onto replaced stages
    pub migration: MigrationReport,

    /// Whether the engine was restarted
    pub restarted: bool,
}

pub struct PipelineHost {
    registry: SharedRegistry,
    stages: StageList,
    engine: Engine,
    iterations: u64,
    seed: SeedFn,
}

impl PipelineHost {
    pub fn new(registry: Registry, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
            stages: StageList::new(),
            engine: Engine::new(config),
            iterations: 0,
            seed: Box::new(Bundle::new),
        }
    }

    /// Build the bundle of every run with `seed`
    pub fn with_seed<F>(mut self, seed: F) -> Self
    where
        F: Fn() -> Bundle + Send + Sync + 'static,
    {
        self.seed = Box::new(seed);
        self
    }

    /// Iteration limit for every run; 0 is unbounded
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn stages(&self) -> &StageList {
        &self.stages
    }

    /// Replace the stage list; rejected while the engine is running
    pub fn set_stages(&mut self, stages: StageList) -> Result<(), HostError> {
        if self.engine.is_running() {
            return Err(EngineError::AlreadyRunning.into());
        }
        self.stages = stages;
        Ok(())
    }

    pub fn start(&self) -> Result<(), HostError> {
        self.engine
            .run(self.stages.clone(), (self.seed)(), self.iterations)?;
        Ok(())
    }

    pub fn stop(&self, graceful: bool) {
        self.engine.stop(graceful);
    }

    pub fn wait(&self) {
        self.engine.wait();
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Discover from `source` and move the pipeline onto the result
    pub fn reload(&mut self, source: &dyn DiscoverySource) -> Result<ReloadOutcome, HostError> {
        let discovered = self.registry.write().discover(source)?;
        let mut outcome = self.apply()?;
        outcome.discovered = discovered;
        Ok(outcome)
    }

    /// Reconfigure the current list against the registry as it is now
    pub fn apply(&mut self) -> Result<ReloadOutcome, HostError> {
        let mut restart = false;
        if self.engine.is_running() {
            self.engine.stop(true);
            self.engine.wait();
            // A run that ended on its own during the wait stays stopped
            match self.engine.last_stop_reason() {
                Some(StopReason::Requested) => restart = true,
                reason => info!("Run ended before reload ({:?}), not restarting", reason),
            }
        }

        let snapshot = self.registry.read().clone();
        let new = match reconfigure(&self.stages, &snapshot) {
            Ok(new) => new,
            Err(e) => {
                warn!("Reconfiguration failed, keeping current stages: {}", e);
                if restart {
                    self.start()?;
                }
                return Err(e.into());
            }
        };

        let migration = migrate_state(&self.stages, &new);
        info!(
            "Reconfigured {} stages: {} replaced, {} properties copied, {} skipped",
            new.len(),
            migration.replaced.len(),
            migration.copied,
            migration.skipped
        );
        self.stages = new;

        if restart {
            self.start()?;
        }
        Ok(ReloadOutcome {
            discovered: 0,
            migration,
            restarted: restart,
        })
    }
}

impl fmt::Debug for PipelineHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHost")
            .field("stages", &self.stages.type_names())
            .field("engine", &self.engine)
            .field("iterations", &self.iterations)
            .finish()
    }
}
