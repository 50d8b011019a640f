//! Pipeline command: assemble a stage list, optionally save and run it

use super::discovery::DiscoveryArgs;
use anyhow::{anyhow, bail, Context as _, Result};
use clap::Args;
use filterkit_core::{
    capability, Bundle, ConsoleInteraction, DirectorySource, EngineEvent, HostConfig, Interactor,
    ModuleWatcher, PipelineHost, Registry, StageList,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often the run loop checks the engine and the watcher
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Args)]
pub struct PipelineCommand {
    #[command(flatten)]
    discovery: DiscoveryArgs,

    /// Saved stage list to load (YAML or JSON); lists are concatenated
    #[arg(short, long = "load", value_name = "FILE")]
    lists: Vec<PathBuf>,

    /// Stage type to append by name (must be default-constructible)
    #[arg(short, long = "stage", value_name = "NAME")]
    stages: Vec<String>,

    /// Stage list provider whose list is appended
    #[arg(long, value_name = "NAME")]
    provider: Option<String>,

    /// Write the assembled list to this file (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Target tick rate; 0 runs ticks back-to-back
    #[arg(long)]
    fps: Option<f64>,

    /// Ticks per run; 0 is unbounded
    #[arg(long)]
    iterations: Option<u64>,

    /// Event posted to the interactor before the first run
    #[arg(short, long = "event", value_name = "NAME")]
    events: Vec<String>,

    /// Directory for the latest frame of every view
    #[arg(long, value_name = "DIR")]
    snapshots: Option<PathBuf>,

    /// Reload stages when manifests change while running
    #[arg(short, long)]
    watch: bool,

    /// Run the pipeline until it stops or ctrl-c is pressed
    #[arg(short, long)]
    run: bool,
}

impl PipelineCommand {
    pub async fn execute(self, mut config: HostConfig) -> Result<()> {
        self.discovery.apply(&mut config);
        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps < 0.0 {
                bail!("Invalid --fps value: {}", fps);
            }
            config.engine.target_fps = (fps > 0.0).then_some(fps);
        }
        if let Some(iterations) = self.iterations {
            config.engine.iterations = iterations;
        }
        config.plugins.watch |= self.watch;

        let registry = self.discovery.build_registry(&config)?;
        let stages = self.assemble(&registry)?;

        if stages.is_empty() {
            warn!("Pipeline has no stages");
        }
        print_summary(&stages);

        if let Some(path) = &self.save {
            stages
                .save(path)
                .with_context(|| format!("Failed to save pipeline to {}", path.display()))?;
            info!("Saved pipeline to {}", path.display());
        }

        if !self.run {
            return Ok(());
        }
        self.run_pipeline(config, registry, stages).await
    }

    /// Loaded lists first, then named stages, then the provider's list
    fn assemble(&self, registry: &Registry) -> Result<StageList> {
        let mut stages = StageList::new();

        for path in &self.lists {
            let loaded = StageList::load(path, registry)
                .with_context(|| format!("Failed to load pipeline {}", path.display()))?;
            info!("Loaded {} stages from {}", loaded.len(), path.display());
            stages.append(&loaded);
        }

        let named = StageList::from_names(registry, self.stages.as_slice())
            .context("Failed to create named stages")?;
        stages.append(&named);

        if let Some(name) = &self.provider {
            let provider = registry
                .create(capability::STAGE_LIST_PROVIDER, name, &[])
                .with_context(|| format!("Failed to create provider {}", name))?;
            let provided = {
                let stage = provider.lock();
                let list_provider = stage
                    .list_provider()
                    .ok_or_else(|| anyhow!("{} does not provide a stage list", name))?;
                list_provider
                    .create_stage_list(registry)
                    .with_context(|| format!("Provider {} failed", name))?
            };
            stages.append(&provided);
        }

        Ok(stages)
    }

    async fn run_pipeline(
        &self,
        config: HostConfig,
        registry: Registry,
        stages: StageList,
    ) -> Result<()> {
        let interaction = Arc::new(match &self.snapshots {
            Some(dir) => ConsoleInteraction::new().with_snapshot_dir(dir),
            None => ConsoleInteraction::new(),
        });
        for event in &self.events {
            interaction.post_event(event);
        }

        let seed = Arc::clone(&interaction);
        let mut host = PipelineHost::new(registry, config.engine_config())
            .with_iterations(config.engine.iterations)
            .with_seed(move || Bundle::with_interactor(seed.clone()));
        host.set_stages(stages)?;

        let mut watcher = if config.plugins.watch {
            let mut watcher =
                ModuleWatcher::with_debounce(Duration::from_millis(config.plugins.debounce_ms))?;
            for dir in self.discovery.manifest_dirs(&config) {
                watcher
                    .watch(&dir)
                    .with_context(|| format!("Failed to watch {}", dir.display()))?;
            }
            Some(watcher)
        } else {
            None
        };

        let events = host.engine().subscribe();
        host.start().context("Failed to start pipeline")?;
        info!("Pipeline running, press ctrl-c to stop");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    result.context("Failed to listen for ctrl-c")?;
                    info!("Interrupted, stopping pipeline");
                    host.stop(false);
                    break;
                }
                _ = ticker.tick() => {
                    if !host.is_running() {
                        break;
                    }
                    if let Some(watcher) = watcher.as_mut() {
                        for dir in watcher.poll_changes() {
                            info!("Manifests changed in {}, reloading", dir.display());
                            let source = DirectorySource::new(&dir);
                            match tokio::task::block_in_place(|| host.reload(&source)) {
                                Ok(outcome) => info!(
                                    "Reloaded {} stage types, {} stages replaced",
                                    outcome.discovered,
                                    outcome.migration.replaced.len()
                                ),
                                Err(e) => warn!("Reload from {} failed: {}", dir.display(), e),
                            }
                        }
                    }
                }
            }
        }

        tokio::task::block_in_place(|| host.wait());

        for event in events.try_iter() {
            match event {
                EngineEvent::Error(e) => error!("{}", e),
                EngineEvent::Stopped { ticks, reason } => {
                    info!("Pipeline stopped after {} ticks ({})", ticks, reason)
                }
                EngineEvent::Starting => {}
            }
        }

        match host.engine().last_error() {
            Some(e) => Err(anyhow!("Pipeline failed: {}", e)),
            None => Ok(()),
        }
    }
}

fn print_summary(stages: &StageList) {
    println!("Pipeline ({} stages):", stages.len());
    for (index, stage) in stages.iter().enumerate() {
        println!("  {}. {}", index, stage.type_name());
        for spec in stage.properties() {
            if let Ok(value) = stage.property(spec.name) {
                println!("       {} = {}", spec.name, value);
            }
        }
    }
}
