//! Shared registry construction
//!
//! Every command discovers the same way: the linked toolbox stages first,
//! then the configured plugin directories, then explicit module directories.
//! Plugin directories that fail to scan are skipped; module directories must
//! load.

use anyhow::{bail, Context as _, Result};
use clap::Args;
use filterkit_core::{DirectorySource, DiscoverySource, HostConfig, Registry};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Args, Debug, Clone, Default)]
pub struct DiscoveryArgs {
    /// Plugin directory to scan for stage manifests (replaces the configured ones)
    #[arg(long = "plugins", value_name = "DIR")]
    pub plugin_dirs: Vec<PathBuf>,

    /// Stage manifest directory that must load
    #[arg(short, long = "module", value_name = "DIR")]
    pub modules: Vec<PathBuf>,
}

impl DiscoveryArgs {
    /// Fold the command line into `config`
    pub fn apply(&self, config: &mut HostConfig) {
        if !self.plugin_dirs.is_empty() {
            config.plugins.directories = self.plugin_dirs.clone();
        }
    }

    /// Directories whose manifests feed the registry
    pub fn manifest_dirs(&self, config: &HostConfig) -> Vec<PathBuf> {
        config
            .plugin_sources()
            .iter()
            .map(|source| source.dir().to_path_buf())
            .chain(self.modules.iter().cloned())
            .collect()
    }

    pub fn build_registry(&self, config: &HostConfig) -> Result<Registry> {
        let mut registry = Registry::new();
        registry
            .discover(&filterkit_toolbox::source())
            .context("Failed to register toolbox stages")?;

        let plugins = config.plugin_sources();
        let sources: Vec<&dyn DiscoverySource> = plugins
            .iter()
            .map(|source| source as &dyn DiscoverySource)
            .collect();
        let report = registry.discover_all(&sources);
        if !report.failures.is_empty() {
            warn!(
                "{} plugin directories could not be scanned",
                report.failures.len()
            );
        }

        for dir in &self.modules {
            if !dir.is_dir() {
                bail!("Module directory does not exist: {}", dir.display());
            }
            registry
                .discover(&DirectorySource::new(dir))
                .with_context(|| format!("Failed to load modules from {}", dir.display()))?;
        }

        info!("{} stage types available", registry.len());
        Ok(registry)
    }
}
