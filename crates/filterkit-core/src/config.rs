//! Host configuration: YAML file plus environment overrides

use crate::engine::EngineConfig;
use crate::error::ConfigError;
use crate::source::DirectorySource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides `engine.target_fps`
pub const ENV_FPS: &str = "FILTERKIT_FPS";

/// Overrides `plugins.directories`; a platform path list
pub const ENV_PLUGIN_DIR: &str = "FILTERKIT_PLUGIN_DIR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub engine: EngineSection,
    pub plugins: PluginSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Tick rate; unset runs ticks back-to-back
    pub target_fps: Option<f64>,

    /// Ticks per run; 0 is unbounded
    pub iterations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    /// Manifest directories scanned at startup
    pub directories: Vec<PathBuf>,

    /// Reload when manifests in `directories` change
    pub watch: bool,

    /// Quiet period before a change is acted upon
    pub debounce_ms: u64,
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            directories: vec![PathBuf::from("."), PathBuf::from("plugins")],
            watch: false,
            debounce_ms: crate::source::DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl HostConfig {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Apply `FILTERKIT_*` variables from the process environment
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by variable name
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_FPS) {
            let fps = value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|fps| fps.is_finite() && *fps >= 0.0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    key: ENV_FPS.to_string(),
                    value: value.clone(),
                })?;
            // 0 means back-to-back, same as leaving it unset
            self.engine.target_fps = (fps > 0.0).then_some(fps);
        }

        if let Some(value) = lookup(ENV_PLUGIN_DIR) {
            self.plugins.directories = std::env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        Ok(self)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            target_fps: self.engine.target_fps,
        }
    }

    /// One discovery source per configured plugin directory that exists
    pub fn plugin_sources(&self) -> Vec<DirectorySource> {
        self.plugins
            .directories
            .iter()
            .filter(|dir| dir.is_dir())
            .map(DirectorySource::new)
            .collect()
    }
}
