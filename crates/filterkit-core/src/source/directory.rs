//! Stage types declared by YAML manifests in a directory
//!
//! Only files named `*.stage.yaml` or `*.stage.yml` are manifests; other YAML
//! in the directory (saved pipelines, host config) is left alone.
//!
//! A manifest defines a new fully-qualified stage type on top of an
//! implementation the registry already knows, with its own property defaults:
//!
//! ```yaml
//! name: lab.WidePattern
//! base: toolbox.TestPattern
//! description: 640x240 test pattern
//! properties:
//!   width: 640
//!   height: 240
//! ```

use super::DiscoverySource;
use crate::descriptor::{CapabilityDescriptor, Fingerprint, StageFactory};
use crate::error::{DiscoveryError, StageError};
use crate::property::PropertyValue;
use crate::registry::Registry;
use crate::stage::{set_checked, Stage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// On-disk stage manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageManifest {
    /// Fully-qualified name of the declared stage type
    pub name: String,

    /// Stage type the declared one builds on
    pub base: String,

    #[serde(default)]
    pub description: String,

    /// Capabilities added on top of the base's
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Property defaults applied after the base is constructed
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl StageManifest {
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }
}

/// Builds the base stage and applies the manifest defaults
struct ManifestFactory {
    base: Arc<dyn StageFactory>,
    defaults: Vec<(String, PropertyValue)>,
}

impl StageFactory for ManifestFactory {
    fn create(&self, args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        let mut stage = self.base.create(args)?;
        for (name, value) in &self.defaults {
            set_checked(stage.as_mut(), name, value.clone())?;
        }
        Ok(stage)
    }
}

/// Directory of stage manifests (`*.yaml`, `*.yml`)
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_paths(&self) -> Result<Vec<PathBuf>, DiscoveryError> {
        let io_err = |source| DiscoveryError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && is_manifest(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn load(
        path: &Path,
        known: &Registry,
        declared: &HashMap<String, CapabilityDescriptor>,
    ) -> Result<CapabilityDescriptor, DiscoveryError> {
        let contents = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest =
            StageManifest::from_yaml(&contents).map_err(|source| DiscoveryError::Manifest {
                path: path.to_path_buf(),
                source,
            })?;

        // The registry may already hold an earlier scan of this very manifest
        if manifest.base == manifest.name {
            return Err(DiscoveryError::SelfBase {
                path: path.to_path_buf(),
                name: manifest.name,
            });
        }

        // Earlier manifests in the same directory shadow the registry
        let base = match declared.get(&manifest.base) {
            Some(descriptor) => descriptor.clone(),
            None => known
                .get(&manifest.base)
                .map(|d| (*d).clone())
                .ok_or_else(|| DiscoveryError::UnknownBase {
                    path: path.to_path_buf(),
                    base: manifest.base.clone(),
                })?,
        };

        let factory = ManifestFactory {
            base: Arc::clone(&base.factory),
            defaults: manifest.properties.into_iter().collect(),
        };

        let mut descriptor = CapabilityDescriptor::new(manifest.name, Arc::new(factory))
            .with_description(manifest.description)
            .with_fingerprint(Fingerprint::of(&[
                b"manifest",
                contents.as_bytes(),
                base.fingerprint.as_bytes(),
            ]));
        descriptor.capabilities = base.capabilities.clone();
        for capability in manifest.capabilities {
            descriptor = descriptor.with_capability(capability);
        }
        descriptor.default_constructible = base.default_constructible;
        descriptor.constructor_args = base.constructor_args.clone();
        Ok(descriptor)
    }
}

impl DiscoverySource for DirectorySource {
    fn name(&self) -> String {
        format!("manifest directory {}", self.dir.display())
    }

    fn scan(&self, known: &Registry) -> Result<Vec<CapabilityDescriptor>, DiscoveryError> {
        let mut declared: HashMap<String, CapabilityDescriptor> = HashMap::new();
        let mut found = Vec::new();

        for path in self.manifest_paths()? {
            match Self::load(&path, known, &declared) {
                Ok(descriptor) => {
                    debug!(
                        "Manifest {} declares {}",
                        path.display(),
                        descriptor.name
                    );
                    declared.insert(descriptor.name.clone(), descriptor.clone());
                    found.push(descriptor);
                }
                Err(e) => warn!("Skipping manifest: {}", e),
            }
        }

        Ok(found)
    }
}

/// File name endings that mark a stage manifest
pub const MANIFEST_SUFFIXES: &[&str] = &[".stage.yaml", ".stage.yml"];

/// Whether `path` is named like a manifest
pub(crate) fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| MANIFEST_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
}
