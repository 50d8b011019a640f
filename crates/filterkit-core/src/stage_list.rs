//! Ordered stage lists and their persisted form

use crate::descriptor::{capability, CapabilityDescriptor};
use crate::error::{InstantiationError, PersistError, PropertyError};
use crate::property::PropertyValue;
use crate::registry::Registry;
use crate::stage::StageHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Ordered sequence of stages; order is execution order
#[derive(Clone, Debug, Default)]
pub struct StageList {
    stages: Vec<StageHandle>,
}

/// One persisted stage: its type and configured property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// On-disk layout of a stage list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageListFile {
    pub stages: Vec<StageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self, PersistError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Ok(Format::Yaml),
            Some("json") => Ok(Format::Json),
            _ => Err(PersistError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

impl StageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one stage
    pub fn push(&mut self, stage: StageHandle) {
        self.stages.push(stage);
    }

    /// Append every stage of `other`, keeping their identity
    pub fn append(&mut self, other: &StageList) {
        self.stages.extend(other.stages.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StageHandle> {
        self.stages.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StageHandle> {
        self.stages.iter()
    }

    /// Type names in execution order
    pub fn type_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.type_name().to_string()).collect()
    }

    /// Instantiate the default-constructible stages named `names`, in order
    pub fn from_names<S: AsRef<str>>(
        registry: &Registry,
        names: &[S],
    ) -> Result<Self, InstantiationError> {
        let mut list = Self::new();
        for name in names {
            list.push(registry.create(capability::STAGE, name.as_ref(), &[])?);
        }
        Ok(list)
    }

    /// Snapshot of every stage's type and read-write properties
    pub fn to_records(&self) -> Result<StageListFile, PersistError> {
        let mut stages = Vec::with_capacity(self.stages.len());
        for (index, handle) in self.stages.iter().enumerate() {
            if handle.is_anonymous() {
                return Err(PersistError::Anonymous(index));
            }

            let stage = handle.lock();
            let properties = stage
                .properties()
                .iter()
                .filter(|spec| spec.access.readable() && spec.access.writable())
                .filter_map(|spec| {
                    stage
                        .property(spec.name)
                        .map(|value| (spec.name.to_string(), value))
                })
                .collect();
            stages.push(StageRecord {
                type_name: handle.type_name().to_string(),
                properties,
            });
        }
        Ok(StageListFile { stages })
    }

    /// Instantiate every record against `registry`
    ///
    /// All types are resolved before anything is built, so an unknown type
    /// yields no partial list.
    pub fn from_records(file: &StageListFile, registry: &Registry) -> Result<Self, PersistError> {
        let mut descriptors = Vec::with_capacity(file.stages.len());
        for record in &file.stages {
            let descriptor = registry
                .find_by_name(capability::STAGE, &record.type_name)
                .ok_or_else(|| PersistError::UnknownStageType(record.type_name.clone()))?;
            descriptors.push(descriptor);
        }

        let mut list = Self::new();
        for (record, descriptor) in file.stages.iter().zip(descriptors) {
            let args = constructor_args(&descriptor, record);
            let handle = registry.instantiate(&descriptor, &args)?;
            for (name, value) in &record.properties {
                match handle.set_property(name, value.clone()) {
                    Ok(()) => {}
                    Err(PropertyError::Unknown(_)) => {
                        warn!(
                            "{} has no property '{}', ignoring saved value",
                            record.type_name, name
                        );
                    }
                    Err(source) => {
                        return Err(PersistError::Property {
                            stage: record.type_name.clone(),
                            source,
                        })
                    }
                }
            }
            list.push(handle);
        }
        Ok(list)
    }

    /// Load a persisted list; YAML or JSON by file extension
    pub fn load(path: impl AsRef<Path>, registry: &Registry) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let format = Format::from_path(path)?;
        let contents = std::fs::read_to_string(path)?;
        let file: StageListFile = match format {
            Format::Yaml => serde_yaml::from_str(&contents)?,
            Format::Json => serde_json::from_str(&contents)?,
        };

        let list = Self::from_records(&file, registry)?;
        info!("Loaded {} stages from {}", list.len(), path.display());
        Ok(list)
    }

    /// Persist the list; YAML or JSON by file extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        let format = Format::from_path(path)?;
        let file = self.to_records()?;
        let contents = match format {
            Format::Yaml => serde_yaml::to_string(&file)?,
            Format::Json => serde_json::to_string_pretty(&file)?,
        };
        std::fs::write(path, contents)?;
        debug!("Saved {} stages to {}", self.len(), path.display());
        Ok(())
    }
}

/// Saved values of the properties `descriptor` takes as arguments
///
/// Stops at the first property the record lacks; default-constructible types
/// get none.
fn constructor_args(
    descriptor: &CapabilityDescriptor,
    record: &StageRecord,
) -> Vec<PropertyValue> {
    if descriptor.default_constructible {
        return Vec::new();
    }
    descriptor
        .constructor_args
        .iter()
        .map_while(|name| record.properties.get(name).cloned())
        .collect()
}

impl FromIterator<StageHandle> for StageList {
    fn from_iter<I: IntoIterator<Item = StageHandle>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}

impl Extend<StageHandle> for StageList {
    fn extend<I: IntoIterator<Item = StageHandle>>(&mut self, iter: I) {
        self.stages.extend(iter);
    }
}

impl<'a> IntoIterator for &'a StageList {
    type Item = &'a StageHandle;
    type IntoIter = std::slice::Iter<'a, StageHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{probe_descriptor, Probe};
    use tempfile::TempDir;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(probe_descriptor("demo.A"));
        registry.register(probe_descriptor("demo.B"));
        registry
    }

    #[test]
    fn test_from_names_keeps_order() {
        let list = StageList::from_names(&registry(), &["demo.B", "demo.A", "demo.B"]).unwrap();
        assert_eq!(list.type_names(), vec!["demo.B", "demo.A", "demo.B"]);
        assert!(!list.get(0).unwrap().same(list.get(2).unwrap()));

        let err = StageList::from_names(&registry(), &["demo.Z"]).unwrap_err();
        assert!(matches!(err, InstantiationError::NotFound { .. }));
    }

    #[test]
    fn test_append_shares_stages() {
        let registry = registry();
        let first = StageList::from_names(&registry, &["demo.A"]).unwrap();
        let mut combined = StageList::new();
        combined.append(&first);
        combined.push(StageHandle::anonymous(Probe::default()));
        assert_eq!(combined.len(), 2);
        assert!(combined.get(0).unwrap().same(first.get(0).unwrap()));
    }

    #[test]
    fn test_save_and_load_restore_properties() {
        let dir = TempDir::new().unwrap();
        let registry = registry();
        let list = StageList::from_names(&registry, &["demo.A", "demo.B"]).unwrap();
        list.get(0)
            .unwrap()
            .set_property("gain", PropertyValue::Int(4))
            .unwrap();
        list.get(1)
            .unwrap()
            .set_property("scale", PropertyValue::Float(0.25))
            .unwrap();

        for file in ["list.yaml", "list.json"] {
            let path = dir.path().join(file);
            list.save(&path).unwrap();
            let loaded = StageList::load(&path, &registry).unwrap();

            assert_eq!(loaded.type_names(), vec!["demo.A", "demo.B"]);
            let a = loaded.get(0).unwrap();
            let b = loaded.get(1).unwrap();
            assert_eq!(a.property("gain").unwrap(), PropertyValue::Int(4));
            assert_eq!(b.property("scale").unwrap(), PropertyValue::Float(0.25));
            // read-only state is not persisted
            assert_eq!(a.property("executions").unwrap(), PropertyValue::Int(0));
            assert!(!a.same(list.get(0).unwrap()));
        }
    }

    #[test]
    fn test_records_skip_read_only_properties() {
        let list = StageList::from_names(&registry(), &["demo.A"]).unwrap();
        let file = list.to_records().unwrap();
        let keys: Vec<_> = file.stages[0].properties.keys().cloned().collect();
        assert_eq!(keys, vec!["gain", "scale"]);
    }

    #[test]
    fn test_load_unknown_type_fails_without_partial_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.yaml");
        std::fs::write(
            &path,
            "stages:\n  - type: demo.A\n  - type: demo.Gone\n    properties:\n      gain: 1\n",
        )
        .unwrap();

        let err = StageList::load(&path, &registry()).unwrap_err();
        assert!(matches!(err, PersistError::UnknownStageType(ref name) if name == "demo.Gone"));
    }

    #[test]
    fn test_load_accepts_int_for_float_and_rejects_bad_kind() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.yaml");
        std::fs::write(
            &good,
            "stages:\n  - type: demo.A\n    properties:\n      scale: 3\n      retired: true\n",
        )
        .unwrap();
        let list = StageList::load(&good, &registry()).unwrap();
        assert_eq!(
            list.get(0).unwrap().property("scale").unwrap(),
            PropertyValue::Float(3.0)
        );

        let bad = dir.path().join("bad.json");
        std::fs::write(
            &bad,
            r#"{"stages": [{"type": "demo.A", "properties": {"gain": "high"}}]}"#,
        )
        .unwrap();
        let err = StageList::load(&bad, &registry()).unwrap_err();
        assert!(matches!(err, PersistError::Property { .. }));
    }

    #[test]
    fn test_anonymous_stages_cannot_be_saved() {
        let mut list = StageList::from_names(&registry(), &["demo.A"]).unwrap();
        list.push(StageHandle::anonymous(Probe::default()));
        let dir = TempDir::new().unwrap();
        let err = list.save(dir.path().join("list.yaml")).unwrap_err();
        assert!(matches!(err, PersistError::Anonymous(1)));
    }

    #[test]
    fn test_unsupported_extension() {
        let list = StageList::new();
        let err = list.save("pipeline.toml").unwrap_err();
        assert!(matches!(err, PersistError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_stage_with_constructor_args_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry();
        registry.register(probe_descriptor("demo.Sink").with_constructor_args(["gain"]));

        let sink = registry
            .create(capability::STAGE, "demo.Sink", &[PropertyValue::Int(7)])
            .unwrap();
        sink.set_property("scale", PropertyValue::Float(2.5)).unwrap();
        let list: StageList = [sink].into_iter().collect();

        let path = dir.path().join("list.yaml");
        list.save(&path).unwrap();
        let loaded = StageList::load(&path, &registry).unwrap();
        let restored = loaded.get(0).unwrap();
        assert_eq!(restored.type_name(), "demo.Sink");
        assert_eq!(restored.property("gain").unwrap(), PropertyValue::Int(7));
        assert_eq!(restored.property("scale").unwrap(), PropertyValue::Float(2.5));
    }

    #[test]
    fn test_record_missing_constructor_args_fails() {
        let mut registry = registry();
        registry.register(probe_descriptor("demo.Sink").with_constructor_args(["gain"]));
        let file = StageListFile {
            stages: vec![StageRecord {
                type_name: "demo.Sink".into(),
                properties: BTreeMap::new(),
            }],
        };
        let err = StageList::from_records(&file, &registry).unwrap_err();
        assert!(matches!(
            err,
            PersistError::Instantiation(InstantiationError::NotDefaultConstructible(_))
        ));
    }
}
