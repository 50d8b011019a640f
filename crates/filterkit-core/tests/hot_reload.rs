//! End-to-end reload through a manifest directory

use filterkit_core::{
    Bundle, CapabilityDescriptor, DirectorySource, EngineConfig, EngineEvent, Flow, ModuleBatch,
    PipelineHost, PropertyError, PropertyKind, PropertySpec, PropertyValue, Registry, Stage,
    StageError, StageList,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const COUNTER_PROPERTIES: &[PropertySpec] = &[
    PropertySpec::read_write("step", PropertyKind::Int),
    PropertySpec::read_write("label", PropertyKind::Text),
    PropertySpec::read_only("total", PropertyKind::Int),
];

#[derive(Default)]
struct Counter {
    step: i64,
    label: String,
    total: i64,
}

impl Stage for Counter {
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError> {
        self.total += self.step;
        bundle.insert("total", self.total);
        Ok(Flow::Continue)
    }

    fn properties(&self) -> &[PropertySpec] {
        COUNTER_PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "step" => Some(self.step.into()),
            "label" => Some(self.label.clone().into()),
            "total" => Some(self.total.into()),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "step" => self.step = value.into_int(name)?,
            "label" => self.label = value.into_text(name)?,
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

fn base_registry() -> Registry {
    let batch = ModuleBatch::new("base", 1).with(CapabilityDescriptor::new(
        "lab.Counter",
        Arc::new(|_: &[PropertyValue]| -> Result<Box<dyn Stage>, StageError> {
            Ok(Box::new(Counter::default()))
        }),
    ));
    let mut registry = Registry::new();
    registry.discover(&batch).unwrap();
    registry
}

fn write_manifest(dir: &TempDir, step: i64) {
    fs::write(
        dir.path().join("fast.stage.yaml"),
        format!("name: lab.FastCounter\nbase: lab.Counter\nproperties:\n  step: {step}\n  label: fast\n"),
    )
    .unwrap();
}

#[test]
fn test_manifest_edit_replaces_running_stage() {
    let dir = TempDir::new().unwrap();
    write_manifest(&dir, 5);
    let source = DirectorySource::new(dir.path());

    let mut registry = base_registry();
    registry.discover(&source).unwrap();
    let stages = StageList::from_names(&registry, &["lab.Counter", "lab.FastCounter"]).unwrap();
    assert_eq!(
        stages.get(1).unwrap().property("step").unwrap(),
        PropertyValue::Int(5)
    );
    stages
        .get(1)
        .unwrap()
        .set_property("label", PropertyValue::Text("tuned".into()))
        .unwrap();
    let untouched = stages.get(0).unwrap().clone();
    let edited = stages.get(1).unwrap().clone();

    let mut host = PipelineHost::new(registry, EngineConfig::with_target_fps(100.0));
    host.set_stages(stages).unwrap();
    let events = host.engine().subscribe();
    host.start().unwrap();
    std::thread::sleep(Duration::from_millis(30));

    write_manifest(&dir, 9);
    let outcome = host.reload(&source).unwrap();
    assert!(outcome.restarted);
    assert_eq!(outcome.migration.replaced, vec![1]);

    host.stop(true);
    host.wait();

    let stages = host.stages();
    assert!(stages.get(0).unwrap().same(&untouched));
    assert!(!stages.get(1).unwrap().same(&edited));
    // Configured values travel with the stage
    assert_eq!(
        stages.get(1).unwrap().property("label").unwrap(),
        PropertyValue::Text("tuned".into())
    );

    let kinds: Vec<_> = events
        .try_iter()
        .map(|e| matches!(e, EngineEvent::Starting))
        .collect();
    assert_eq!(kinds, vec![true, false, true, false]);
}

#[test]
fn test_manifest_types_survive_persistence() {
    let dir = TempDir::new().unwrap();
    write_manifest(&dir, 3);

    let mut registry = base_registry();
    registry.discover(&DirectorySource::new(dir.path())).unwrap();
    let stages = StageList::from_names(&registry, &["lab.FastCounter"]).unwrap();
    stages
        .get(0)
        .unwrap()
        .set_property("step", PropertyValue::Int(4))
        .unwrap();

    let path = dir.path().join("pipeline.json");
    stages.save(&path).unwrap();
    let loaded = StageList::load(&path, &registry).unwrap();

    assert_eq!(loaded.type_names(), vec!["lab.FastCounter"]);
    assert_eq!(
        loaded.get(0).unwrap().property("step").unwrap(),
        PropertyValue::Int(4)
    );
    assert_eq!(
        loaded.get(0).unwrap().property("label").unwrap(),
        PropertyValue::Text("fast".into())
    );
}
