//! Live reconfiguration: move a stage list onto a newer registry snapshot

use crate::descriptor::capability;
use crate::error::InstantiationError;
use crate::property::find_spec;
use crate::registry::Registry;
use crate::stage::{set_checked, StageHandle};
use crate::stage_list::StageList;
use tracing::{debug, warn};

/// What [`migrate_state`] did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Indices whose stage was replaced by a fresh instance
    pub replaced: Vec<usize>,

    /// Property values copied onto replacements
    pub copied: usize,

    /// Readable properties with no compatible counterpart on the replacement
    pub skipped: usize,
}

/// Build the list that `old` becomes under `registry`
///
/// Every position keeps its role. A stage is reused as-is when the registry
/// has no default-constructible implementation of its type, or when that
/// implementation is the one the stage was built from; otherwise a fresh
/// instance replaces it. Any instantiation failure aborts the whole call and
/// `old` stays in effect.
pub fn reconfigure(old: &StageList, registry: &Registry) -> Result<StageList, InstantiationError> {
    let mut new = StageList::new();
    for handle in old {
        new.push(reconfigure_one(handle, registry)?);
    }
    Ok(new)
}

fn reconfigure_one(
    handle: &StageHandle,
    registry: &Registry,
) -> Result<StageHandle, InstantiationError> {
    let Some(current) = handle.fingerprint() else {
        return Ok(handle.clone());
    };

    let candidate = registry
        .find(capability::STAGE, |d| {
            d.default_constructible && d.name == handle.type_name()
        })
        .into_iter()
        .next();

    match candidate {
        Some(descriptor) if descriptor.fingerprint != current => {
            debug!(
                "Replacing {} ({} -> {})",
                handle.type_name(),
                current,
                descriptor.fingerprint
            );
            registry.instantiate(&descriptor, &[])
        }
        _ => Ok(handle.clone()),
    }
}

/// Copy configured state from `old` onto the replacements in `new`
///
/// Pairs at the same index that are the same stage are left alone. For the
/// others every readable property of the old stage is written to the
/// writable property of the same name and kind on the new one.
pub fn migrate_state(old: &StageList, new: &StageList) -> MigrationReport {
    let mut report = MigrationReport::default();

    for (index, (from, to)) in old.iter().zip(new.iter()).enumerate() {
        if from.same(to) {
            continue;
        }
        report.replaced.push(index);

        let source = from.lock();
        let mut dest = to.lock();
        for spec in source.properties().iter().filter(|s| s.access.readable()) {
            let compatible = find_spec(dest.properties(), spec.name)
                .is_some_and(|t| t.access.writable() && t.kind == spec.kind);
            let value = match source.property(spec.name) {
                Some(value) if compatible => value,
                _ => {
                    debug!(
                        "Not migrating {}.{}: no compatible property",
                        to.type_name(),
                        spec.name
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            match set_checked(dest.as_mut(), spec.name, value) {
                Ok(()) => report.copied += 1,
                Err(e) => {
                    warn!("Failed to migrate {}.{}: {}", to.type_name(), spec.name, e);
                    report.skipped += 1;
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{CapabilityDescriptor, Fingerprint};
    use crate::property::PropertyValue;
    use crate::source::ModuleBatch;
    use crate::test_support::{failing_factory, probe_factory, reshaped_factory, Probe};

    fn batch(revision: u64, names: &[&str]) -> ModuleBatch {
        names.iter().fold(ModuleBatch::new("scripts", revision), |b, name| {
            b.with_stage(*name, probe_factory())
        })
    }

    fn registry_from(batch: &ModuleBatch) -> Registry {
        let mut registry = Registry::new();
        registry.discover(batch).unwrap();
        registry
    }

    #[test]
    fn test_unchanged_stages_are_reused() {
        let registry = registry_from(&batch(1, &["demo.A", "demo.B"]));
        let old = StageList::from_names(&registry, &["demo.A", "demo.B"]).unwrap();

        let mut snapshot = registry.clone();
        snapshot.merge(&registry);
        let new = reconfigure(&old, &snapshot).unwrap();

        assert_eq!(new.len(), 2);
        for (a, b) in old.iter().zip(new.iter()) {
            assert!(a.same(b));
        }
        assert!(migrate_state(&old, &new).replaced.is_empty());
    }

    #[test]
    fn test_replacement_migrates_properties() {
        let mut registry = registry_from(&batch(1, &["demo.A", "demo.B"]));
        let old = StageList::from_names(&registry, &["demo.A", "demo.B"]).unwrap();
        old.get(0)
            .unwrap()
            .set_property("gain", PropertyValue::Int(7))
            .unwrap();
        old.get(0).unwrap().lock().execute(&mut Default::default()).unwrap();

        // Only demo.A is rebuilt
        let rebuilt = registry_from(&batch(2, &["demo.A"]));
        registry.merge(&rebuilt);

        let new = reconfigure(&old, &registry).unwrap();
        assert!(!new.get(0).unwrap().same(old.get(0).unwrap()));
        assert!(new.get(1).unwrap().same(old.get(1).unwrap()));

        let report = migrate_state(&old, &new);
        assert_eq!(report.replaced, vec![0]);
        // gain and scale copied, executions is read-only on the target
        assert_eq!(report.copied, 2);
        assert_eq!(report.skipped, 1);

        let fresh = new.get(0).unwrap();
        assert_eq!(fresh.property("gain").unwrap(), PropertyValue::Int(7));
        assert_eq!(fresh.property("executions").unwrap(), PropertyValue::Int(0));
        assert_eq!(
            fresh.fingerprint(),
            Some(registry.get("demo.A").unwrap().fingerprint)
        );
    }

    #[test]
    fn test_mismatched_properties_keep_defaults() {
        let mut registry = Registry::new();
        registry.register(CapabilityDescriptor::new("demo.A", probe_factory()));
        let old = StageList::from_names(&registry, &["demo.A"]).unwrap();
        old.get(0)
            .unwrap()
            .set_property("gain", PropertyValue::Int(9))
            .unwrap();

        registry.register(
            CapabilityDescriptor::new("demo.A", reshaped_factory())
                .with_fingerprint(Fingerprint::of(&[b"reshaped"])),
        );
        let new = reconfigure(&old, &registry).unwrap();
        let report = migrate_state(&old, &new);

        assert_eq!(report.copied, 0);
        assert_eq!(report.skipped, 3);
        let fresh = new.get(0).unwrap();
        assert_eq!(
            fresh.property("gain").unwrap(),
            PropertyValue::Text("auto".into())
        );
        assert_eq!(fresh.property("threshold").unwrap(), PropertyValue::Float(0.5));
    }

    #[test]
    fn test_instantiation_failure_aborts_reconfiguration() {
        let mut registry = Registry::new();
        registry.register(CapabilityDescriptor::new("demo.A", probe_factory()));
        registry.register(CapabilityDescriptor::new("demo.B", probe_factory()));
        let old = StageList::from_names(&registry, &["demo.A", "demo.B"]).unwrap();

        registry.register(
            CapabilityDescriptor::new("demo.B", failing_factory())
                .with_fingerprint(Fingerprint::of(&[b"broken"])),
        );
        let err = reconfigure(&old, &registry).unwrap_err();
        assert!(matches!(err, InstantiationError::Factory { .. }));
    }

    #[test]
    fn test_stage_without_default_constructible_candidate_is_reused() {
        let mut registry = Registry::new();
        registry.register(CapabilityDescriptor::new("demo.A", probe_factory()));
        let mut old = StageList::from_names(&registry, &["demo.A"]).unwrap();
        old.push(StageHandle::anonymous(Probe::default()));

        registry.register(
            CapabilityDescriptor::new("demo.A", probe_factory())
                .with_fingerprint(Fingerprint::of(&[b"rebuilt"]))
                .requires_args(),
        );
        let new = reconfigure(&old, &registry).unwrap();
        assert!(new.get(0).unwrap().same(old.get(0).unwrap()));
        assert!(new.get(1).unwrap().same(old.get(1).unwrap()));
    }
}
