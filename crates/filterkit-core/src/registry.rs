//! Capability registry: discovery, lookup and instantiation of stage types

use crate::descriptor::CapabilityDescriptor;
use crate::error::{DiscoveryError, InstantiationError};
use crate::property::PropertyValue;
use crate::source::DiscoverySource;
use crate::stage::StageHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry of discovered stage implementations
///
/// Cloning is cheap (descriptors are shared) and yields an independent
/// snapshot.
#[derive(Clone, Default)]
pub struct Registry {
    /// All descriptors in discovery order
    entries: Vec<Arc<CapabilityDescriptor>>,

    /// Position in `entries` by fully-qualified name
    by_name: HashMap<String, usize>,

    /// Positions in `entries` by capability
    by_capability: HashMap<String, Vec<usize>>,
}

/// Outcome of discovering from several sources
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Descriptors added or replaced
    pub discovered: usize,

    /// Sources that could not be scanned
    pub failures: Vec<(String, DiscoveryError)>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor
    ///
    /// A descriptor with the same name replaces the existing one in place.
    /// Returns `true` when an entry was replaced.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> bool {
        self.register_shared(Arc::new(descriptor))
    }

    fn register_shared(&mut self, descriptor: Arc<CapabilityDescriptor>) -> bool {
        let replaced = match self.by_name.get(&descriptor.name) {
            Some(&idx) => {
                debug!(
                    "Replacing stage type {} ({} -> {})",
                    descriptor.name, self.entries[idx].fingerprint, descriptor.fingerprint
                );
                self.entries[idx] = descriptor;
                true
            }
            None => {
                debug!("Registering stage type {}", descriptor.name);
                self.by_name
                    .insert(descriptor.name.clone(), self.entries.len());
                self.entries.push(descriptor);
                false
            }
        };

        self.compute_capability_index();
        replaced
    }

    /// Scan `source` and register everything it yields
    pub fn discover(&mut self, source: &dyn DiscoverySource) -> Result<usize, DiscoveryError> {
        let found = source.scan(self)?;
        let count = found.len();
        for descriptor in found {
            self.register(descriptor);
        }
        info!("Discovered {} stage types from {}", count, source.name());
        Ok(count)
    }

    /// Discover from every source, skipping the ones that fail
    pub fn discover_all(&mut self, sources: &[&dyn DiscoverySource]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for source in sources {
            match self.discover(*source) {
                Ok(count) => report.discovered += count,
                Err(e) => {
                    warn!("Skipping discovery source {}: {}", source.name(), e);
                    report.failures.push((source.name(), e));
                }
            }
        }
        report
    }

    /// All descriptors under `capability` for which `predicate` holds
    ///
    /// Results are in discovery order. An empty result is not an error.
    pub fn find<P>(&self, capability: &str, predicate: P) -> Vec<Arc<CapabilityDescriptor>>
    where
        P: Fn(&CapabilityDescriptor) -> bool,
    {
        let Some(indices) = self.by_capability.get(capability) else {
            return Vec::new();
        };
        indices
            .iter()
            .map(|&idx| &self.entries[idx])
            .filter(|descriptor| predicate(descriptor))
            .cloned()
            .collect()
    }

    /// The descriptor named `name` if it satisfies `capability`
    pub fn find_by_name(&self, capability: &str, name: &str) -> Option<Arc<CapabilityDescriptor>> {
        self.get(name).filter(|d| d.implements(capability))
    }

    /// Get descriptor by name
    pub fn get(&self, name: &str) -> Option<Arc<CapabilityDescriptor>> {
        self.by_name
            .get(name)
            .map(|&idx| Arc::clone(&self.entries[idx]))
    }

    /// Registered names in discovery order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|d| d.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CapabilityDescriptor>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Construct a live stage from `descriptor`
    pub fn instantiate(
        &self,
        descriptor: &CapabilityDescriptor,
        args: &[PropertyValue],
    ) -> Result<StageHandle, InstantiationError> {
        if args.is_empty() && !descriptor.default_constructible {
            return Err(InstantiationError::NotDefaultConstructible(
                descriptor.name.clone(),
            ));
        }

        let stage = descriptor
            .factory
            .create(args)
            .map_err(|source| InstantiationError::Factory {
                name: descriptor.name.clone(),
                source,
            })?;

        debug!(
            "Instantiated {} ({})",
            descriptor.name, descriptor.fingerprint
        );
        Ok(StageHandle::new(
            descriptor.name.clone(),
            Some(descriptor.fingerprint),
            stage,
        ))
    }

    /// Look up `name` under `capability` and instantiate it
    pub fn create(
        &self,
        capability: &str,
        name: &str,
        args: &[PropertyValue],
    ) -> Result<StageHandle, InstantiationError> {
        let descriptor =
            self.find_by_name(capability, name)
                .ok_or_else(|| InstantiationError::NotFound {
                    capability: capability.to_string(),
                    name: name.to_string(),
                })?;
        self.instantiate(&descriptor, args)
    }

    /// Absorb `other`: same-named entries are replaced, new ones appended
    ///
    /// Names present only in `self` are kept.
    pub fn merge(&mut self, other: &Registry) {
        for descriptor in &other.entries {
            self.register_shared(Arc::clone(descriptor));
        }
    }

    fn compute_capability_index(&mut self) {
        self.by_capability.clear();
        for (idx, descriptor) in self.entries.iter().enumerate() {
            for capability in &descriptor.capabilities {
                self.by_capability
                    .entry(capability.clone())
                    .or_default()
                    .push(idx);
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}
