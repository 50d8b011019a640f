//! Batches of implementations produced outside the process

use super::DiscoverySource;
use crate::descriptor::{CapabilityDescriptor, Fingerprint, StageFactory};
use crate::error::DiscoveryError;
use crate::registry::Registry;
use std::sync::Arc;

/// A set of freshly built stage implementations
///
/// This is what an external build step hands to the runtime after compiling
/// plugin code. Every descriptor in the batch is stamped with a fingerprint
/// derived from the batch label and revision, so a rebuilt batch replaces all
/// of its stages on reconfiguration, like a reloaded module would.
#[derive(Clone, Debug)]
pub struct ModuleBatch {
    label: String,
    revision: u64,
    descriptors: Vec<CapabilityDescriptor>,
}

impl ModuleBatch {
    pub fn new(label: impl Into<String>, revision: u64) -> Self {
        Self {
            label: label.into(),
            revision,
            descriptors: Vec::new(),
        }
    }

    /// Add a descriptor, stamping it with this batch's fingerprint
    pub fn with(mut self, descriptor: CapabilityDescriptor) -> Self {
        let fingerprint = Fingerprint::of(&[
            b"batch",
            self.label.as_bytes(),
            &self.revision.to_le_bytes(),
            descriptor.name.as_bytes(),
        ]);
        self.descriptors
            .push(descriptor.with_fingerprint(fingerprint));
        self
    }

    /// Add a default-constructible stage built by `factory`
    pub fn with_stage(self, name: impl Into<String>, factory: Arc<dyn StageFactory>) -> Self {
        self.with(CapabilityDescriptor::new(name, factory))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl DiscoverySource for ModuleBatch {
    fn name(&self) -> String {
        format!("module batch '{}' r{}", self.label, self.revision)
    }

    fn scan(&self, _known: &Registry) -> Result<Vec<CapabilityDescriptor>, DiscoveryError> {
        Ok(self.descriptors.clone())
    }
}
