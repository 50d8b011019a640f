//! Discovery sources feeding the registry
//!
//! A source yields a batch of capability descriptors. The registry does not
//! care whether they were linked into the binary, read from a directory of
//! manifests, or produced by an external build step.

mod batch;
mod directory;
mod statics;
mod watch;

pub use batch::ModuleBatch;
pub use directory::{DirectorySource, StageManifest, MANIFEST_SUFFIXES};
pub use statics::{StageRegistration, StaticSource};
pub use watch::{ModuleWatcher, DEFAULT_DEBOUNCE_MS};

use crate::descriptor::CapabilityDescriptor;
use crate::error::DiscoveryError;
use crate::registry::Registry;

/// A place stage implementations can be discovered from
pub trait DiscoverySource {
    /// Name used in logs and discovery reports
    fn name(&self) -> String;

    /// Produce descriptors for every implementation found
    ///
    /// `known` is the registry being populated; sources that build on
    /// existing implementations resolve them there.
    fn scan(&self, known: &Registry) -> Result<Vec<CapabilityDescriptor>, DiscoveryError>;
}
