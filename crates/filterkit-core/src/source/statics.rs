//! Stage implementations linked into the binary
//!
//! Crates register their stages at compile time with [`crate::submit_stage!`];
//! [`StaticSource`] walks whatever was linked in.

use super::DiscoverySource;
use crate::descriptor::{capability, CapabilityDescriptor, Fingerprint};
use crate::error::{DiscoveryError, StageError};
use crate::property::PropertyValue;
use crate::registry::Registry;
use crate::stage::Stage;
use std::sync::Arc;

/// Constructor signature of a statically registered stage
pub type CreateFn = fn(&[PropertyValue]) -> Result<Box<dyn Stage>, StageError>;

/// Compile-time registration of one stage type
#[derive(Debug)]
pub struct StageRegistration {
    pub name: &'static str,
    pub description: &'static str,
    pub capabilities: &'static [&'static str],
    pub default_constructible: bool,
    /// Properties passed positionally to `create`, in order
    pub constructor_args: &'static [&'static str],
    pub create: CreateFn,
    pub module: &'static str,
}

impl StageRegistration {
    pub const fn new(name: &'static str, create: CreateFn) -> Self {
        Self {
            name,
            description: "",
            capabilities: &[capability::STAGE],
            default_constructible: true,
            constructor_args: &[],
            create,
            module: "",
        }
    }

    pub const fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn capabilities(mut self, capabilities: &'static [&'static str]) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// `create` needs arguments: the values of the properties `names`
    pub const fn requires_args(mut self, names: &'static [&'static str]) -> Self {
        self.default_constructible = false;
        self.constructor_args = names;
        self
    }

    /// Set by [`crate::submit_stage!`]
    pub const fn in_module(mut self, module: &'static str) -> Self {
        self.module = module;
        self
    }

    fn descriptor(&self) -> CapabilityDescriptor {
        let mut descriptor = CapabilityDescriptor::new(self.name, Arc::new(self.create))
            .with_description(self.description)
            .with_fingerprint(Fingerprint::of(&[
                b"static",
                self.module.as_bytes(),
                self.name.as_bytes(),
            ]));
        descriptor.capabilities = self.capabilities.iter().map(|c| c.to_string()).collect();
        descriptor.default_constructible = self.default_constructible;
        descriptor.constructor_args = self
            .constructor_args
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        descriptor
    }
}

inventory::collect!(StageRegistration);

/// Register a stage type with the static source
///
/// ```ignore
/// filterkit_core::submit_stage!(
///     StageRegistration::new("toolbox.Sleep", Sleep::create).describe("Blocks for a while")
/// );
/// ```
#[macro_export]
macro_rules! submit_stage {
    ($registration:expr) => {
        $crate::inventory::submit! {
            ($registration).in_module(module_path!())
        }
    };
}

/// Every stage registered with [`crate::submit_stage!`] in the linked crates
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    scope: Option<&'static str>,
}

impl StaticSource {
    /// All linked registrations
    pub fn all() -> Self {
        Self { scope: None }
    }

    /// Only registrations whose module path starts with `prefix`
    pub fn scoped(prefix: &'static str) -> Self {
        Self {
            scope: Some(prefix),
        }
    }
}

impl DiscoverySource for StaticSource {
    fn name(&self) -> String {
        match self.scope {
            Some(scope) => format!("linked stages in {scope}"),
            None => "linked stages".to_string(),
        }
    }

    fn scan(&self, _known: &Registry) -> Result<Vec<CapabilityDescriptor>, DiscoveryError> {
        let mut registrations: Vec<&StageRegistration> = inventory::iter::<StageRegistration>
            .into_iter()
            .filter(|r| self.scope.map_or(true, |scope| r.module.starts_with(scope)))
            .collect();
        // Link order is not stable across builds
        registrations.sort_by_key(|r| r.name);
        Ok(registrations.iter().map(|r| r.descriptor()).collect())
    }
}
