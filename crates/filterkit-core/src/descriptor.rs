//! Capability descriptors: metadata about one discoverable stage implementation

use crate::error::StageError;
use crate::property::PropertyValue;
use crate::stage::Stage;
use std::fmt;
use std::sync::Arc;

/// Well-known capability names
pub mod capability {
    /// Executable pipeline stage
    pub const STAGE: &str = "stage";

    /// Builds a complete stage list from the registry
    pub const STAGE_LIST_PROVIDER: &str = "stage-list-provider";
}

/// Identity of one concrete implementation
///
/// Two descriptors (or a descriptor and a live stage) with equal fingerprints
/// were produced by the same code and configuration defaults.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash an ordered list of identifying parts
    pub fn of(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            // Length prefix keeps ("ab", "c") distinct from ("a", "bc")
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..12])
    }
}

/// Construction handle of a descriptor
pub trait StageFactory: Send + Sync {
    /// Build a new stage; `args` are positional constructor arguments
    fn create(&self, args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError>;
}

impl<F> StageFactory for F
where
    F: Fn(&[PropertyValue]) -> Result<Box<dyn Stage>, StageError> + Send + Sync,
{
    fn create(&self, args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        self(args)
    }
}

/// Metadata about one discoverable stage implementation
#[derive(Clone)]
pub struct CapabilityDescriptor {
    /// Fully-qualified type name, unique within one registry
    pub name: String,

    /// Human readable description
    pub description: String,

    /// Capability names this implementation satisfies
    pub capabilities: Vec<String>,

    /// Whether the factory can be called without arguments
    pub default_constructible: bool,

    /// Properties the factory takes as positional arguments, in order
    ///
    /// Lets a persisted stage that needs arguments be rebuilt from its saved
    /// property values.
    pub constructor_args: Vec<String>,

    /// Identity of the implementation behind `factory`
    pub fingerprint: Fingerprint,

    /// Construction handle
    pub factory: Arc<dyn StageFactory>,
}

impl CapabilityDescriptor {
    /// Create a default-constructible stage descriptor
    pub fn new(name: impl Into<String>, factory: Arc<dyn StageFactory>) -> Self {
        let name = name.into();
        let fingerprint = Fingerprint::of(&[b"descriptor", name.as_bytes()]);
        Self {
            name,
            description: String::new(),
            capabilities: vec![capability::STAGE.to_string()],
            default_constructible: true,
            constructor_args: Vec::new(),
            fingerprint,
            factory,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a capability (duplicates are ignored)
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Mark the implementation as requiring constructor arguments
    pub fn requires_args(mut self) -> Self {
        self.default_constructible = false;
        self
    }

    /// Mark the implementation as taking the properties `names` as arguments
    pub fn with_constructor_args<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_constructible = false;
        self.constructor_args = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Check if this implementation satisfies `capability`
    pub fn implements(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("default_constructible", &self.default_constructible)
            .field("constructor_args", &self.constructor_args)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}
