//! Stage trait and identity-carrying stage handles

use crate::bundle::Bundle;
use crate::descriptor::Fingerprint;
use crate::error::{InstantiationError, PropertyError, StageError};
use crate::event::EventHandlers;
use crate::property::{find_spec, PropertySpec, PropertyValue};
use crate::registry::Registry;
use crate::stage_list::StageList;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Type name given to stages not built from a registry descriptor
pub const ANONYMOUS: &str = "anonymous";

/// Outcome of one stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Hand the bundle to the next stage
    Continue,

    /// Skip the rest of this tick and end the run after it
    Stop,
}

/// Core stage trait - every pipeline stage implements this
pub trait Stage: Send {
    /// Process the shared bundle for one tick
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError>;

    /// Property schema
    fn properties(&self) -> &[PropertySpec] {
        &[]
    }

    /// Read a property declared readable in the schema
    fn property(&self, name: &str) -> Option<PropertyValue> {
        let _ = name;
        None
    }

    /// Write a property declared writable in the schema
    ///
    /// Callers going through [`StageHandle::set_property`] have already
    /// checked the name, access and kind against the schema.
    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        let _ = value;
        Err(PropertyError::Unknown(name.to_string()))
    }

    /// Named event handlers for deferred dispatch
    fn events(&self) -> Option<&EventHandlers> {
        None
    }

    /// The stage-list-provider capability, if this stage carries it
    fn list_provider(&self) -> Option<&dyn StageListProvider> {
        None
    }
}

/// Builds a complete stage list from the registry
pub trait StageListProvider {
    fn create_stage_list(&self, registry: &Registry) -> Result<StageList, InstantiationError>;
}

struct StageSlot {
    type_name: String,
    fingerprint: Option<Fingerprint>,
    stage: Mutex<Box<dyn Stage>>,
}

/// Shared handle to one live stage
///
/// Cloning a handle does not clone the stage: two handles are the same stage
/// iff [`StageHandle::same`] holds.
#[derive(Clone)]
pub struct StageHandle(Arc<StageSlot>);

impl StageHandle {
    /// Wrap a stage built from the descriptor `type_name`
    pub fn new(
        type_name: impl Into<String>,
        fingerprint: Option<Fingerprint>,
        stage: Box<dyn Stage>,
    ) -> Self {
        Self(Arc::new(StageSlot {
            type_name: type_name.into(),
            fingerprint,
            stage: Mutex::new(stage),
        }))
    }

    /// Wrap a stage that did not come from the registry
    pub fn anonymous(stage: impl Stage + 'static) -> Self {
        Self::new(ANONYMOUS, None, Box::new(stage))
    }

    /// Wrap a closure as an anonymous stage
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(&mut Bundle) -> Result<Flow, StageError> + Send + 'static,
    {
        Self::anonymous(FnStage(f))
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.0.fingerprint
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.fingerprint.is_none()
    }

    /// Object identity
    pub fn same(&self, other: &StageHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Lock the stage for direct access
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Stage>> {
        self.0.stage.lock()
    }

    /// Copy of the stage's property schema
    pub fn properties(&self) -> Vec<PropertySpec> {
        self.lock().properties().to_vec()
    }

    /// Read a property, checking it against the schema
    pub fn property(&self, name: &str) -> Result<PropertyValue, PropertyError> {
        let stage = self.lock();
        let spec = find_spec(stage.properties(), name)
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
        if !spec.access.readable() {
            return Err(PropertyError::Unknown(name.to_string()));
        }
        stage
            .property(name)
            .ok_or_else(|| PropertyError::Unknown(name.to_string()))
    }

    /// Write a property, checking name, access and kind against the schema
    pub fn set_property(&self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        set_checked(&mut **self.lock(), name, value)
    }
}

/// Write a property on a bare stage, checking it against the schema
pub fn set_checked(
    stage: &mut dyn Stage,
    name: &str,
    value: PropertyValue,
) -> Result<(), PropertyError> {
    let spec = *find_spec(stage.properties(), name)
        .ok_or_else(|| PropertyError::Unknown(name.to_string()))?;
    if !spec.access.writable() {
        return Err(PropertyError::ReadOnly(name.to_string()));
    }
    let found = value.kind();
    let value = value
        .coerce(spec.kind)
        .ok_or_else(|| PropertyError::TypeMismatch {
            name: name.to_string(),
            expected: spec.kind,
            found,
        })?;
    stage.set_property(name, value)
}

impl fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageHandle")
            .field("type_name", &self.0.type_name)
            .field("fingerprint", &self.0.fingerprint)
            .finish()
    }
}

/// Closure-backed stage
pub struct FnStage<F>(pub F);

impl<F> Stage for FnStage<F>
where
    F: FnMut(&mut Bundle) -> Result<Flow, StageError> + Send,
{
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError> {
        (self.0)(bundle)
    }
}
