//! Per-run data bundle shared by all stages

use crate::engine::EngineHandle;
use crate::error::StageError;
use crate::interaction::Interactor;
use image::RgbImage;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Well-known bundle keys
pub mod keys {
    /// `bool`; a stage setting it to `true` ends the run after itself
    pub const CANCEL: &str = "cancel";

    /// `f64`; tick rate measured by the FPS meter
    pub const FPS: &str = "fps";
}

/// String-keyed map of stage-defined values flowing through one run
///
/// Besides stage data the bundle carries the interaction collaborator and a
/// handle to the engine driving the run.
#[derive(Default)]
pub struct Bundle {
    values: HashMap<String, Box<dyn Any + Send>>,
    interactor: Option<Arc<dyn Interactor>>,
    engine: Option<EngineHandle>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bundle that exposes `interactor` to stages
    pub fn with_interactor(interactor: Arc<dyn Interactor>) -> Self {
        Self {
            interactor: Some(interactor),
            ..Self::default()
        }
    }

    /// Insert a value, replacing any previous value under `key`
    pub fn insert<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Remove and return a value if it has type `T`
    ///
    /// A value of another type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.values
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Like [`Bundle::get`] but with an error a stage can return directly
    pub fn fetch<T: Any>(&self, key: &str) -> Result<&T, StageError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| StageError::MissingEntry(key.to_string()))?;
        value.downcast_ref::<T>().ok_or_else(|| {
            StageError::InvalidInput(format!(
                "bundle entry '{}' is not a {}",
                key,
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn fetch_image(&self, key: &str) -> Result<&RgbImage, StageError> {
        self.fetch::<RgbImage>(key)
    }

    /// The interaction collaborator for this run
    pub fn interactor(&self) -> Result<Arc<dyn Interactor>, StageError> {
        self.interactor
            .clone()
            .ok_or_else(|| StageError::MissingEntry("interactor".to_string()))
    }

    pub fn set_interactor(&mut self, interactor: Arc<dyn Interactor>) {
        self.interactor = Some(interactor);
    }

    /// Handle to the engine driving this run, if any
    pub fn engine(&self) -> Option<&EngineHandle> {
        self.engine.as_ref()
    }

    pub(crate) fn set_engine(&mut self, engine: EngineHandle) {
        self.engine = Some(engine);
    }

    /// Ask the engine to end the run after the current stage
    pub fn cancel(&mut self) {
        self.insert(keys::CANCEL, true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.get::<bool>(keys::CANCEL).copied().unwrap_or(false)
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Bundle")
            .field("keys", &keys)
            .field("interactor", &self.interactor.is_some())
            .field("engine", &self.engine.is_some())
            .finish()
    }
}
