//! Mock stages shared by unit tests

use crate::bundle::Bundle;
use crate::descriptor::{CapabilityDescriptor, StageFactory};
use crate::error::{PropertyError, StageError};
use crate::property::{PropertyKind, PropertySpec, PropertyValue};
use crate::stage::{Flow, Stage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const PROBE_PROPERTIES: &[PropertySpec] = &[
    PropertySpec::read_write("gain", PropertyKind::Int),
    PropertySpec::read_write("scale", PropertyKind::Float),
    PropertySpec::read_only("executions", PropertyKind::Int),
];

/// Configurable stage with a few typed properties
#[derive(Debug, Default)]
pub struct Probe {
    pub gain: i64,
    pub scale: f64,
    pub executions: i64,
}

impl Stage for Probe {
    fn execute(&mut self, _bundle: &mut Bundle) -> Result<Flow, StageError> {
        self.executions += 1;
        Ok(Flow::Continue)
    }

    fn properties(&self) -> &[PropertySpec] {
        PROBE_PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "gain" => Some(PropertyValue::Int(self.gain)),
            "scale" => Some(PropertyValue::Float(self.scale)),
            "executions" => Some(PropertyValue::Int(self.executions)),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "gain" => self.gain = value.into_int(name)?,
            "scale" => self.scale = value.into_float(name)?,
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

/// Builds [`Probe`]s; an optional first int argument sets `gain`
pub fn probe_factory() -> Arc<dyn StageFactory> {
    Arc::new(|args: &[PropertyValue]| -> Result<Box<dyn Stage>, StageError> {
        let mut probe = Probe::default();
        if let Some(arg) = args.first() {
            probe.gain = arg.clone().into_int("gain")?;
        }
        Ok(Box::new(probe))
    })
}

pub fn probe_descriptor(name: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::new(name, probe_factory())
}

pub fn failing_factory() -> Arc<dyn StageFactory> {
    Arc::new(|_: &[PropertyValue]| -> Result<Box<dyn Stage>, StageError> {
        Err(StageError::ExecutionFailed("device unavailable".into()))
    })
}

const RESHAPED_PROPERTIES: &[PropertySpec] = &[
    PropertySpec::read_write("gain", PropertyKind::Text),
    PropertySpec::read_write("threshold", PropertyKind::Float),
];

/// Stage whose `gain` changed type and which gained `threshold`
#[derive(Debug)]
pub struct Reshaped {
    pub gain: String,
    pub threshold: f64,
}

impl Default for Reshaped {
    fn default() -> Self {
        Self {
            gain: "auto".to_string(),
            threshold: 0.5,
        }
    }
}

impl Stage for Reshaped {
    fn execute(&mut self, _bundle: &mut Bundle) -> Result<Flow, StageError> {
        Ok(Flow::Continue)
    }

    fn properties(&self) -> &[PropertySpec] {
        RESHAPED_PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "gain" => Some(PropertyValue::Text(self.gain.clone())),
            "threshold" => Some(PropertyValue::Float(self.threshold)),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "gain" => self.gain = value.into_text(name)?,
            "threshold" => self.threshold = value.into_float(name)?,
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

pub fn reshaped_factory() -> Arc<dyn StageFactory> {
    Arc::new(|_: &[PropertyValue]| -> Result<Box<dyn Stage>, StageError> {
        Ok(Box::new(Reshaped::default()))
    })
}

/// Shared log of stage executions, as `"<label>:<tick>"`
pub type ExecLog = Arc<Mutex<Vec<String>>>;

/// What a [`Recorder`] does on a given execution
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Continue,
    StopOn(usize),
    FailOn(usize),
    PanicOn(usize),
    CancelOn(usize),
    Sleep(Duration),
}

/// Stage that logs every execution and then behaves as told
pub struct Recorder {
    label: &'static str,
    log: ExecLog,
    behavior: Behavior,
    calls: usize,
}

impl Recorder {
    pub fn new(label: &'static str, log: &ExecLog, behavior: Behavior) -> Self {
        Self {
            label,
            log: Arc::clone(log),
            behavior,
            calls: 0,
        }
    }
}

impl Stage for Recorder {
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError> {
        let call = self.calls;
        self.calls += 1;
        self.log.lock().push(format!("{}:{}", self.label, call));

        match self.behavior {
            Behavior::StopOn(n) if n == call => Ok(Flow::Stop),
            Behavior::FailOn(n) if n == call => {
                Err(StageError::ExecutionFailed(format!("{} failed", self.label)))
            }
            Behavior::PanicOn(n) if n == call => panic!("{} panicked", self.label),
            Behavior::CancelOn(n) if n == call => {
                bundle.cancel();
                Ok(Flow::Continue)
            }
            Behavior::Sleep(d) => {
                std::thread::sleep(d);
                Ok(Flow::Continue)
            }
            _ => Ok(Flow::Continue),
        }
    }
}

pub fn new_log() -> ExecLog {
    Arc::new(Mutex::new(Vec::new()))
}
