//! Stages that measure or shape the tick cadence

use filterkit_core::{
    keys, Bundle, Flow, PropertyError, PropertyKind, PropertySpec, PropertyValue, Stage,
    StageError, StageRegistration,
};
use std::time::{Duration, Instant};
use tracing::info;

const FPS_PROPERTIES: &[PropertySpec] = &[
    PropertySpec::read_write("log_interval_ms", PropertyKind::Int),
    PropertySpec::read_only("fps", PropertyKind::Float),
];

/// Smoothing factor of the rate estimate
const FPS_SMOOTHING: f64 = 0.1;

/// Measures the tick rate and writes it to the bundle under `fps`
#[derive(Debug, Clone)]
pub struct ShowFps {
    /// Log the rate at most this often; 0 disables logging
    pub log_interval: Duration,
    fps: f64,
    last_tick: Option<Instant>,
    last_log: Option<Instant>,
}

impl Default for ShowFps {
    fn default() -> Self {
        Self {
            log_interval: Duration::from_secs(1),
            fps: 0.0,
            last_tick: None,
            last_log: None,
        }
    }
}

impl ShowFps {
    pub fn create(_args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        Ok(Box::new(Self::default()))
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    fn record(&mut self, now: Instant) {
        if let Some(last) = self.last_tick {
            let elapsed = now.duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                let current = 1.0 / elapsed;
                self.fps = if self.fps == 0.0 {
                    current
                } else {
                    self.fps + FPS_SMOOTHING * (current - self.fps)
                };
            }
        }
        self.last_tick = Some(now);
    }
}

impl Stage for ShowFps {
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError> {
        let now = Instant::now();
        self.record(now);
        bundle.insert(keys::FPS, self.fps);

        if !self.log_interval.is_zero()
            && self
                .last_log
                .map_or(true, |last| now.duration_since(last) >= self.log_interval)
        {
            info!("FPS {:.1}", self.fps);
            self.last_log = Some(now);
        }
        Ok(Flow::Continue)
    }

    fn properties(&self) -> &[PropertySpec] {
        FPS_PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "log_interval_ms" => Some(PropertyValue::Int(self.log_interval.as_millis() as i64)),
            "fps" => Some(PropertyValue::Float(self.fps)),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "log_interval_ms" => {
                self.log_interval = Duration::from_millis(u64::from(value.into_u32(name)?))
            }
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

const SLEEP_PROPERTIES: &[PropertySpec] = &[PropertySpec::read_write("millis", PropertyKind::Int)];

/// Blocks the tick for `millis`, like a capture device waiting for a frame
#[derive(Debug, Clone)]
pub struct Sleep {
    pub duration: Duration,
}

impl Default for Sleep {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(10),
        }
    }
}

impl Sleep {
    /// Optional arg: `millis`
    pub fn create(args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        let mut stage = Self::default();
        if let Some(millis) = args.first() {
            stage.set_property("millis", millis.clone())?;
        }
        Ok(Box::new(stage))
    }
}

impl Stage for Sleep {
    fn execute(&mut self, _bundle: &mut Bundle) -> Result<Flow, StageError> {
        std::thread::sleep(self.duration);
        Ok(Flow::Continue)
    }

    fn properties(&self) -> &[PropertySpec] {
        SLEEP_PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "millis" => Some(PropertyValue::Int(self.duration.as_millis() as i64)),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "millis" => self.duration = Duration::from_millis(u64::from(value.into_u32(name)?)),
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

const STOP_PROPERTIES: &[PropertySpec] = &[
    PropertySpec::read_write("ticks", PropertyKind::Int),
    PropertySpec::read_only("seen", PropertyKind::Int),
];

/// Ends the run once it has executed `ticks` times
#[derive(Debug, Clone)]
pub struct StopAfter {
    pub ticks: u32,
    seen: u32,
}

impl Default for StopAfter {
    fn default() -> Self {
        Self { ticks: 1, seen: 0 }
    }
}

impl StopAfter {
    /// Optional arg: `ticks`
    pub fn create(args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        let mut stage = Self::default();
        if let Some(ticks) = args.first() {
            stage.set_property("ticks", ticks.clone())?;
        }
        Ok(Box::new(stage))
    }
}

impl Stage for StopAfter {
    fn execute(&mut self, _bundle: &mut Bundle) -> Result<Flow, StageError> {
        self.seen += 1;
        if self.seen >= self.ticks {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }

    fn properties(&self) -> &[PropertySpec] {
        STOP_PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "ticks" => Some(i64::from(self.ticks).into()),
            "seen" => Some(i64::from(self.seen).into()),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "ticks" => {
                self.ticks = match value.into_u32(name)? {
                    0 => {
                        return Err(PropertyError::Invalid {
                            name: name.to_string(),
                            reason: "must be at least 1".to_string(),
                        })
                    }
                    n => n,
                }
            }
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

filterkit_core::submit_stage!(StageRegistration::new("toolbox.ShowFps", ShowFps::create)
    .describe("Measures the tick rate into the 'fps' bundle entry"));

filterkit_core::submit_stage!(StageRegistration::new("toolbox.Sleep", Sleep::create)
    .describe("Blocks every tick for a while (args: millis)"));

filterkit_core::submit_stage!(StageRegistration::new("toolbox.StopAfter", StopAfter::create)
    .describe("Ends the run after a number of ticks (args: ticks)"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_estimate_is_written_to_bundle() {
        let mut stage = ShowFps::default();
        let start = Instant::now();
        stage.record(start);
        stage.record(start + Duration::from_millis(100));
        assert!((stage.fps() - 10.0).abs() < 1e-6);

        // Smoothed towards the new rate rather than jumping to it
        stage.record(start + Duration::from_millis(150));
        assert!(stage.fps() > 10.0 && stage.fps() < 20.0);

        let mut bundle = Bundle::new();
        stage.execute(&mut bundle).unwrap();
        assert!(bundle.get::<f64>(keys::FPS).is_some());
    }

    #[test]
    fn test_stop_after_counts_executions() {
        let mut stage = StopAfter::default();
        stage.set_property("ticks", PropertyValue::Int(3)).unwrap();
        let mut bundle = Bundle::new();
        assert_eq!(stage.execute(&mut bundle).unwrap(), Flow::Continue);
        assert_eq!(stage.execute(&mut bundle).unwrap(), Flow::Continue);
        assert_eq!(stage.execute(&mut bundle).unwrap(), Flow::Stop);
        assert!(stage.set_property("ticks", PropertyValue::Int(0)).is_err());
    }

    #[test]
    fn test_sleep_blocks() {
        let stage = Sleep::create(&[PropertyValue::Int(15)]).unwrap();
        assert_eq!(stage.property("millis"), Some(PropertyValue::Int(15)));

        let mut stage = Sleep {
            duration: Duration::from_millis(15),
        };
        let started = Instant::now();
        stage.execute(&mut Bundle::new()).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
