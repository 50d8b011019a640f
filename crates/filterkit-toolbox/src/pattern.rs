//! Synthetic frame source

use filterkit_core::{
    Bundle, Flow, PropertyError, PropertyKind, PropertySpec, PropertyValue, Stage, StageError,
    StageRegistration,
};
use image::{Rgb, RgbImage};

const PROPERTIES: &[PropertySpec] = &[
    PropertySpec::read_write("bag_name", PropertyKind::Text),
    PropertySpec::read_write("width", PropertyKind::Int),
    PropertySpec::read_write("height", PropertyKind::Int),
    PropertySpec::read_write("step", PropertyKind::Int),
    PropertySpec::read_only("frame", PropertyKind::Int),
];

/// Writes a moving RGB gradient into the bundle every tick
///
/// Stands in for a camera: downstream stages fetch the frame under
/// `bag_name`.
#[derive(Debug, Clone)]
pub struct TestPattern {
    pub bag_name: String,
    pub width: u32,
    pub height: u32,
    /// Pixels the gradient moves per tick
    pub step: u32,
    frame: u64,
}

impl Default for TestPattern {
    fn default() -> Self {
        Self {
            bag_name: "source".to_string(),
            width: 320,
            height: 200,
            step: 4,
            frame: 0,
        }
    }
}

impl TestPattern {
    /// Optional args: `width`, `height`, `bag_name`
    pub fn create(args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        let mut stage = Self::default();
        for (value, name) in args.iter().zip(["width", "height", "bag_name"]) {
            stage.set_property(name, value.clone())?;
        }
        Ok(Box::new(stage))
    }

    pub fn render(&self) -> RgbImage {
        let offset = (self.frame * u64::from(self.step)) % 256;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let r = (u64::from(x) + offset) % 256;
            let g = (u64::from(y) + offset) % 256;
            let b = (u64::from(x) + u64::from(y)) / 2 % 256;
            Rgb([r as u8, g as u8, b as u8])
        })
    }
}

fn dimension(name: &str, value: PropertyValue) -> Result<u32, PropertyError> {
    match value.into_u32(name)? {
        0 => Err(PropertyError::Invalid {
            name: name.to_string(),
            reason: "must be at least 1".to_string(),
        }),
        v => Ok(v),
    }
}

impl Stage for TestPattern {
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError> {
        let image = self.render();
        bundle.insert(self.bag_name.clone(), image);
        self.frame += 1;
        Ok(Flow::Continue)
    }

    fn properties(&self) -> &[PropertySpec] {
        PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "bag_name" => Some(self.bag_name.clone().into()),
            "width" => Some(i64::from(self.width).into()),
            "height" => Some(i64::from(self.height).into()),
            "step" => Some(i64::from(self.step).into()),
            "frame" => Some(PropertyValue::Int(self.frame as i64)),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "bag_name" => self.bag_name = value.into_text(name)?,
            "width" => self.width = dimension(name, value)?,
            "height" => self.height = dimension(name, value)?,
            "step" => self.step = value.into_u32(name)?,
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

filterkit_core::submit_stage!(StageRegistration::new("toolbox.TestPattern", TestPattern::create)
    .describe("Synthesizes a moving RGB gradient (args: width, height, bag_name)"));
