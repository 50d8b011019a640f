//! Frame sinks: show through the interactor, save to disk

use filterkit_core::{
    Bundle, Flow, PropertyError, PropertyKind, PropertySpec, PropertyValue, Stage, StageError,
    StageRegistration,
};
use std::path::PathBuf;
use tracing::debug;

const SHOW_PROPERTIES: &[PropertySpec] = &[
    PropertySpec::read_write("bag_name", PropertyKind::Text),
    PropertySpec::read_write("view", PropertyKind::Text),
];

/// Shows the bundle image under `bag_name` in the interactor view `view`
///
/// An empty `view` uses the bag name.
#[derive(Debug, Clone)]
pub struct ShowImage {
    pub bag_name: String,
    pub view: String,
}

impl Default for ShowImage {
    fn default() -> Self {
        Self {
            bag_name: "source".to_string(),
            view: String::new(),
        }
    }
}

impl ShowImage {
    /// Optional arg: `bag_name`
    pub fn create(args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        let mut stage = Self::default();
        if let Some(bag_name) = args.first() {
            stage.set_property("bag_name", bag_name.clone())?;
        }
        Ok(Box::new(stage))
    }
}

impl Stage for ShowImage {
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError> {
        let interactor = bundle.interactor()?;
        let image = bundle.fetch_image(&self.bag_name)?;
        let view = if self.view.is_empty() {
            &self.bag_name
        } else {
            &self.view
        };
        interactor.show_image(view, image);
        Ok(Flow::Continue)
    }

    fn properties(&self) -> &[PropertySpec] {
        SHOW_PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "bag_name" => Some(self.bag_name.clone().into()),
            "view" => Some(self.view.clone().into()),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "bag_name" => self.bag_name = value.into_text(name)?,
            "view" => self.view = value.into_text(name)?,
            _ => return Err(PropertyError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

const SAVE_PROPERTIES: &[PropertySpec] = &[
    PropertySpec::read_write("bag_name", PropertyKind::Text),
    PropertySpec::read_write("directory", PropertyKind::Text),
    PropertySpec::read_write("every", PropertyKind::Int),
    PropertySpec::read_only("written", PropertyKind::Int),
];

/// Writes every `every`-th bundle image under `bag_name` as PNG into `directory`
///
/// Needs the target directory as its constructor argument.
#[derive(Debug, Clone)]
pub struct SaveFrames {
    pub bag_name: String,
    pub directory: PathBuf,
    pub every: u32,
    seen: u64,
    written: u64,
}

impl SaveFrames {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            bag_name: "source".to_string(),
            directory: directory.into(),
            every: 1,
            seen: 0,
            written: 0,
        }
    }

    /// Args: `directory`, optional `bag_name`
    pub fn create(args: &[PropertyValue]) -> Result<Box<dyn Stage>, StageError> {
        let directory = args
            .first()
            .cloned()
            .ok_or_else(|| StageError::InvalidInput("SaveFrames needs a directory".into()))?
            .into_text("directory")?;
        let mut stage = Self::new(directory);
        if let Some(bag_name) = args.get(1) {
            stage.set_property("bag_name", bag_name.clone())?;
        }
        Ok(Box::new(stage))
    }

    fn frame_path(&self) -> PathBuf {
        let stem: String = self
            .bag_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.directory
            .join(format!("{}_{:06}.png", stem, self.written))
    }
}

impl Stage for SaveFrames {
    fn execute(&mut self, bundle: &mut Bundle) -> Result<Flow, StageError> {
        let seen = self.seen;
        self.seen += 1;
        if seen % u64::from(self.every) != 0 {
            return Ok(Flow::Continue);
        }

        let image = bundle.fetch_image(&self.bag_name)?;
        std::fs::create_dir_all(&self.directory)?;
        let path = self.frame_path();
        image.save(&path)?;
        debug!("Saved {}", path.display());
        self.written += 1;
        Ok(Flow::Continue)
    }

    fn properties(&self) -> &[PropertySpec] {
        SAVE_PROPERTIES
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "bag_name" => Some(self.bag_name.clone().into()),
            "directory" => Some(self.directory.display().to_string().into()),
            "every" => Some(i64::from(self.every).into()),
            "written" => Some(PropertyValue::Int(self.written as i64)),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        match name {
            "bag_name" => self.bag_name = value.into_text(name)?,
            "directory" => self.directory = PathBuf::from(value.into_text(name)?),
            "every" => {
                self.every = match value.into_u32(name)? {
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

filterkit_core::submit_stage!(StageRegistration::new("toolbox.ShowImage", ShowImage::create)
    .describe("Shows a bundle image through the interactor (args: bag_name)"));

filterkit_core::submit_stage!(StageRegistration::new("toolbox.SaveFrames", SaveFrames::create)
    .describe("Writes bundle images as PNG files (args: directory, bag_name)")
    .requires_args(&["directory", "bag_name"]));
