//! Interaction collaborator: how stages reach the user
//!
//! Stages never talk to a display or terminal directly; they fetch the
//! [`Interactor`] from the bundle.

use crate::bundle::Bundle;
use crate::error::StageError;
use crate::event::EventQueue;
use crate::stage::Stage;
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Capability injected into every run through the bundle
pub trait Interactor: Send + Sync {
    /// Display `image` in the view named `id`
    fn show_image(&self, id: &str, image: &RgbImage);

    /// Ask the user; `None` when there is no usable answer
    ///
    /// With a non-empty `options` list the answer is one of the options.
    fn query(&self, prompt: &str, options: &[&str]) -> Option<String>;

    /// Queue of deferred events waiting for a stage
    fn events(&self) -> &EventQueue;

    /// Queue an event for the next stage that handles it
    fn post_event(&self, name: &str) {
        self.events().post(name);
    }

    /// Dispatch the queued events `stage` has handlers for
    fn execute_pending_events(
        &self,
        stage: &dyn Stage,
        bundle: &mut Bundle,
    ) -> Result<usize, StageError> {
        self.events().dispatch(stage, bundle)
    }

    /// Yes/no question
    fn confirm(&self, prompt: &str) -> bool {
        matches!(self.query(prompt, &["y", "n"]).as_deref(), Some("y"))
    }
}

/// Terminal interaction: prompts on stderr, answers from stdin
///
/// There is no window to draw into, so images are logged and, when a snapshot
/// directory is configured, the latest frame of each view is written there as
/// PNG.
pub struct ConsoleInteraction {
    snapshot_dir: Option<PathBuf>,
    input: Mutex<Box<dyn BufRead + Send>>,
    events: EventQueue,
}

impl ConsoleInteraction {
    pub fn new() -> Self {
        Self {
            snapshot_dir: None,
            input: Mutex::new(Box::new(std::io::BufReader::new(std::io::stdin()))),
            events: EventQueue::new(),
        }
    }

    /// Write the latest frame of every view into `dir`
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Read answers from `input` instead of stdin
    pub fn with_input(mut self, input: impl BufRead + Send + 'static) -> Self {
        self.input = Mutex::new(Box::new(input));
        self
    }

    fn snapshot_path(&self, id: &str) -> Option<PathBuf> {
        let dir = self.snapshot_dir.as_ref()?;
        let file: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Some(dir.join(format!("{file}.png")))
    }
}

impl Default for ConsoleInteraction {
    fn default() -> Self {
        Self::new()
    }
}

impl Interactor for ConsoleInteraction {
    fn show_image(&self, id: &str, image: &RgbImage) {
        debug!("View '{}': {}x{} frame", id, image.width(), image.height());

        if let Some(path) = self.snapshot_path(id) {
            if let Err(e) = image.save(&path) {
                warn!("Failed to write snapshot {}: {}", path.display(), e);
            }
        }
    }

    fn query(&self, prompt: &str, options: &[&str]) -> Option<String> {
        let mut stderr = std::io::stderr().lock();
        let shown = if options.is_empty() {
            format!("{prompt} ")
        } else {
            format!("{prompt} [{}] ", options.join("/"))
        };
        // A closed stderr only loses the prompt text
        let _ = stderr.write_all(shown.as_bytes());
        let _ = stderr.flush();

        let mut line = String::new();
        match self.input.lock().read_line(&mut line) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to read answer: {}", e);
                return None;
            }
        }

        match_answer(line.trim(), options)
    }

    fn events(&self) -> &EventQueue {
        &self.events
    }
}

/// Headless interaction with scripted answers
///
/// Records every `show_image` call; useful for tests and batch runs.
#[derive(Default)]
pub struct ScriptedInteraction {
    answers: Mutex<VecDeque<String>>,
    shown: Mutex<Vec<ShownImage>>,
    events: EventQueue,
}

/// One recorded `show_image` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShownImage {
    pub id: String,
    pub width: u32,
    pub height: u32,
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers returned by successive queries
    pub fn with_answers<I, S>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.answers
            .lock()
            .extend(answers.into_iter().map(Into::into));
        self
    }

    /// Every image shown so far
    pub fn shown(&self) -> Vec<ShownImage> {
        self.shown.lock().clone()
    }
}

impl Interactor for ScriptedInteraction {
    fn show_image(&self, id: &str, image: &RgbImage) {
        self.shown.lock().push(ShownImage {
            id: id.to_string(),
            width: image.width(),
            height: image.height(),
        });
    }

    fn query(&self, _prompt: &str, options: &[&str]) -> Option<String> {
        let answer = self.answers.lock().pop_front()?;
        match_answer(&answer, options)
    }

    fn events(&self) -> &EventQueue {
        &self.events
    }
}

fn match_answer(answer: &str, options: &[&str]) -> Option<String> {
    if options.is_empty() {
        return Some(answer.to_string());
    }
    options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(answer))
        .map(|option| option.to_string())
}
