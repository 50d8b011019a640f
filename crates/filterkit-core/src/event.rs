//! Deferred, name-addressed stage events
//!
//! A stage registers handlers by event name when it is constructed. The
//! interaction collaborator queues event names (for example from a button in
//! a shell) and dispatches them to the stage the next time the stage asks for
//! it during `execute`.

use crate::bundle::Bundle;
use crate::error::StageError;
use crate::stage::Stage;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::debug;

type Handler = Box<dyn Fn(&mut Bundle) -> Result<(), StageError> + Send + Sync>;

/// Event-name to handler table owned by a stage
#[derive(Default)]
pub struct EventHandlers {
    handlers: HashMap<String, Handler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any earlier handler
    pub fn on<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Bundle) -> Result<(), StageError> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run the handler for `name`; `Ok(false)` if there is none
    pub fn dispatch(&self, name: &str, bundle: &mut Bundle) -> Result<bool, StageError> {
        match self.handlers.get(name) {
            Some(handler) => {
                handler(bundle)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("EventHandlers").field("events", &names).finish()
    }
}

/// Thread-safe FIFO of pending event names
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Mutex<VecDeque<String>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, name: impl Into<String>) {
        self.pending.lock().push_back(name.into());
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Dispatch every queued event `stage` has a handler for
    ///
    /// Events the stage does not handle stay queued in their original order
    /// so another stage can pick them up. The queue lock is not held while
    /// handlers run. Returns the number of events handled.
    pub fn dispatch(&self, stage: &dyn Stage, bundle: &mut Bundle) -> Result<usize, StageError> {
        let Some(handlers) = stage.events() else {
            return Ok(0);
        };

        let taken: Vec<String> = {
            let mut pending = self.pending.lock();
            let (mine, rest): (VecDeque<_>, VecDeque<_>) =
                pending.drain(..).partition(|name| handlers.handles(name));
            *pending = rest;
            mine.into()
        };

        let mut handled = 0;
        let mut remaining = taken.into_iter();
        while let Some(name) = remaining.next() {
            debug!("Dispatching event '{}'", name);
            if let Err(e) = handlers.dispatch(&name, bundle) {
                // Put back what was not reached so a later tick can retry
                let mut pending = self.pending.lock();
                for (i, rest) in remaining.enumerate() {
                    pending.insert(i, rest);
                }
                return Err(e);
            }
            handled += 1;
        }
        Ok(handled)
    }
}
