//! Debounced watcher over manifest directories
//!
//! Editors tend to write a file in several steps; changes are only reported
//! once a directory has been quiet for the debounce period.

use super::directory::is_manifest;
use crate::error::DiscoveryError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default debounce duration (500ms)
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Watches manifest directories and reports the ones that changed
pub struct ModuleWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Result<Event, notify::Error>>,
    watched: Vec<PathBuf>,
    /// Changed directories waiting for the debounce timeout
    pending: HashMap<PathBuf, Instant>,
    debounce: Duration,
}

impl ModuleWatcher {
    pub fn new() -> Result<Self, DiscoveryError> {
        Self::with_debounce(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }

    pub fn with_debounce(debounce: Duration) -> Result<Self, DiscoveryError> {
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(tx)?;

        Ok(Self {
            watcher,
            rx,
            watched: Vec::new(),
            pending: HashMap::new(),
            debounce,
        })
    }

    /// Start watching a manifest directory
    pub fn watch(&mut self, dir: &Path) -> Result<(), DiscoveryError> {
        let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        if self.watched.contains(&canonical) {
            return Ok(());
        }

        self.watcher.watch(&canonical, RecursiveMode::NonRecursive)?;
        debug!("Watching {}", canonical.display());
        self.watched.push(canonical);
        Ok(())
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Directories whose manifests changed and have since settled
    pub fn poll_changes(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();

        while let Ok(result) = self.rx.try_recv() {
            match result {
                Ok(event) => self.record(event, now),
                Err(e) => warn!("Watch error: {}", e),
            }
        }

        let debounce = self.debounce;
        let mut ready = Vec::new();
        self.pending.retain(|dir, last_seen| {
            if now.duration_since(*last_seen) >= debounce {
                ready.push(dir.clone());
                false
            } else {
                true
            }
        });
        ready.sort();
        ready
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn record(&mut self, event: Event, now: Instant) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return;
        }

        for path in event.paths {
            if !is_manifest(&path) {
                continue;
            }
            if let Some(dir) = path.parent() {
                self.pending.insert(dir.to_path_buf(), now);
            }
        }
    }
}
