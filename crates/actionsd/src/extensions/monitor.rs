//! Filesystem-event monitor for a directory of extension definitions.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::{EXTENSIONS_TARGET, ExtensionMonitor, MonitorError};
use crate::health::HealthReporter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Added(Utf8PathBuf),
    Changed(Utf8PathBuf),
    Removed(Utf8PathBuf),
}

struct Watch {
    active: Arc<AtomicBool>,
    watcher: RecommendedWatcher,
}

/// Watches a directory through the platform's filesystem notifications.
///
/// Regular files directly inside the directory are definitions; hidden files
/// and subdirectories are ignored. Definitions present when monitoring starts
/// are reported as added before `start` returns.
pub struct DirectoryMonitor {
    directory: Utf8PathBuf,
    reporter: Arc<dyn HealthReporter>,
    watch: Option<Watch>,
}

impl DirectoryMonitor {
    /// Monitor for `directory`.
    pub fn new(directory: impl Into<Utf8PathBuf>, reporter: Arc<dyn HealthReporter>) -> Self {
        Self {
            directory: directory.into(),
            reporter,
            watch: None,
        }
    }

    /// Directory being watched.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.directory
    }

    fn watch_error(&self, source: notify::Error) -> MonitorError {
        MonitorError::Watch {
            path: self.directory.clone(),
            source,
        }
    }
}

impl ExtensionMonitor for DirectoryMonitor {
    fn start(&mut self) -> Result<(), MonitorError> {
        if self.watch.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let initial = scan(&self.directory)?;

        let active = Arc::new(AtomicBool::new(true));
        let mut tracker = Tracker {
            known: initial.clone(),
            reporter: Arc::clone(&self.reporter),
            active: Arc::clone(&active),
        };
        let handler = move |event: notify::Result<Event>| tracker.handle(event);
        let mut watcher =
            notify::recommended_watcher(handler).map_err(|source| self.watch_error(source))?;
        watcher
            .watch(self.directory.as_std_path(), RecursiveMode::NonRecursive)
            .map_err(|source| self.watch_error(source))?;

        for path in &initial {
            self.reporter.extension_added(path);
        }
        self.watch = Some(Watch { active, watcher });
        self.reporter.monitoring_started(&self.directory);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MonitorError> {
        let Some(Watch { active, watcher }) = self.watch.take() else {
            return Ok(());
        };
        active.store(false, Ordering::SeqCst);
        drop(watcher);
        self.reporter.monitoring_stopped(&self.directory);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.watch.is_some()
    }
}

impl Drop for DirectoryMonitor {
    fn drop(&mut self) {
        if let Some(watch) = &self.watch {
            watch.active.store(false, Ordering::SeqCst);
        }
    }
}

/// Event handler owned by the watcher; keeps the set of known definitions.
struct Tracker {
    known: BTreeSet<Utf8PathBuf>,
    reporter: Arc<dyn HealthReporter>,
    active: Arc<AtomicBool>,
}

impl Tracker {
    fn handle(&mut self, event: notify::Result<Event>) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                warn!(target: EXTENSIONS_TARGET, %error, "extension watch error");
                return;
            }
        };
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        for path in event.paths {
            if let Some(change) = self.reconcile(path) {
                debug!(target: EXTENSIONS_TARGET, ?change, "extension definition changed");
                report(self.reporter.as_ref(), &change);
            }
        }
    }

    /// Classifies `path` by comparing what is on disk with what was known.
    fn reconcile(&mut self, path: PathBuf) -> Option<Change> {
        let path = Utf8PathBuf::from_path_buf(path).ok()?;
        if is_hidden(&path) {
            return None;
        }
        let is_definition = fs::metadata(&path).is_ok_and(|metadata| metadata.is_file());
        match (is_definition, self.known.contains(&path)) {
            (true, true) => Some(Change::Changed(path)),
            (true, false) => {
                self.known.insert(path.clone());
                Some(Change::Added(path))
            }
            (false, true) => {
                self.known.remove(&path);
                Some(Change::Removed(path))
            }
            (false, false) => None,
        }
    }
}

fn is_hidden(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('.'))
}

fn scan(directory: &Utf8Path) -> Result<BTreeSet<Utf8PathBuf>, MonitorError> {
    let read_error = |source| MonitorError::Read {
        path: directory.to_path_buf(),
        source,
    };
    let metadata = fs::metadata(directory).map_err(read_error)?;
    if !metadata.is_dir() {
        return Err(MonitorError::NotADirectory {
            path: directory.to_path_buf(),
        });
    }

    let mut definitions = BTreeSet::new();
    for entry in directory.read_dir_utf8().map_err(read_error)? {
        let Ok(entry) = entry else {
            continue;
        };
        if is_hidden(entry.path()) {
            continue;
        }
        if entry.metadata().is_ok_and(|metadata| metadata.is_file()) {
            definitions.insert(entry.path().to_path_buf());
        }
    }
    Ok(definitions)
}

fn report(reporter: &dyn HealthReporter, change: &Change) {
    match change {
        Change::Added(path) => reporter.extension_added(path),
        Change::Changed(path) => reporter.extension_changed(path),
        Change::Removed(path) => reporter.extension_removed(path),
    }
}
