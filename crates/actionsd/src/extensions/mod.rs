//! Extension definition monitoring.
//!
//! Monitoring is an owned resource: [`MonitorGuard::start`] begins watching
//! and dropping the guard (or calling [`MonitorGuard::stop`]) ends it. The
//! daemon only observes definitions and reports them through the
//! [`HealthReporter`](crate::HealthReporter); loading them is left to
//! whatever flow engine consumes those events.

mod monitor;

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::warn;

pub use self::monitor::DirectoryMonitor;

const EXTENSIONS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::extensions");

/// Errors raised while starting or stopping extension monitoring.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The configured path exists but is not a directory.
    #[error("extension path {path} is not a directory")]
    NotADirectory { path: Utf8PathBuf },
    /// The directory could not be read.
    #[error("failed to read extension directory {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// `start` was called on a running monitor.
    #[error("extension monitor is already running")]
    AlreadyRunning,
    /// The filesystem watcher could not be created or attached.
    #[error("failed to watch extension directory {path}: {source}")]
    Watch {
        path: Utf8PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Start/stop lifecycle of an extension monitor.
pub trait ExtensionMonitor: Send {
    /// Begins monitoring.
    ///
    /// # Errors
    ///
    /// Fails when the monitor is already running or cannot begin watching.
    fn start(&mut self) -> Result<(), MonitorError>;

    /// Ends monitoring. Stopping an idle monitor is a no-op.
    ///
    /// # Errors
    ///
    /// Fails when the watch could not be released.
    fn stop(&mut self) -> Result<(), MonitorError>;

    /// Whether monitoring is active.
    fn is_running(&self) -> bool;
}

/// Scoped monitoring: started on construction, stopped on drop.
#[derive(Debug)]
pub struct MonitorGuard<M: ExtensionMonitor> {
    monitor: Option<M>,
}

impl<M: ExtensionMonitor> MonitorGuard<M> {
    /// Starts `monitor` and takes ownership of it.
    ///
    /// # Errors
    ///
    /// Returns the monitor's start failure.
    pub fn start(mut monitor: M) -> Result<Self, MonitorError> {
        monitor.start()?;
        Ok(Self {
            monitor: Some(monitor),
        })
    }

    /// The guarded monitor.
    #[must_use]
    pub fn monitor(&self) -> Option<&M> {
        self.monitor.as_ref()
    }

    /// Stops monitoring, surfacing any failure that drop would only log.
    ///
    /// # Errors
    ///
    /// Returns the monitor's stop failure.
    pub fn stop(mut self) -> Result<(), MonitorError> {
        match self.monitor.take() {
            Some(mut monitor) => monitor.stop(),
            None => Ok(()),
        }
    }
}

impl<M: ExtensionMonitor> Drop for MonitorGuard<M> {
    fn drop(&mut self) {
        if let Some(mut monitor) = self.monitor.take()
            && let Err(error) = monitor.stop()
        {
            warn!(target: EXTENSIONS_TARGET, %error, "failed to stop extension monitor");
        }
    }
}
