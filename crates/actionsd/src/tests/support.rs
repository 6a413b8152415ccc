//! Test harness utilities shared by the daemon suites.

use std::ffi::OsString;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoError;
use tempfile::TempDir;

use actions_config::{Config, SocketEndpoint};

use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::health::HealthReporter;
use crate::process::{ShutdownError, ShutdownSignal};

/// Loader that provisions a Unix socket path under a temporary directory.
pub struct TestConfigLoader {
    socket_dir: TempDir,
    template: Config,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Uses `template` for every setting except the listen socket.
    #[must_use]
    pub fn with_config(template: Config) -> Self {
        let socket_dir =
            TempDir::new().expect("failed to create temporary directory for socket");
        Self {
            socket_dir,
            template,
        }
    }

    fn socket_path(&self) -> Utf8PathBuf {
        let path = self.socket_dir.path().join("actionsd.sock");
        Utf8PathBuf::from_path_buf(path).expect("temporary socket path was not valid UTF-8")
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            listen_socket: SocketEndpoint::unix(self.socket_path()),
            ..self.template.clone()
        })
    }
}

/// Loader that intentionally fails by passing an invalid socket argument.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("actionsd"),
            OsString::from("--listen-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}

/// Shutdown signal that fires immediately, or fails when asked to.
pub struct ImmediateShutdown {
    fail: bool,
}

impl ImmediateShutdown {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl ShutdownSignal for ImmediateShutdown {
    fn wait(&self) -> Result<(), ShutdownError> {
        if self.fail {
            return Err(ShutdownError::Install {
                source: std::io::Error::other("signal handlers unavailable"),
            });
        }
        Ok(())
    }
}

/// Health events captured by [`RecordingHealthReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ListenerStarted(String),
    MonitoringStarted(Utf8PathBuf),
    MonitoringStopped(Utf8PathBuf),
    ExtensionAdded(Utf8PathBuf),
    ExtensionChanged(Utf8PathBuf),
    ExtensionRemoved(Utf8PathBuf),
}

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Whether `event` has been recorded.
    pub fn has(&self, event: &HealthEvent) -> bool {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .contains(event)
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_started(&self, endpoint: &SocketEndpoint) {
        self.record(HealthEvent::ListenerStarted(endpoint.to_string()));
    }

    fn monitoring_started(&self, directory: &Utf8Path) {
        self.record(HealthEvent::MonitoringStarted(directory.to_owned()));
    }

    fn monitoring_stopped(&self, directory: &Utf8Path) {
        self.record(HealthEvent::MonitoringStopped(directory.to_owned()));
    }

    fn extension_added(&self, path: &Utf8Path) {
        self.record(HealthEvent::ExtensionAdded(path.to_owned()));
    }

    fn extension_changed(&self, path: &Utf8Path) {
        self.record(HealthEvent::ExtensionChanged(path.to_owned()));
    }

    fn extension_removed(&self, path: &Utf8Path) {
        self.record(HealthEvent::ExtensionRemoved(path.to_owned()));
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
