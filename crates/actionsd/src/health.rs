//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use actions_config::{Config, SocketEndpoint};
use camino::Utf8Path;

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listener accepts connections.
    fn listener_started(&self, endpoint: &SocketEndpoint);

    /// Invoked when the extension monitor begins watching `directory`.
    fn monitoring_started(&self, directory: &Utf8Path);

    /// Invoked when the extension monitor stops.
    fn monitoring_stopped(&self, directory: &Utf8Path);

    /// Invoked when a new extension definition appears.
    fn extension_added(&self, path: &Utf8Path);

    /// Invoked when an existing extension definition changes.
    fn extension_changed(&self, path: &Utf8Path);

    /// Invoked when an extension definition disappears.
    fn extension_removed(&self, path: &Utf8Path);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_started(&self, endpoint: &SocketEndpoint) {
        (**self).listener_started(endpoint);
    }

    fn monitoring_started(&self, directory: &Utf8Path) {
        (**self).monitoring_started(directory);
    }

    fn monitoring_stopped(&self, directory: &Utf8Path) {
        (**self).monitoring_stopped(directory);
    }

    fn extension_added(&self, path: &Utf8Path) {
        (**self).extension_added(path);
    }

    fn extension_changed(&self, path: &Utf8Path) {
        (**self).extension_changed(path);
    }

    fn extension_removed(&self, path: &Utf8Path) {
        (**self).extension_removed(path);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.listen_socket(),
            action_prefix = %config.action_prefix(),
            route_prefix = %config.route_prefix(),
            debug = config.debug(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn listener_started(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_started",
            endpoint = %endpoint,
            "accepting action requests"
        );
    }

    fn monitoring_started(&self, directory: &Utf8Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "monitoring_started",
            directory = %directory,
            "watching extension definitions"
        );
    }

    fn monitoring_stopped(&self, directory: &Utf8Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "monitoring_stopped",
            directory = %directory,
            "stopped watching extension definitions"
        );
    }

    fn extension_added(&self, path: &Utf8Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "extension_added",
            path = %path,
            "extension definition added"
        );
    }

    fn extension_changed(&self, path: &Utf8Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "extension_changed",
            path = %path,
            "extension definition changed"
        );
    }

    fn extension_removed(&self, path: &Utf8Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "extension_removed",
            path = %path,
            "extension definition removed"
        );
    }
}
