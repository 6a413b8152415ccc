//! Shared configuration for the actions daemon and its embedders.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then an
//! optional configuration file (`--config-path` or `ACTIONS_CONFIG_PATH`),
//! then `ACTIONS_*` environment variables, and finally command-line flags.

mod defaults;
mod logging;
mod socket;

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_ACTION_PREFIX, DEFAULT_FLOW_TIMEOUT_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_REQUEST_BYTES, DEFAULT_ROUTE_PREFIX, DEFAULT_TCP_PORT, default_action_prefix,
    default_log_filter, default_log_format, default_route_prefix, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved configuration for the actions daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "ACTIONS")]
pub struct Config {
    /// Endpoint the HTTP listener binds to.
    #[ortho_config(default = defaults::default_socket_endpoint())]
    pub listen_socket: SocketEndpoint,
    /// `tracing` filter expression applied to telemetry.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for telemetry.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Prefix joined with the requested action name to form the action key.
    #[ortho_config(default = defaults::default_action_prefix().to_owned())]
    pub action_prefix: String,
    /// HTTP path prefix under which actions are served.
    #[ortho_config(default = defaults::default_route_prefix().to_owned())]
    pub route_prefix: String,
    /// Whether failure responses carry diagnostic traces.
    #[ortho_config(default = false)]
    pub debug: bool,
    /// Upper bound on waiting for a flow outcome; zero waits forever.
    #[ortho_config(default = DEFAULT_FLOW_TIMEOUT_MS)]
    pub flow_timeout_ms: u64,
    /// Upper bound on buffered request bodies.
    #[ortho_config(default = DEFAULT_MAX_REQUEST_BYTES)]
    pub max_request_bytes: usize,
    /// Directory of extension definitions to monitor.
    pub extension_dir: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_socket: default_socket_endpoint(),
            log_filter: defaults::default_log_filter_string(),
            log_format: default_log_format(),
            action_prefix: default_action_prefix().to_owned(),
            route_prefix: default_route_prefix().to_owned(),
            debug: false,
            flow_timeout_ms: DEFAULT_FLOW_TIMEOUT_MS,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            extension_dir: None,
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer is malformed.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads configuration from an explicit argument list.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer is malformed.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Endpoint the listener binds to.
    #[must_use]
    pub fn listen_socket(&self) -> &SocketEndpoint {
        &self.listen_socket
    }

    /// Telemetry filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Telemetry output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Prefix used to build action keys.
    #[must_use]
    pub fn action_prefix(&self) -> &str {
        &self.action_prefix
    }

    /// Route prefix with surrounding slashes normalised to `/<segment>`.
    #[must_use]
    pub fn route_prefix(&self) -> String {
        let trimmed = self.route_prefix.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Whether failure responses carry diagnostic traces.
    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Flow timeout, or `None` when waiting is unbounded.
    #[must_use]
    pub fn flow_timeout(&self) -> Option<Duration> {
        (self.flow_timeout_ms > 0).then(|| Duration::from_millis(self.flow_timeout_ms))
    }

    /// Maximum request head and buffered multipart size in bytes.
    #[must_use]
    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// Extension directory, when monitoring is enabled.
    #[must_use]
    pub fn extension_dir(&self) -> Option<&Utf8Path> {
        self.extension_dir.as_deref()
    }
}
