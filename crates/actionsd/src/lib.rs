//! The actions daemon.
//!
//! `actionsd` serves the dispatch core from [`actions_runtime`] over HTTP on
//! the socket configured through [`actions_config`]. The bootstrap sequence
//! loads configuration, initialises structured telemetry and prepares the
//! socket filesystem; [`run_daemon`] then registers the built-in flows, starts
//! the axum server, starts the optional extension monitor and blocks until a
//! termination signal arrives.
//!
//! The request path `<route_prefix>/<name>` selects the action; the flow
//! registered under `<action_prefix>:<name>` handles it on tokio's blocking
//! pool, and its outcome is written back as JSON.

mod bootstrap;
mod extensions;
mod flows;
mod health;
mod process;
mod server;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use extensions::{DirectoryMonitor, ExtensionMonitor, MonitorError, MonitorGuard};
pub use flows::register_builtin_flows;
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon, run_daemon_with,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use server::ServerError;

#[cfg(test)]
mod tests;
