//! Daemon process lifecycle: serve until a termination signal arrives.

use std::io;
use std::sync::Arc;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use actions_config::Config;
use actions_runtime::{Dispatcher, FlowRegistry, Processor};

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, SystemConfigLoader, bootstrap_with};
use crate::extensions::{DirectoryMonitor, MonitorError, MonitorGuard};
use crate::flows::register_builtin_flows;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::server::{self, Server, ServerError};

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Errors surfaced while launching or running the daemon.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrapping the daemon failed.
    #[error("daemon bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// The HTTP server could not be started or stopped cleanly.
    #[error("server failed: {source}")]
    Server {
        /// Underlying server error.
        #[source]
        source: ServerError,
    },
    /// Extension monitoring could not be started or stopped cleanly.
    #[error("extension monitor failed: {source}")]
    Monitor {
        /// Underlying monitor error.
        #[source]
        source: MonitorError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ServerError> for LaunchError {
    fn from(source: ServerError) -> Self {
        Self::Server { source }
    }
}

impl From<MonitorError> for LaunchError {
    fn from(source: MonitorError) -> Self {
        Self::Monitor { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Shutdown listener that waits for termination signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(target: PROCESS_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

/// Runs the daemon with system configuration until SIGTERM, SIGINT, SIGQUIT
/// or SIGHUP.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, binding, monitoring or signal
/// installation fails.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with(
        &SystemConfigLoader,
        Arc::new(StructuredHealthReporter::new()),
        &SystemShutdownSignal,
    )
}

/// Runs the daemon with explicit collaborators.
///
/// # Errors
///
/// See [`run_daemon`].
pub fn run_daemon_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    shutdown: &dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    let mut daemon = bootstrap_with(loader, reporter, FlowRegistry::new())?;
    let prefix = daemon.config().action_prefix().to_owned();
    register_builtin_flows(daemon.processor_mut(), &prefix);
    info!(
        target: PROCESS_TARGET,
        flows = ?daemon.dispatcher().processor().keys(),
        "flows registered"
    );

    let running = serve(daemon)?;
    shutdown.wait()?;
    running.stop()
}

/// A serving daemon: HTTP server plus optional extension monitor.
pub(crate) struct Running {
    server: Server,
    monitor: Option<MonitorGuard<DirectoryMonitor>>,
}

impl Running {
    /// Bound TCP address of the server, if it listens on TCP.
    pub(crate) fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.local_addr()
    }

    /// Stops monitoring, then the server.
    pub(crate) fn stop(self) -> Result<(), LaunchError> {
        let Self { server, monitor } = self;
        let monitored = monitor.map_or(Ok(()), MonitorGuard::stop);
        let served = server.stop();
        info!(target: PROCESS_TARGET, "daemon stopped");
        monitored?;
        served?;
        Ok(())
    }
}

/// Starts the server and monitoring for a bootstrapped daemon.
pub(crate) fn serve<P>(daemon: Daemon<P>) -> Result<Running, LaunchError>
where
    P: Processor + 'static,
{
    let (config, dispatcher, reporter) = daemon.into_parts();
    let server = start_server(&config, dispatcher, reporter.as_ref())?;
    let monitor = match config.extension_dir() {
        Some(directory) => match MonitorGuard::start(DirectoryMonitor::new(
            directory,
            Arc::clone(&reporter),
        )) {
            Ok(guard) => Some(guard),
            Err(error) => {
                if let Err(stop_error) = server.stop() {
                    warn!(target: PROCESS_TARGET, error = %stop_error, "server stop failed");
                }
                return Err(error.into());
            }
        },
        None => None,
    };
    Ok(Running { server, monitor })
}

fn start_server<P>(
    config: &Config,
    dispatcher: Dispatcher<P>,
    reporter: &dyn HealthReporter,
) -> Result<Server, ServerError>
where
    P: Processor + 'static,
{
    let app = server::router(
        dispatcher,
        &config.route_prefix(),
        config.max_request_bytes(),
    );
    let server = Server::start(config.listen_socket(), app)?;
    if let Some(addr) = server.local_addr() {
        info!(target: PROCESS_TARGET, %addr, "server bound");
    }
    reporter.listener_started(server.endpoint());
    Ok(server)
}
