//! HTTP server hosting the dispatcher.
//!
//! [`Server`] owns a multi-threaded tokio runtime and serves an axum
//! [`Router`] on the configured endpoint until [`Server::stop`]. The
//! dispatcher itself is synchronous, so [`routes`] runs every dispatch on the
//! blocking pool.

mod routes;

use std::fs;
use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;

use actions_config::SocketEndpoint;
use axum::Router;
use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use thiserror::Error;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

pub(crate) use self::routes::router;

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// How long blocking dispatches may outlive a stopped server.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors surfaced while starting or stopping the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to build the server runtime: {source}")]
    Runtime {
        #[source]
        source: io::Error,
    },
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix { endpoint: String },
    #[error("existing unix socket {path} is already in use")]
    UnixInUse { path: String },
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket { path: String },
    #[error("failed to inspect existing unix socket {path}: {source}")]
    UnixInspect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("server stopped with an error: {source}")]
    Serve {
        #[source]
        source: io::Error,
    },
    #[error("server task failed: {source}")]
    Join {
        #[source]
        source: JoinError,
    },
}

/// Remote address of a connection; Unix sockets have none worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Peer(pub(crate) Option<SocketAddr>);

impl Connected<IncomingStream<'_, TcpListener>> for Peer {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        Self(Some(*stream.remote_addr()))
    }
}

#[cfg(unix)]
impl Connected<IncomingStream<'_, UnixListener>> for Peer {
    fn connect_info(_stream: IncomingStream<'_, UnixListener>) -> Self {
        Self(None)
    }
}

/// A running HTTP server.
pub(crate) struct Server {
    runtime: Runtime,
    endpoint: SocketEndpoint,
    local_addr: Option<SocketAddr>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

impl Server {
    /// Binds `endpoint` and starts serving `app` in the background.
    ///
    /// Must not be called from within an async context.
    pub(crate) fn start(endpoint: &SocketEndpoint, app: Router) -> Result<Self, ServerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("actionsd-http")
            .build()
            .map_err(|source| ServerError::Runtime { source })?;
        let (shutdown, signal) = oneshot::channel::<()>();
        let stopped = async move {
            signal.await.ok();
        };

        let (local_addr, task) = match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let listener = runtime
                    .block_on(TcpListener::bind((host.as_str(), *port)))
                    .map_err(|source| ServerError::Bind {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                let local_addr = listener.local_addr().ok();
                let serving = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<Peer>(),
                )
                .with_graceful_shutdown(stopped);
                (local_addr, runtime.spawn(serving.into_future()))
            }
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                let _context = runtime.enter();
                let listener = bind_unix(path.as_str())?;
                let serving = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<Peer>(),
                )
                .with_graceful_shutdown(stopped);
                (None, runtime.spawn(serving.into_future()))
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ServerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };

        debug!(target: SERVER_TARGET, %endpoint, "serving");
        Ok(Self {
            runtime,
            endpoint: endpoint.clone(),
            local_addr,
            shutdown,
            task,
        })
    }

    /// Bound TCP address; `None` for Unix sockets.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Endpoint the server was started on.
    pub(crate) fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Stops accepting connections, drains in-flight requests and removes a
    /// Unix socket file.
    pub(crate) fn stop(self) -> Result<(), ServerError> {
        let Self {
            runtime,
            endpoint,
            shutdown,
            task,
            ..
        } = self;
        if shutdown.send(()).is_err() {
            debug!(target: SERVER_TARGET, "server already stopped");
        }
        let served = runtime.block_on(task);
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        remove_socket_file(&endpoint);
        match served {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ServerError::Serve { source }),
            Err(source) => Err(ServerError::Join { source }),
        }
    }
}

/// Binds a Unix listener, replacing a stale socket file left by a previous
/// run but never one that still accepts connections.
#[cfg(unix)]
fn bind_unix(path: &str) -> Result<UnixListener, ServerError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.file_type().is_socket() => {
            return Err(ServerError::UnixNotSocket {
                path: path.to_owned(),
            });
        }
        Ok(_) => match std::os::unix::net::UnixStream::connect(path) {
            Ok(_live) => {
                return Err(ServerError::UnixInUse {
                    path: path.to_owned(),
                });
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(|source| ServerError::UnixCleanup {
                    path: path.to_owned(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(ServerError::UnixInspect {
                    path: path.to_owned(),
                    source,
                });
            }
        },
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ServerError::UnixInspect {
                path: path.to_owned(),
                source,
            });
        }
    }

    UnixListener::bind(path).map_err(|source| ServerError::Bind {
        endpoint: format!("unix://{path}"),
        source,
    })
}

fn remove_socket_file(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(target: SERVER_TARGET, %error, %path, "failed to remove unix socket file");
    }
}
