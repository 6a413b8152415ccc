use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP port for the HTTP listener.
pub const DEFAULT_TCP_PORT: u16 = 8680;

/// Default host for the HTTP listener.
const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default prefix joined with action names to form action keys.
pub const DEFAULT_ACTION_PREFIX: &str = "actions";

/// Default HTTP path prefix for action routes.
pub const DEFAULT_ROUTE_PREFIX: &str = "/actions";

/// Default bound on waiting for a flow outcome, in milliseconds.
pub const DEFAULT_FLOW_TIMEOUT_MS: u64 = 30_000;

/// Default bound on buffered request bodies (10 MiB).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default action key prefix.
pub fn default_action_prefix() -> &'static str {
    DEFAULT_ACTION_PREFIX
}

/// Default action route prefix.
pub fn default_route_prefix() -> &'static str {
    DEFAULT_ROUTE_PREFIX
}

/// Computes the default listen endpoint.
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_TCP_HOST, DEFAULT_TCP_PORT)
}
