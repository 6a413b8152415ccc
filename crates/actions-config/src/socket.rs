//! Listen endpoints for the HTTP server.
//!
//! An endpoint is written either as a URL (`tcp://127.0.0.1:8680`,
//! `unix:///run/actions/actionsd.sock`) or as a table tagged by `transport`.
//! Environment variables and command-line flags only ever carry the URL form,
//! so both have to deserialize.

use std::fmt;
use std::fs::{self, DirBuilder};
use std::io;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use url::{Host, Url};

/// Where the daemon accepts HTTP connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEndpoint {
    /// Unix domain socket endpoint, typically fronted by a reverse proxy.
    Unix { path: Utf8PathBuf },
    /// TCP socket endpoint.
    Tcp { host: String, port: u16 },
}

/// Accepted serialized shapes of an endpoint.
#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointRepr {
    Url(String),
    Table(EndpointTable),
}

#[derive(Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
enum EndpointTable {
    Unix { path: Utf8PathBuf },
    Tcp { host: String, port: u16 },
}

impl From<EndpointTable> for SocketEndpoint {
    fn from(table: EndpointTable) -> Self {
        match table {
            EndpointTable::Unix { path } => Self::Unix { path },
            EndpointTable::Tcp { host, port } => Self::Tcp { host, port },
        }
    }
}

impl<'de> Deserialize<'de> for SocketEndpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match EndpointRepr::deserialize(deserializer)? {
            EndpointRepr::Url(raw) => raw.parse().map_err(serde::de::Error::custom),
            EndpointRepr::Table(table) => Ok(table.into()),
        }
    }
}

impl Serialize for SocketEndpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP socket endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the socket path when the endpoint uses the Unix transport.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Makes sure a Unix socket can be bound: its directory exists and is a
    /// directory. A missing directory is created with mode 0700; an existing
    /// one keeps its permissions. TCP endpoints need no preparation.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let directory = socket_directory(path)?;
        match fs::metadata(directory) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(SocketPreparationError::NotADirectory {
                path: directory.to_path_buf(),
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => create_private_dir(directory),
            Err(source) => Err(SocketPreparationError::Inspect {
                path: directory.to_path_buf(),
                source,
            }),
        }
    }
}

fn socket_directory(path: &Utf8Path) -> Result<&Utf8Path, SocketPreparationError> {
    path.parent()
        .filter(|parent| !parent.as_str().is_empty())
        .ok_or_else(|| SocketPreparationError::MissingParent {
            path: path.to_path_buf(),
        })
}

fn create_private_dir(directory: &Utf8Path) -> Result<(), SocketPreparationError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
    builder
        .create(directory)
        .map_err(|source| SocketPreparationError::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } if host.contains(':') => {
                write!(formatter, "tcp://[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input).map_err(|source| SocketParseError::Url {
            input: input.to_owned(),
            source,
        })?;
        let incomplete = |missing| SocketParseError::Incomplete {
            input: input.to_owned(),
            missing,
        };
        match url.scheme() {
            "unix" if url.path().is_empty() => Err(incomplete("socket path")),
            "unix" => Ok(Self::unix(url.path())),
            "tcp" | "http" => {
                let host = match url.host().ok_or_else(|| incomplete("host"))? {
                    Host::Ipv6(address) => address.to_string(),
                    Host::Ipv4(address) => address.to_string(),
                    Host::Domain(domain) => domain.to_owned(),
                };
                // `http://host` means port 80; a bare `tcp://host` has no default.
                let port = url
                    .port_or_known_default()
                    .ok_or_else(|| incomplete("port"))?;
                Ok(Self::tcp(host, port))
            }
            scheme => Err(SocketParseError::UnsupportedScheme {
                scheme: scheme.to_owned(),
                input: input.to_owned(),
            }),
        }
    }
}

/// Errors encountered while parsing a [`SocketEndpoint`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Text is not a URL.
    #[error("invalid endpoint URL '{input}': {source}")]
    Url {
        input: String,
        #[source]
        source: url::ParseError,
    },
    /// Scheme is none of `tcp`, `http` or `unix`.
    #[error("unsupported socket scheme '{scheme}' in '{input}'")]
    UnsupportedScheme { scheme: String, input: String },
    /// A part the transport needs is absent.
    #[error("endpoint '{input}' has no {missing}")]
    Incomplete { input: String, missing: &'static str },
}

/// Errors raised while preparing the directory of a Unix socket.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    #[error("socket path '{path}' has no parent directory")]
    MissingParent { path: Utf8PathBuf },
    #[error("socket directory '{path}' exists but is not a directory")]
    NotADirectory { path: Utf8PathBuf },
    #[error("failed to inspect socket directory '{path}': {source}")]
    Inspect {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}
