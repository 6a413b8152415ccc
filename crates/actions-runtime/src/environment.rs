//! Request metadata snapshot taken once per dispatch.

use std::net::SocketAddr;

use http::{HeaderMap, Request, header};
use serde::Serialize;
use time::OffsetDateTime;

const BEARER_PREFIX: &str = "Bearer ";

/// Transport facts the request line and headers cannot express.
///
/// Transports attach this as a request extension; when absent the origin is
/// unknown and the transport is assumed insecure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    peer: Option<SocketAddr>,
    secure: bool,
}

impl ConnectionInfo {
    /// Describes a connection from `peer`.
    #[must_use]
    pub fn new(peer: Option<SocketAddr>, secure: bool) -> Self {
        Self { peer, secure }
    }

    /// Remote address of the caller, if the transport has one.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether the connection is protected by transport-level security.
    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }
}

/// Immutable request metadata handed to flows.
///
/// Serialises to an object with exactly the keys in [`Environment::KEYS`];
/// absent values serialise as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Environment {
    #[serde(with = "time::serde::rfc3339")]
    current_time: OffsetDateTime,
    epoch_time: i64,
    source_ip: Option<String>,
    referer: Option<String>,
    token: Option<String>,
    user_agent: Option<String>,
    secure_transport: bool,
    content_type: Option<String>,
    content_encoding: Option<String>,
}

impl Environment {
    /// Serialised key names, in declaration order.
    pub const KEYS: [&'static str; 9] = [
        "CurrentTime",
        "EpochTime",
        "SourceIp",
        "Referer",
        "Token",
        "UserAgent",
        "SecureTransport",
        "ContentType",
        "ContentEncoding",
    ];

    /// Captures the environment of `request` at the current instant.
    ///
    /// Only the request line, headers and extensions are inspected; the body
    /// is never touched.
    #[must_use]
    pub fn extract<B>(request: &Request<B>) -> Self {
        Self::extract_at(request, OffsetDateTime::now_utc())
    }

    /// Captures the environment of `request` as of `now`.
    #[must_use]
    pub fn extract_at<B>(request: &Request<B>, now: OffsetDateTime) -> Self {
        let headers = request.headers();
        let connection = request
            .extensions()
            .get::<ConnectionInfo>()
            .copied()
            .unwrap_or_default();
        let epoch_millis = now.unix_timestamp_nanos() / 1_000_000;

        Self {
            current_time: now,
            epoch_time: i64::try_from(epoch_millis).unwrap_or(i64::MAX),
            source_ip: connection.peer().map(|peer| peer.ip().to_string()),
            referer: header_text(headers, &header::REFERER),
            token: header_text(headers, &header::AUTHORIZATION)
                .map(|value| value.replace(BEARER_PREFIX, "")),
            user_agent: header_text(headers, &header::USER_AGENT),
            secure_transport: connection.secure(),
            content_type: header_text(headers, &header::CONTENT_TYPE),
            content_encoding: header_text(headers, &header::CONTENT_ENCODING)
                .map(|value| value.to_lowercase()),
        }
    }

    /// Wall-clock time at extraction.
    #[must_use]
    pub fn current_time(&self) -> OffsetDateTime {
        self.current_time
    }

    /// Extraction time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn epoch_time(&self) -> i64 {
        self.epoch_time
    }

    /// Caller's IP address.
    #[must_use]
    pub fn source_ip(&self) -> Option<&str> {
        self.source_ip.as_deref()
    }

    /// `Referer` header.
    #[must_use]
    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }

    /// `Authorization` header with the bearer prefix removed.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// `User-Agent` header.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Whether the request arrived over a secure transport.
    #[must_use]
    pub fn secure_transport(&self) -> bool {
        self.secure_transport
    }

    /// `Content-Type` header, verbatim.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// `Content-Encoding` header, lower-cased.
    #[must_use]
    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }
}

/// Header value as text; values that are not visible ASCII read as absent.
fn header_text(headers: &HeaderMap, name: &header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}
