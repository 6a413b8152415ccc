//! Response envelope and the sink it is written through.

use http::StatusCode;
use serde_json::Value;
use tracing::warn;

use super::DISPATCH_TARGET;
use crate::problem::Problem;

/// The only content type responses are encoded with.
pub const JSON_CONTENT_TYPE: &str = "application/json";

const PROBLEM_FALLBACK: &[u8] =
    br#"{"status":500,"kind":"internal_error","message":"failed to serialise problem"}"#;

/// A status code plus a JSON body; an empty body means no entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl JsonResponse {
    /// Success response carrying `entity`, or an empty body without one.
    #[must_use]
    pub fn ok(entity: Option<&Value>) -> Self {
        let Some(entity) = entity else {
            return Self {
                status: StatusCode::OK,
                body: Vec::new(),
            };
        };
        match serde_json::to_vec(entity) {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(error) => Self::problem(&Problem::internal_error(format!(
                "failed to serialise response entity: {error}"
            ))),
        }
    }

    /// Failure response carrying `problem`, with its status.
    #[must_use]
    pub fn problem(problem: &Problem) -> Self {
        let body = serde_json::to_vec(problem).unwrap_or_else(|error| {
            warn!(target: DISPATCH_TARGET, %error, "falling back to fixed problem body");
            PROBLEM_FALLBACK.to_vec()
        });
        Self {
            status: problem.status(),
            body,
        }
    }

    /// Status code to write.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Encoded body; empty for an entity-less success.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the response, returning the encoded body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Always [`JSON_CONTENT_TYPE`].
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }
}

/// Destination of the one response a dispatch writes.
///
/// `send` consumes the sink, so a dispatch cannot respond twice.
pub trait ResponseSink {
    /// Failure writing to the underlying transport.
    type Error;

    /// Writes `response`.
    fn send(self, response: JsonResponse) -> Result<(), Self::Error>;
}
