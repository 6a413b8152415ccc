//! The canonical failure representation returned to callers.
//!
//! Every failure that crosses the dispatch boundary is reduced to a
//! [`Problem`]: a status code, a machine-readable kind, a human message, and
//! an ordered map of extra attributes that serialise inline next to the fixed
//! fields.

use http::StatusCode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::flow::FlowError;

/// Extra attribute key under which the diagnostic trace is attached.
pub const STACK_TRACE_ATTRIBUTE: &str = "stackTrace";

/// Kind reported for failures that could not be classified.
pub const INTERNAL_ERROR_KIND: &str = "internal_error";

/// Normalised, status-coded failure.
///
/// ```json
/// {"status":400,"kind":"validation","message":"name is required"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind} ({}): {message}", .status.as_u16())]
pub struct Problem {
    #[serde(with = "status_code")]
    status: StatusCode,
    kind: String,
    message: String,
    #[serde(flatten)]
    extra: IndexMap<String, Value>,
}

impl Problem {
    /// Builds a problem with the given status, kind and message.
    pub fn new(status: StatusCode, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: kind.into(),
            message: message.into(),
            extra: IndexMap::new(),
        }
    }

    /// 400 with kind `bad_request`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 400 with kind `validation`.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    /// 404 with the given kind.
    pub fn not_found(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, kind, message)
    }

    /// 500 with kind `internal_error`.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_KIND, message)
    }

    /// Converts any flow failure into a problem.
    ///
    /// Never fails: kinds it cannot classify become a 500 `internal_error`.
    /// Diagnostic attributes are left to the caller.
    #[must_use]
    pub fn convert(error: &FlowError) -> Self {
        match error {
            FlowError::NotFound { .. } => Self::not_found("flow_not_found", error.to_string()),
            FlowError::TimedOut { .. } => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", error.to_string())
            }
            FlowError::Abandoned { .. } | FlowError::Panicked { .. } => {
                Self::internal_error(error.to_string())
            }
            FlowError::Problem(problem) => problem.clone(),
            FlowError::Failed { source } => match source.downcast_ref::<Self>() {
                Some(problem) => problem.clone(),
                None => Self::internal_error(source.to_string()),
            },
        }
    }

    /// Status code written with this problem.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable failure category.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human-readable summary.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Extra attributes, in insertion order.
    #[must_use]
    pub fn extra(&self) -> &IndexMap<String, Value> {
        &self.extra
    }

    /// Looks up one extra attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Sets an extra attribute, replacing any previous value under `key`.
    ///
    /// The fixed field names `status`, `kind` and `message` are ignored so the
    /// inline serialisation never emits duplicate keys.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if matches!(key.as_str(), "status" | "kind" | "message") {
            return;
        }
        self.extra.insert(key, value.into());
    }

    /// Builder form of [`Self::set_attribute`].
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_attribute(key, value);
        self
    }
}

/// Serde form of the status: a bare number. Numbers outside the HTTP range
/// read as 500 so the written status and the body always agree.
mod status_code {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(status.as_u16())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<StatusCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u16::deserialize(deserializer)?;
        Ok(StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
    }
}

impl From<Problem> for FlowError {
    fn from(problem: Problem) -> Self {
        Self::Problem(problem)
    }
}
