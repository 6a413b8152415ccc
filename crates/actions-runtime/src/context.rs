//! Per-request execution state threaded through a flow.

use std::fmt;
use std::io::{self, Read};

use http::Request;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::environment::Environment;
use crate::flow::FlowError;
use crate::multipart::{self, MultipartData, RawPart};
use crate::problem::Problem;

/// Streaming request body owned by the context.
pub type RequestBody = Box<dyn Read + Send>;

/// The request shape accepted by the dispatcher.
pub type InboundRequest = Request<RequestBody>;

/// Errors raised by [`ResponseHolder`].
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The entity was already set during this dispatch.
    #[error("response entity has already been set")]
    AlreadySet,
    /// The entity could not be represented as JSON.
    #[error("failed to serialise response entity: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<ResponseError> for FlowError {
    fn from(error: ResponseError) -> Self {
        Self::failed(error)
    }
}

/// Holds the response entity; settable once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHolder {
    entity: Option<Value>,
}

impl ResponseHolder {
    /// Sets the entity written on success.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseError::AlreadySet`] on a second call, or
    /// [`ResponseError::Serialize`] when `entity` cannot be serialised.
    pub fn set_entity<T: Serialize + ?Sized>(&mut self, entity: &T) -> Result<(), ResponseError> {
        if self.entity.is_some() {
            return Err(ResponseError::AlreadySet);
        }
        self.entity = Some(serde_json::to_value(entity)?);
        Ok(())
    }

    /// The entity, if one was set.
    #[must_use]
    pub fn entity(&self) -> Option<&Value> {
        self.entity.as_ref()
    }

    /// Consumes the holder, returning the entity.
    #[must_use]
    pub fn into_entity(self) -> Option<Value> {
        self.entity
    }
}

/// The unit of execution state handed to a flow.
///
/// Built fresh for each request and dropped once the response is written.
pub struct ActionContext {
    action_key: String,
    body: RequestBody,
    parts: Vec<RawPart>,
    multipart: MultipartData,
    environment: Environment,
    response: ResponseHolder,
    debug: bool,
}

impl ActionContext {
    /// Builds the context for `request`, routed to `action_key`.
    ///
    /// The environment is captured first. Multipart requests take the parts
    /// their transport decoded; the body stays unread for the flow in every
    /// case.
    pub fn from_request(
        action_key: impl Into<String>,
        mut request: InboundRequest,
        debug: bool,
    ) -> Self {
        let environment = Environment::extract(&request);
        let parts = multipart::take_parts(environment.content_type(), &mut request);
        Self::new(action_key, environment, request.into_body(), parts, debug)
    }

    /// Assembles a context from already-extracted pieces.
    pub fn new(
        action_key: impl Into<String>,
        environment: Environment,
        body: RequestBody,
        parts: Vec<RawPart>,
        debug: bool,
    ) -> Self {
        let multipart = MultipartData::from_parts(&parts);
        Self {
            action_key: action_key.into(),
            body,
            parts,
            multipart,
            environment,
            response: ResponseHolder::default(),
            debug,
        }
    }

    /// Context for `action_key` with an empty request.
    pub fn for_action(action_key: impl Into<String>) -> Self {
        let environment = Environment::extract(&Request::new(()));
        Self::new(action_key, environment, Box::new(io::empty()), Vec::new(), false)
    }

    /// The `<prefix>:<name>` key this context was routed to.
    #[must_use]
    pub fn action_key(&self) -> &str {
        &self.action_key
    }

    /// Request metadata captured when the context was built.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Raw multipart parts; empty for other content types.
    #[must_use]
    pub fn parts(&self) -> &[RawPart] {
        &self.parts
    }

    /// Field and file view over [`ActionContext::parts`].
    #[must_use]
    pub fn multipart(&self) -> &MultipartData {
        &self.multipart
    }

    /// Whether failures should carry diagnostic detail.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// The response holder.
    #[must_use]
    pub fn response(&self) -> &ResponseHolder {
        &self.response
    }

    /// The response holder, for setting the entity.
    pub fn response_mut(&mut self) -> &mut ResponseHolder {
        &mut self.response
    }

    /// Moves the body stream out, leaving an empty reader behind.
    pub fn take_body(&mut self) -> RequestBody {
        std::mem::replace(&mut self.body, Box::new(io::empty()))
    }

    /// Consumes the body as JSON.
    ///
    /// # Errors
    ///
    /// Fails with a 400 `bad_request` problem when the body is not valid
    /// JSON for `T`.
    pub fn read_json<T: DeserializeOwned>(&mut self) -> Result<T, FlowError> {
        serde_json::from_reader(self.take_body())
            .map_err(|error| Problem::bad_request(format!("malformed JSON body: {error}")).into())
    }

    /// Consumes the context, returning the response holder.
    #[must_use]
    pub fn into_response(self) -> ResponseHolder {
        self.response
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("action_key", &self.action_key)
            .field("parts", &self.parts.len())
            .field("multipart", &self.multipart)
            .field("environment", &self.environment)
            .field("response", &self.response)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::multipart::RawParts;

    fn request(content_type: &str, body: &'static [u8]) -> InboundRequest {
        Request::post("/actions/createWidget")
            .header("Content-Type", content_type)
            .header("Authorization", "Bearer abc123")
            .body(Box::new(Cursor::new(body)) as RequestBody)
            .expect("request")
    }

    fn read_all(mut body: RequestBody) -> Vec<u8> {
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).expect("read body");
        bytes
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Widget {
        name: String,
    }

    #[rstest]
    fn builds_context_from_json_request() {
        let mut context = ActionContext::from_request(
            "actions:createWidget",
            request("application/json", br#"{"name":"x"}"#),
            false,
        );
        assert_eq!(context.action_key(), "actions:createWidget");
        assert_eq!(context.environment().token(), Some("abc123"));
        assert!(context.parts().is_empty());
        assert!(context.multipart().is_empty());
        assert!(!context.is_debug());

        let widget: Widget = context.read_json().expect("json body");
        assert_eq!(widget.name, "x");
    }

    #[rstest]
    fn multipart_requests_populate_parts() {
        let body: &'static [u8] =
            b"--b\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nx\r\n--b--\r\n";
        let mut request = request("multipart/form-data; boundary=b", body);
        request
            .extensions_mut()
            .insert(RawParts(vec![RawPart::new(Some("name".to_owned()), "x")]));

        let mut context = ActionContext::from_request("actions:upload", request, true);
        assert_eq!(context.parts().len(), 1);
        assert_eq!(context.multipart().field("name"), Some("x"));
        assert!(context.is_debug());
        assert_eq!(read_all(context.take_body()), body);
    }

    #[rstest]
    fn undecodable_multipart_body_stays_readable() {
        let body: &'static [u8] = b"this body never mentions its boundary!!";
        let mut context = ActionContext::from_request(
            "actions:upload",
            request("multipart/form-data; boundary=zzz", body),
            false,
        );
        assert!(context.parts().is_empty());
        assert!(context.multipart().is_empty());
        assert_eq!(read_all(context.take_body()), body);
    }

    #[rstest]
    fn body_can_only_be_consumed_once() {
        let mut context = ActionContext::from_request(
            "actions:createWidget",
            request("text/plain", b"hello"),
            false,
        );
        let mut first = String::new();
        context
            .take_body()
            .read_to_string(&mut first)
            .expect("read body");
        assert_eq!(first, "hello");

        let mut second = String::new();
        context
            .take_body()
            .read_to_string(&mut second)
            .expect("read body");
        assert!(second.is_empty());
    }

    #[rstest]
    fn malformed_json_is_a_bad_request() {
        let mut context = ActionContext::from_request(
            "actions:createWidget",
            request("application/json", b"{not json"),
            false,
        );
        let error = context.read_json::<Widget>().expect_err("must fail");
        let problem = Problem::convert(&error);
        assert_eq!(problem.kind(), "bad_request");
        assert!(problem.message().starts_with("malformed JSON body"));
    }

    #[rstest]
    fn entity_can_be_set_only_once() {
        let mut holder = ResponseHolder::default();
        holder.set_entity(&json!({"id": 42})).expect("first set");
        assert!(matches!(
            holder.set_entity(&json!({"id": 43})),
            Err(ResponseError::AlreadySet)
        ));
        assert_eq!(holder.into_entity(), Some(json!({"id": 42})));
    }

    #[rstest]
    fn explicit_unit_entity_is_null() {
        let mut holder = ResponseHolder::default();
        holder.set_entity(&()).expect("set");
        assert_eq!(holder.entity(), Some(&Value::Null));
    }
}
