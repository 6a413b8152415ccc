//! The dispatch state machine.
//!
//! `Building → Invoking → {Succeeded | Failed} → Responded`; every dispatch
//! reaches exactly one of the two terminal outcomes and writes exactly one
//! response.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use http::StatusCode;
use tracing::{debug, warn};

use super::DISPATCH_TARGET;
use super::response::{JsonResponse, ResponseSink};
use crate::context::{ActionContext, InboundRequest};
use crate::flow::{FlowError, FlowOutcome, Processor, panic_message};
use crate::problem::{Problem, STACK_TRACE_ATTRIBUTE};

/// Summary of a completed dispatch, for callers that log or count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The flow succeeded.
    Succeeded { status: StatusCode, has_entity: bool },
    /// The flow, or the dispatch around it, failed.
    Failed { status: StatusCode, kind: String },
}

impl DispatchOutcome {
    /// Status code written to the caller.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Succeeded { status, .. } | Self::Failed { status, .. } => *status,
        }
    }
}

/// Turns inbound requests into flow invocations and flow outcomes into JSON
/// responses.
///
/// A dispatcher holds no per-request state and may be shared between
/// connection threads.
#[derive(Debug)]
pub struct Dispatcher<P> {
    prefix: String,
    processor: P,
    debug: bool,
    timeout: Option<Duration>,
}

impl<P: Processor> Dispatcher<P> {
    /// Dispatcher routing `name` to the `<prefix>:<name>` flow of `processor`.
    pub fn new(prefix: impl Into<String>, processor: P) -> Self {
        Self {
            prefix: prefix.into(),
            processor,
            debug: false,
            timeout: None,
        }
    }

    /// Attaches the diagnostic trace to failure responses when `debug` is set.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Bounds the wait for a flow outcome; `None` waits indefinitely.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Prefix joined with action names to form flow keys.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The flow engine invoked for every dispatch.
    #[must_use]
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Mutable access to the processor, for registering flows before serving.
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Whether failure responses carry the diagnostic trace.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Upper bound on the wait for a flow outcome.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Key of the flow serving `action_name`.
    #[must_use]
    pub fn action_key(&self, action_name: &str) -> String {
        format!("{}:{action_name}", self.prefix)
    }

    /// Dispatches `request` to the flow for `action_name` and writes the
    /// outcome to `sink`.
    ///
    /// Blocks until the flow reports, or until the timeout elapses.
    ///
    /// # Errors
    ///
    /// Only failures of the sink itself are returned; every flow or dispatch
    /// failure is written to the sink as a problem.
    pub fn dispatch<S: ResponseSink>(
        &self,
        action_name: &str,
        request: InboundRequest,
        sink: S,
    ) -> Result<DispatchOutcome, S::Error> {
        let key = self.action_key(action_name);
        let (response, outcome) = match self.run(&key, request) {
            Ok(context) => Self::succeeded(&key, &context),
            Err(error) => self.failed(&key, &error),
        };
        sink.send(response)?;
        debug!(target: DISPATCH_TARGET, %key, status = outcome.status().as_u16(), "responded");
        Ok(outcome)
    }

    fn run(&self, key: &str, request: InboundRequest) -> FlowOutcome {
        debug!(target: DISPATCH_TARGET, %key, "building context");
        let context = panic::catch_unwind(AssertUnwindSafe(|| {
            ActionContext::from_request(key, request, self.debug)
        }))
        .map_err(|payload| panicked(key, payload.as_ref()))?;

        debug!(target: DISPATCH_TARGET, %key, "invoking flow");
        let handle = panic::catch_unwind(AssertUnwindSafe(|| self.processor.process(key, context)))
            .map_err(|payload| panicked(key, payload.as_ref()))??;
        handle.wait(self.timeout)
    }

    fn succeeded(key: &str, context: &ActionContext) -> (JsonResponse, DispatchOutcome) {
        let entity = context.response().entity();
        debug!(target: DISPATCH_TARGET, %key, has_entity = entity.is_some(), "flow succeeded");
        let response = JsonResponse::ok(entity);
        let outcome = DispatchOutcome::Succeeded {
            status: response.status(),
            has_entity: entity.is_some(),
        };
        (response, outcome)
    }

    fn failed(&self, key: &str, error: &FlowError) -> (JsonResponse, DispatchOutcome) {
        let mut problem = Problem::convert(error);
        warn!(
            target: DISPATCH_TARGET,
            %key,
            status = problem.status().as_u16(),
            kind = problem.kind(),
            %error,
            "flow failed"
        );
        if self.debug {
            problem.set_attribute(STACK_TRACE_ATTRIBUTE, error.trace());
        }
        let response = JsonResponse::problem(&problem);
        let outcome = DispatchOutcome::Failed {
            status: response.status(),
            kind: problem.kind().to_owned(),
        };
        (response, outcome)
    }
}

fn panicked(key: &str, payload: &(dyn std::any::Any + Send)) -> FlowError {
    FlowError::Panicked {
        key: key.to_owned(),
        message: panic_message(payload),
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::io::{Cursor, Read};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use rstest::{fixture, rstest};
    use serde_json::{Value, json};

    use super::*;
    use crate::environment::Environment;
    use crate::flow::{FlowHandle, MockProcessor, flow_channel};
    use crate::multipart::{RawPart, RawParts};
    use crate::{ConnectionInfo, RequestBody};

    /// Collects every response written through it.
    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<JsonResponse>>>);

    impl RecordingSink {
        fn responses(&self) -> Vec<JsonResponse> {
            self.0.lock().expect("sink lock").clone()
        }
    }

    impl ResponseSink for RecordingSink {
        type Error = Infallible;

        fn send(self, response: JsonResponse) -> Result<(), Infallible> {
            self.0.lock().expect("sink lock").push(response);
            Ok(())
        }
    }

    fn request(content_type: Option<&str>, body: &'static [u8]) -> InboundRequest {
        let mut builder = http::Request::post("/actions/createWidget")
            .header("Authorization", "Bearer abc123")
            .extension(ConnectionInfo::new(Some(([10, 0, 0, 7], 4242).into()), false));
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        builder
            .body(Box::new(Cursor::new(body)) as RequestBody)
            .expect("request")
    }

    #[fixture]
    fn json_request() -> InboundRequest {
        request(Some("application/json"), br#"{"name":"x"}"#)
    }

    fn run<P: Processor>(
        dispatcher: &Dispatcher<P>,
        name: &str,
        request: InboundRequest,
    ) -> (DispatchOutcome, JsonResponse) {
        let sink = RecordingSink::default();
        let outcome = match dispatcher.dispatch(name, request, sink.clone()) {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        };
        let mut responses = sink.responses();
        assert_eq!(responses.len(), 1, "exactly one response per dispatch");
        (outcome, responses.remove(0))
    }

    fn body_json(response: &JsonResponse) -> Value {
        serde_json::from_slice(response.body()).expect("json body")
    }

    fn processor_with_entity(entity: Value) -> MockProcessor {
        let mut processor = MockProcessor::new();
        processor.expect_process().returning(move |key, mut context| {
            context
                .response_mut()
                .set_entity(&entity)
                .expect("set entity");
            Ok(FlowHandle::ready(key, Ok(context)))
        });
        processor
    }

    fn failing_processor(error: fn() -> FlowError) -> MockProcessor {
        let mut processor = MockProcessor::new();
        processor
            .expect_process()
            .returning(move |key, _| Ok(FlowHandle::ready(key, Err(error()))));
        processor
    }

    #[rstest]
    fn create_widget_success(json_request: InboundRequest) {
        let mut processor = MockProcessor::new();
        processor
            .expect_process()
            .withf(|key, _| key == "actions:createWidget")
            .times(1)
            .returning(|key, mut context| {
                let widget: Value = context.read_json().expect("json body");
                assert_eq!(widget, json!({"name": "x"}));
                context
                    .response_mut()
                    .set_entity(&json!({"id": 42}))
                    .expect("set entity");
                Ok(FlowHandle::ready(key, Ok(context)))
            });
        let dispatcher = Dispatcher::new("actions", processor);

        let (outcome, response) = run(&dispatcher, "createWidget", json_request);
        assert_eq!(
            outcome,
            DispatchOutcome::Succeeded {
                status: StatusCode::OK,
                has_entity: true
            }
        );
        assert_eq!(response.body(), br#"{"id":42}"#);
    }

    #[rstest]
    fn create_widget_validation_failure(json_request: InboundRequest) {
        let processor = failing_processor(|| Problem::validation("name is too short").into());
        let dispatcher = Dispatcher::new("actions", processor);

        let (outcome, response) = run(&dispatcher, "createWidget", json_request);
        assert_eq!(outcome.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.body(),
            br#"{"status":400,"kind":"validation","message":"name is too short"}"#
        );
    }

    #[rstest]
    #[case::plain(false)]
    #[case::debug(true)]
    fn unknown_actions_are_not_found(json_request: InboundRequest, #[case] debug: bool) {
        let mut processor = MockProcessor::new();
        processor
            .expect_process()
            .returning(|key, _| Err(FlowError::not_found(key)));
        let dispatcher = Dispatcher::new("actions", processor).with_debug(debug);

        let (outcome, response) = run(&dispatcher, "missing", json_request);
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                status: StatusCode::NOT_FOUND,
                kind: "flow_not_found".to_owned()
            }
        );
        let body = body_json(&response);
        assert_eq!(body["kind"], "flow_not_found");
        assert!(
            body["message"]
                .as_str()
                .is_some_and(|message| message.contains("actions:missing"))
        );
    }

    #[rstest]
    fn late_outcomes_still_yield_one_response(json_request: InboundRequest) {
        let mut processor = MockProcessor::new();
        processor.expect_process().returning(|key, mut context| {
            let (completer, handle) = flow_channel(key);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                context.response_mut().set_entity("late").expect("set entity");
                completer.succeed(context);
            });
            Ok(handle)
        });
        let dispatcher = Dispatcher::new("actions", processor);

        let (_, response) = run(&dispatcher, "slowWidget", json_request);
        assert_eq!(body_json(&response), json!("late"));
    }

    #[rstest]
    #[case(json!({"id": 42}))]
    #[case(json!(["a", "b"]))]
    #[case(json!("text"))]
    #[case(Value::Null)]
    fn entity_round_trips_through_the_body(json_request: InboundRequest, #[case] entity: Value) {
        let dispatcher = Dispatcher::new("actions", processor_with_entity(entity.clone()));
        let (_, response) = run(&dispatcher, "createWidget", json_request);
        assert_eq!(body_json(&response), entity);
    }

    #[rstest]
    fn absent_entity_yields_empty_success(json_request: InboundRequest) {
        let mut processor = MockProcessor::new();
        processor
            .expect_process()
            .returning(|key, context| Ok(FlowHandle::ready(key, Ok(context))));
        let dispatcher = Dispatcher::new("actions", processor);

        let (outcome, response) = run(&dispatcher, "createWidget", json_request);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
        assert!(matches!(
            outcome,
            DispatchOutcome::Succeeded {
                has_entity: false,
                ..
            }
        ));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("widget store unavailable")]
    struct StoreError(#[source] std::io::Error);

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn trace_is_attached_only_in_debug(json_request: InboundRequest, #[case] debug: bool) {
        let processor = failing_processor(|| {
            FlowError::failed(StoreError(std::io::Error::other("connection refused")))
        });
        let dispatcher = Dispatcher::new("actions", processor).with_debug(debug);

        let (outcome, response) = run(&dispatcher, "createWidget", json_request);
        assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(&response);
        assert_eq!(body.get(STACK_TRACE_ATTRIBUTE).is_some(), debug);
        if debug {
            assert_eq!(
                body[STACK_TRACE_ATTRIBUTE],
                json!(["widget store unavailable", "connection refused"])
            );
        }
    }

    #[rstest]
    #[case(None)]
    #[case(Some("application/json"))]
    #[case(Some("text/plain; boundary=b"))]
    fn non_multipart_requests_have_no_parts(#[case] content_type: Option<&str>) {
        let body: &'static [u8] =
            b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--b--\r\n";
        let mut processor = MockProcessor::new();
        processor.expect_process().returning(|key, mut context| {
            let parts = context.parts().len();
            let mut raw = Vec::new();
            context.take_body().read_to_end(&mut raw).expect("read body");
            context
                .response_mut()
                .set_entity(&json!({"parts": parts, "bodyBytes": raw.len()}))
                .expect("set entity");
            Ok(FlowHandle::ready(key, Ok(context)))
        });
        let dispatcher = Dispatcher::new("actions", processor);

        let mut request = request(content_type, body);
        request
            .extensions_mut()
            .insert(RawParts(vec![RawPart::new(Some("a".to_owned()), "1")]));
        let (_, response) = run(&dispatcher, "upload", request);
        assert_eq!(body_json(&response), json!({"parts": 0, "bodyBytes": body.len()}));
    }

    #[rstest]
    fn multipart_requests_reach_the_flow_as_parts() {
        let body: &'static [u8] =
            b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--b--\r\n";
        let mut processor = MockProcessor::new();
        processor.expect_process().returning(|key, mut context| {
            let field = context.multipart().field("a").map(str::to_owned);
            context.response_mut().set_entity(&field).expect("set entity");
            Ok(FlowHandle::ready(key, Ok(context)))
        });
        let dispatcher = Dispatcher::new("actions", processor);

        let mut request = request(Some("multipart/form-data; boundary=b"), body);
        request
            .extensions_mut()
            .insert(RawParts(vec![RawPart::new(Some("a".to_owned()), "1")]));
        let (_, response) = run(&dispatcher, "upload", request);
        assert_eq!(body_json(&response), json!("1"));
    }

    #[rstest]
    fn environment_is_complete_and_token_unprefixed(json_request: InboundRequest) {
        let mut processor = MockProcessor::new();
        processor.expect_process().returning(|key, mut context| {
            let environment = context.environment().clone();
            context
                .response_mut()
                .set_entity(&environment)
                .expect("set entity");
            Ok(FlowHandle::ready(key, Ok(context)))
        });
        let dispatcher = Dispatcher::new("actions", processor);

        let (_, response) = run(&dispatcher, "createWidget", json_request);
        let body = body_json(&response);
        let object = body.as_object().expect("environment object");
        for key in Environment::KEYS {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object.len(), Environment::KEYS.len());
        assert_eq!(body["Token"], "abc123");
        assert_eq!(body["SourceIp"], "10.0.0.7");
        assert_eq!(body["Referer"], Value::Null);
    }

    struct ExplodingProcessor;

    impl Processor for ExplodingProcessor {
        fn process(&self, _: &str, _: ActionContext) -> Result<FlowHandle, FlowError> {
            panic!("processor exploded")
        }
    }

    #[rstest]
    fn processor_panics_become_internal_errors(json_request: InboundRequest) {
        let dispatcher = Dispatcher::new("actions", ExplodingProcessor).with_debug(true);

        let (outcome, response) = run(&dispatcher, "createWidget", json_request);
        assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(&response);
        assert_eq!(body["kind"], "internal_error");
        assert_eq!(
            body[STACK_TRACE_ATTRIBUTE][0],
            "flow 'actions:createWidget' panicked: processor exploded"
        );
    }

    #[rstest]
    fn silent_flows_time_out(json_request: InboundRequest) {
        let parked = Arc::new(Mutex::new(Vec::new()));
        let keep = Arc::clone(&parked);
        let mut processor = MockProcessor::new();
        processor.expect_process().returning(move |key, _| {
            let (completer, handle) = flow_channel(key);
            keep.lock().expect("parked lock").push(completer);
            Ok(handle)
        });
        let dispatcher = Dispatcher::new("actions", processor)
            .with_timeout(Some(Duration::from_millis(20)));

        let (outcome, _) = run(&dispatcher, "createWidget", json_request);
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                status: StatusCode::GATEWAY_TIMEOUT,
                kind: "timeout".to_owned()
            }
        );
        assert_eq!(parked.lock().expect("parked lock").len(), 1);
    }

    #[rstest]
    fn action_keys_join_prefix_and_name() {
        let dispatcher = Dispatcher::new("billing", MockProcessor::new());
        assert_eq!(dispatcher.action_key("createInvoice"), "billing:createInvoice");
    }
}
