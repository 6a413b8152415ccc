//! Routing of `<route_prefix>/<name>` onto the dispatcher.
//!
//! The body is buffered up to the configured limit before dispatch. For
//! `multipart/*` requests a copy of it is decoded with `multer` and the parts
//! are attached as a [`RawParts`] extension; the flow still receives the whole
//! body. Requests that never reach the dispatcher (unknown paths, oversized or
//! unreadable bodies) are answered with problem JSON as well.

use std::convert::Infallible;
use std::io::Cursor;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::rejection::{BytesRejection, PathRejection};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::{StatusCode, Uri, header, request};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tracing::{debug, warn};

use actions_runtime::multipart::is_multipart;
use actions_runtime::{
    ConnectionInfo, Dispatcher, InboundRequest, JsonResponse, Problem, Processor, RawPart,
    RawParts, RequestBody, ResponseSink,
};

use super::Peer;

const ROUTES_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Shared state of the action routes.
struct Actions<P> {
    dispatcher: Arc<Dispatcher<P>>,
    route_prefix: Arc<str>,
}

impl<P> Clone for Actions<P> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            route_prefix: Arc::clone(&self.route_prefix),
        }
    }
}

/// Builds the router serving every action of `dispatcher` under
/// `route_prefix`, which must be normalised to `/<segments>` or empty.
pub(crate) fn router<P>(
    dispatcher: Dispatcher<P>,
    route_prefix: &str,
    max_request_bytes: usize,
) -> Router
where
    P: Processor + 'static,
{
    let actions = Actions {
        dispatcher: Arc::new(dispatcher),
        route_prefix: Arc::from(route_prefix),
    };
    Router::new()
        .route(&format!("{route_prefix}/{{name}}"), any(dispatch_action::<P>))
        .fallback(route_not_found::<P>)
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(actions)
}

async fn dispatch_action<P>(
    State(actions): State<Actions<P>>,
    name: Result<Path<String>, PathRejection>,
    uri: Uri,
    parts: request::Parts,
    body: Result<Bytes, BytesRejection>,
) -> Response
where
    P: Processor + 'static,
{
    let Ok(Path(name)) = name else {
        return unrouted(uri.path(), &actions.route_prefix);
    };
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejected(&rejection),
    };

    let request = inbound_request(parts, body).await;
    let dispatcher = Arc::clone(&actions.dispatcher);
    let action = name.clone();
    let served = tokio::task::spawn_blocking(move || {
        let mut written = None;
        let Ok(outcome) = dispatcher.dispatch(&action, request, Captured(&mut written));
        (outcome, written)
    })
    .await;

    match served {
        Ok((outcome, Some(response))) => {
            debug!(
                target: ROUTES_TARGET,
                action = %name,
                status = outcome.status().as_u16(),
                "request served"
            );
            json_response(response)
        }
        Ok((_, None)) => problem_response(&Problem::internal_error("dispatch wrote no response")),
        Err(error) => {
            warn!(target: ROUTES_TARGET, action = %name, %error, "dispatch task failed");
            problem_response(&Problem::internal_error(format!(
                "dispatch of '{name}' did not complete"
            )))
        }
    }
}

async fn route_not_found<P>(State(actions): State<Actions<P>>, uri: Uri) -> Response
where
    P: Processor + 'static,
{
    unrouted(uri.path(), &actions.route_prefix)
}

fn unrouted(path: &str, route_prefix: &str) -> Response {
    debug!(target: ROUTES_TARGET, %path, "no route");
    problem_response(&Problem::not_found(
        "route_not_found",
        format!("no action route for path '{path}'; expected {route_prefix}/<name>"),
    ))
}

fn body_rejected(rejection: &BytesRejection) -> Response {
    let message = rejection.body_text();
    warn!(target: ROUTES_TARGET, %message, "rejecting request body");
    let problem = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Problem::new(StatusCode::PAYLOAD_TOO_LARGE, "request_too_large", message)
    } else {
        Problem::bad_request(message)
    };
    problem_response(&problem)
}

/// Reassembles the request for the dispatcher with connection facts and any
/// decoded multipart parts attached.
async fn inbound_request(mut parts: request::Parts, body: Bytes) -> InboundRequest {
    let peer = parts
        .extensions
        .get::<ConnectInfo<Peer>>()
        .and_then(|ConnectInfo(Peer(addr))| *addr);
    parts.extensions.insert(ConnectionInfo::new(peer, false));

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    if let Some(content_type) = content_type.filter(|value| is_multipart(Some(value.as_str()))) {
        match decode_parts(&content_type, body.clone()).await {
            Ok(decoded) => {
                parts.extensions.insert(RawParts(decoded));
            }
            Err(error) => {
                warn!(target: ROUTES_TARGET, %error, "failed to decode multipart body");
            }
        }
    }

    let body: RequestBody = Box::new(Cursor::new(body));
    InboundRequest::from_parts(parts, body)
}

async fn decode_parts(content_type: &str, body: Bytes) -> Result<Vec<RawPart>, multer::Error> {
    let boundary = multer::parse_boundary(content_type)?;
    let mut multipart = multer::Multipart::new(Body::from(body).into_data_stream(), boundary);
    let mut decoded = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(ToString::to_string);
        let headers = field.headers().clone();
        let data = field.bytes().await?;
        decoded.push(
            RawPart::new(name, data.to_vec())
                .with_filename(filename)
                .with_content_type(content_type)
                .with_headers(headers),
        );
    }
    Ok(decoded)
}

/// Sink that hands the dispatcher's response back to the async handler.
struct Captured<'a>(&'a mut Option<JsonResponse>);

impl ResponseSink for Captured<'_> {
    type Error = Infallible;

    fn send(self, response: JsonResponse) -> Result<(), Self::Error> {
        *self.0 = Some(response);
        Ok(())
    }
}

fn json_response(response: JsonResponse) -> Response {
    let status = response.status();
    let content_type = response.content_type();
    (
        status,
        [(header::CONTENT_TYPE, content_type)],
        response.into_body(),
    )
        .into_response()
}

fn problem_response(problem: &Problem) -> Response {
    json_response(JsonResponse::problem(problem))
}
