//! Request-dispatch core for action services.
//!
//! An inbound request becomes an [`ActionContext`], is routed by action key
//! through a [`Processor`], and its single terminal outcome is turned into a
//! JSON response: the entity the flow set on success, or a [`Problem`] on
//! failure.
//!
//! ```text
//! http::Request ─┬─ Environment::extract ─┐
//!                └─ multipart::take_parts ─┴─► ActionContext
//!                                                 │
//!                      Processor::process(key, ctx) ─► FlowHandle::wait
//!                                                 │
//!                         Ok(ctx) ─► 200 + entity │ Err(e) ─► Problem::convert
//! ```
//!
//! The crate is transport-agnostic: anything that can produce an
//! `http::Request<RequestBody>` and accept a [`JsonResponse`] through a
//! [`ResponseSink`] can host a [`Dispatcher`]. Transports that decode
//! multipart bodies attach the parts as a [`RawParts`] extension.

mod context;
pub mod dispatch;
mod environment;
pub mod flow;
pub mod multipart;
mod problem;

pub use context::{ActionContext, InboundRequest, RequestBody, ResponseError, ResponseHolder};
pub use dispatch::{DispatchOutcome, Dispatcher, JSON_CONTENT_TYPE, JsonResponse, ResponseSink};
pub use environment::{ConnectionInfo, Environment};
pub use flow::{
    Flow, FlowCompleter, FlowError, FlowHandle, FlowOutcome, FlowRegistry, Processor, flow_channel,
};
pub use multipart::{FilePart, MultipartData, RawPart, RawParts};
pub use problem::{INTERNAL_ERROR_KIND, Problem, STACK_TRACE_ATTRIBUTE};
