//! Request dispatch: context construction, flow invocation and the single
//! JSON response per request.

mod dispatcher;
mod response;

pub use self::dispatcher::{DispatchOutcome, Dispatcher};
pub use self::response::{JSON_CONTENT_TYPE, JsonResponse, ResponseSink};

/// Tracing target for dispatch events.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
