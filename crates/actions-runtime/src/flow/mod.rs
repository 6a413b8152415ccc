//! Flow engine contract.
//!
//! A [`Processor`] accepts an action key and an [`ActionContext`] and hands
//! back a [`FlowHandle`] that resolves exactly once, with either the context
//! or a [`FlowError`]. The single-resolution guarantee is carried by the
//! types: [`FlowCompleter`] and [`FlowHandle`] are both consumed on use.

mod registry;

use std::any::Any;
use std::error::Error;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::context::ActionContext;
use crate::dispatch::DISPATCH_TARGET;
use crate::problem::Problem;

pub use self::registry::FlowRegistry;

/// Type-erased failure raised from inside a flow.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Terminal outcome of one flow invocation.
pub type FlowOutcome = Result<ActionContext, FlowError>;

/// Failures surfaced by the flow engine or by flows themselves.
#[derive(Debug, Error)]
pub enum FlowError {
    /// No flow is registered under the key.
    #[error("no flow registered for action '{key}'")]
    NotFound { key: String },

    /// The flow did not complete within the dispatch timeout.
    #[error("flow '{key}' did not complete within {timeout:?}")]
    TimedOut { key: String, timeout: Duration },

    /// The flow dropped its completer without reporting an outcome.
    #[error("flow '{key}' finished without reporting an outcome")]
    Abandoned { key: String },

    /// The flow panicked.
    #[error("flow '{key}' panicked: {message}")]
    Panicked { key: String, message: String },

    /// The flow rejected the request with an explicit problem.
    #[error(transparent)]
    Problem(Problem),

    /// Any other failure raised by a flow.
    #[error("{source}")]
    Failed {
        #[source]
        source: BoxError,
    },
}

impl FlowError {
    /// Routing failure for `key`.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Wraps an arbitrary error raised by a flow.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed {
            source: error.into(),
        }
    }

    /// Messages of this error and each of its causes, outermost first.
    ///
    /// A cause whose message repeats the one before it is skipped, which
    /// collapses wrappers that only forward their source's text.
    #[must_use]
    pub fn trace(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        let mut cause = Error::source(self);
        while let Some(error) = cause {
            let message = error.to_string();
            if lines.last() != Some(&message) {
                lines.push(message);
            }
            cause = error.source();
        }
        lines
    }
}

/// Creates the single-shot channel connecting a flow to its caller.
#[must_use]
pub fn flow_channel(key: impl Into<String>) -> (FlowCompleter, FlowHandle) {
    let key = key.into();
    let (sender, receiver) = mpsc::sync_channel(1);
    (
        FlowCompleter {
            key: key.clone(),
            sender,
        },
        FlowHandle {
            key,
            receiver,
        },
    )
}

/// Write half of a flow outcome. Consumed by the first completion.
#[derive(Debug)]
pub struct FlowCompleter {
    key: String,
    sender: SyncSender<FlowOutcome>,
}

impl FlowCompleter {
    /// Action key this completer reports for.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reports the terminal outcome.
    ///
    /// A caller that has already given up (timed out or dropped its handle)
    /// is not an error for the flow; the outcome is discarded.
    pub fn complete(self, outcome: FlowOutcome) {
        if self.sender.send(outcome).is_err() {
            debug!(
                target: DISPATCH_TARGET,
                key = %self.key,
                "discarding flow outcome; caller no longer waiting"
            );
        }
    }

    /// Reports success.
    pub fn succeed(self, context: ActionContext) {
        self.complete(Ok(context));
    }

    /// Reports failure.
    pub fn fail(self, error: FlowError) {
        self.complete(Err(error));
    }
}

/// Read half of a flow outcome. Consumed by [`FlowHandle::wait`].
#[derive(Debug)]
pub struct FlowHandle {
    key: String,
    receiver: Receiver<FlowOutcome>,
}

impl FlowHandle {
    /// Handle that resolves immediately with `outcome`.
    #[must_use]
    pub fn ready(key: impl Into<String>, outcome: FlowOutcome) -> Self {
        let (completer, handle) = flow_channel(key);
        completer.complete(outcome);
        handle
    }

    /// Action key this handle waits on.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Blocks until the flow resolves.
    ///
    /// With a `timeout`, waiting longer yields [`FlowError::TimedOut`]. A
    /// completer dropped without reporting yields [`FlowError::Abandoned`].
    pub fn wait(self, timeout: Option<Duration>) -> FlowOutcome {
        let Self { key, receiver } = self;
        match timeout {
            Some(timeout) => match receiver.recv_timeout(timeout) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => Err(FlowError::TimedOut { key, timeout }),
                Err(RecvTimeoutError::Disconnected) => Err(FlowError::Abandoned { key }),
            },
            None => receiver
                .recv()
                .unwrap_or_else(|_| Err(FlowError::Abandoned { key })),
        }
    }
}

/// The flow engine seam.
///
/// Implementations look up the flow registered for `key`, start it with
/// `context`, and return a handle to its eventual outcome. Returning `Err`
/// directly is equivalent to a handle that resolves with that error.
#[cfg_attr(test, mockall::automock)]
pub trait Processor: Send + Sync {
    /// Starts the flow registered under `key`.
    fn process(&self, key: &str, context: ActionContext) -> Result<FlowHandle, FlowError>;
}

impl<P: Processor + ?Sized> Processor for Arc<P> {
    fn process(&self, key: &str, context: ActionContext) -> Result<FlowHandle, FlowError> {
        (**self).process(key, context)
    }
}

/// A unit of request processing registered under an action key.
///
/// Flows mutate the context in place, typically by reading the request and
/// setting the response entity.
pub trait Flow: Send + Sync {
    /// Runs the flow.
    fn run(&self, context: &mut ActionContext) -> Result<(), FlowError>;
}

impl<F> Flow for F
where
    F: Fn(&mut ActionContext) -> Result<(), FlowError> + Send + Sync,
{
    fn run(&self, context: &mut ActionContext) -> Result<(), FlowError> {
        self(context)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
