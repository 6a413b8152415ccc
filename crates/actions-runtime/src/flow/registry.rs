//! In-process flow engine keyed by action name.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use super::{Flow, FlowError, FlowHandle, Processor, flow_channel, panic_message};
use crate::context::ActionContext;
use crate::dispatch::DISPATCH_TARGET;

/// Registry of flows that runs each invocation on its own worker thread.
///
/// A panicking flow resolves its handle with [`FlowError::Panicked`]; the
/// registry itself stays usable.
#[derive(Default, Clone)]
pub struct FlowRegistry {
    flows: HashMap<String, Arc<dyn Flow>>,
}

impl FlowRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `flow` under `key`, replacing any previous registration.
    pub fn register(&mut self, key: impl Into<String>, flow: impl Flow + 'static) -> &mut Self {
        let key = key.into();
        debug!(target: DISPATCH_TARGET, %key, "registering flow");
        self.flows.insert(key, Arc::new(flow));
        self
    }

    /// Whether a flow is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.flows.contains_key(key)
    }

    /// Registered keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.flows.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("flows", &self.keys())
            .finish()
    }
}

impl Processor for FlowRegistry {
    fn process(&self, key: &str, mut context: ActionContext) -> Result<FlowHandle, FlowError> {
        let flow = self
            .flows
            .get(key)
            .cloned()
            .ok_or_else(|| FlowError::not_found(key))?;

        let (completer, handle) = flow_channel(key);
        let worker_key = key.to_owned();
        thread::Builder::new()
            .name(format!("flow:{key}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| flow.run(&mut context)));
                match result {
                    Ok(Ok(())) => completer.succeed(context),
                    Ok(Err(error)) => completer.fail(error),
                    Err(payload) => completer.fail(FlowError::Panicked {
                        key: worker_key,
                        message: panic_message(payload.as_ref()),
                    }),
                }
            })
            .map_err(FlowError::failed)?;
        Ok(handle)
    }
}
