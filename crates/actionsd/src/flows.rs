//! Flows the daemon registers on its own.

use std::io::Read;

use actions_runtime::{ActionContext, Environment, FilePart, FlowError, FlowRegistry, Problem};
use serde::Serialize;
use serde_json::{Value, json};

/// Registers `<prefix>:ping` and `<prefix>:echo` on `registry`.
///
/// `ping` answers `{"pong":true}`. `echo` answers with what the daemon saw
/// of the request: its JSON body, the environment snapshot and the multipart
/// field and file names.
pub fn register_builtin_flows(registry: &mut FlowRegistry, prefix: &str) {
    registry
        .register(format!("{prefix}:ping"), ping)
        .register(format!("{prefix}:echo"), echo);
}

fn ping(context: &mut ActionContext) -> Result<(), FlowError> {
    context.response_mut().set_entity(&json!({ "pong": true }))?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Echo<'a> {
    action: &'a str,
    body: Value,
    environment: &'a Environment,
    fields: Vec<&'a str>,
    files: &'a [FilePart],
}

fn echo(context: &mut ActionContext) -> Result<(), FlowError> {
    let body = if context.parts().is_empty() {
        read_optional_json(context)?
    } else {
        Value::Null
    };
    let entity = Echo {
        action: context.action_key(),
        body,
        environment: context.environment(),
        fields: context.multipart().fields().keys().map(String::as_str).collect(),
        files: context.multipart().files(),
    };
    let entity = serde_json::to_value(&entity).map_err(FlowError::failed)?;
    context.response_mut().set_entity(&entity)?;
    Ok(())
}

/// Reads the body as JSON; an empty body reads as `null`.
fn read_optional_json(context: &mut ActionContext) -> Result<Value, FlowError> {
    let mut raw = Vec::new();
    context
        .take_body()
        .read_to_end(&mut raw)
        .map_err(FlowError::failed)?;
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&raw)
        .map_err(|error| Problem::bad_request(format!("malformed JSON body: {error}")).into())
}
