//! RPC bridge: allow-listed dispatch into the host scripting engine.
//!
//! The peer process sends `{function_name, args}` on the rpc topic; the
//! bridge maps the symbolic name through a static allow-list, builds a call
//! expression, evaluates it through the host's [`ScriptBridge`] and replies
//! with the decoded result. The allow-list is the security boundary: names
//! not registered at construction are refused before the bridge is touched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pipebridge_proto::Envelope;
use serde_json::{Map, Value};

use crate::dispatch::{EventHandler, Outbound, SessionContext};
use crate::error::RelayError;

/// Capability interface onto the host scripting engine.
///
/// The host returns the evaluated expression's result stringified; the
/// relay only requires that string to be decodable per [`decode_result`].
#[async_trait]
pub trait ScriptBridge: Send + Sync {
    async fn eval(&self, expression: &str) -> Result<String, RelayError>;
}

/// Handler for the rpc topic.
pub struct RpcBridge {
    functions: HashMap<String, String>,
    bridge: Arc<dyn ScriptBridge>,
}

impl RpcBridge {
    pub fn new(bridge: Arc<dyn ScriptBridge>) -> Self {
        Self { functions: HashMap::new(), bridge }
    }

    /// Allow the symbolic *name* to invoke the host function *target*.
    pub fn allow(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.functions.insert(name.into(), target.into());
        self
    }

    async fn run(&self, event: &Envelope) -> Result<Value, String> {
        let name = event
            .data
            .get("function_name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if name.is_empty() {
            return Err("no rpc function name given".to_string());
        }
        let target = self
            .functions
            .get(name)
            .ok_or_else(|| format!("rpc function {name:?} is not allow-listed"))?;

        let args = event
            .data
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let expression = call_expression(target, &args)?;

        log::debug!("rpc: evaluating {expression}");
        let raw = self
            .bridge
            .eval(&expression)
            .await
            .map_err(|err| format!("host scripting call failed: {err}"))?;
        decode_result(&raw)
    }
}

#[async_trait]
impl EventHandler for RpcBridge {
    async fn handle(
        &mut self,
        event: &Envelope,
        _ctx: &SessionContext,
    ) -> Result<Vec<Outbound>, RelayError> {
        // Every failure becomes an error_message reply; nothing propagates.
        let mut data = Map::new();
        match self.run(event).await {
            Ok(result) => {
                data.insert("result".to_string(), result);
            }
            Err(message) => {
                log::warn!("rpc: {message}");
                data.insert("error_message".to_string(), Value::String(message));
            }
        }
        Ok(vec![Outbound::reply(event, data)])
    }
}

/// Serialize *args* positionally into a call expression.
///
/// Strings are quoted and escaped, other scalars are embedded verbatim.
/// Nested arrays/objects are not supported as arguments and are refused.
fn call_expression(target: &str, args: &[Value]) -> Result<String, String> {
    let mut rendered = Vec::with_capacity(args.len());
    for (idx, value) in args.iter().enumerate() {
        match value {
            Value::String(s) => rendered.push(quote(s)),
            Value::Bool(_) | Value::Number(_) | Value::Null => rendered.push(value.to_string()),
            Value::Array(_) | Value::Object(_) => {
                return Err(format!(
                    "rpc argument {idx} is a nested structure, only scalars are supported"
                ));
            }
        }
    }
    Ok(format!("{target}({})", rendered.join(", ")))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Decode the host's stringified result: the literals `true`/`false` map to
/// booleans, a string starting with `{` is parsed as JSON, anything else
/// passes through raw.
fn decode_result(raw: &str) -> Result<Value, String> {
    match raw {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ if raw.starts_with('{') => serde_json::from_str(raw)
            .map_err(|err| format!("failed to decode rpc result {raw:?}: {err}")),
        _ => Ok(Value::String(raw.to_string())),
    }
}
