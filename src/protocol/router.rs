use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

use super::{
    error_response, success_response, RpcError, PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION,
};
use crate::telemetry::{EventSink, RequestEvent};
use crate::tools::{CallContext, DispatchError, Registry};

/// What the transport should do with a handled message.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// Successful request; send the response.
    Ok(Value),
    /// Failed request; send the error response.
    Err(Value),
    /// Notification; send nothing.
    NoResponse,
}

impl Handled {
    pub fn into_response(self) -> Option<Value> {
        match self {
            Self::Ok(v) | Self::Err(v) => Some(v),
            Self::NoResponse => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Err(_))
    }
}

/// A validated envelope. `id` is `None` for notifications and `Some(Value::Null)`
/// for requests that really sent `"id": null`.
struct Envelope<'a> {
    id: Option<&'a Value>,
    method: &'a str,
    params: Option<&'a Value>,
}

pub struct Router {
    registry: Arc<Registry>,
    sink: Arc<dyn EventSink>,
    protocol_version: String,
}

impl Router {
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            sink,
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Handle one message. Emits a telemetry event whatever the outcome.
    pub fn handle(&self, message: &Value, ctx: &CallContext) -> Handled {
        let started = Instant::now();
        let (handled, method, tool) = self.route(message, ctx);

        self.sink.record(RequestEvent {
            method,
            tool,
            project_id: ctx.project.id.clone(),
            elapsed: started.elapsed(),
            ok: handled.is_ok(),
        });
        handled
    }

    fn route(&self, message: &Value, ctx: &CallContext) -> (Handled, String, Option<String>) {
        let envelope = match parse_envelope(message) {
            Ok(envelope) => envelope,
            Err(error) => {
                let method = message
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or("<invalid>")
                    .to_string();
                tracing::debug!(error = %error.message, "invalid request envelope");
                return (Handled::Err(error_response(Value::Null, &error)), method, None);
            }
        };
        let method = envelope.method.to_string();

        let Some(id) = envelope.id.cloned() else {
            tracing::debug!(method = %method, "notification acknowledged");
            return (Handled::NoResponse, method, None);
        };

        let (result, tool) = match envelope.method {
            "initialize" => (self.initialize(envelope.params, ctx), None),
            "ping" => (Ok(json!({})), None),
            "tools/list" => (Ok(json!({ "tools": self.registry.catalog() })), None),
            "tools/call" => self.call_tool(envelope.params, ctx),
            other => (
                Err(RpcError::method_not_found(format!("Method not found: {other}"))),
                None,
            ),
        };

        let handled = match result {
            Ok(result) => Handled::Ok(success_response(id, result)),
            Err(error) => Handled::Err(error_response(id, &error)),
        };
        (handled, method, tool)
    }

    fn initialize(&self, params: Option<&Value>, ctx: &CallContext) -> Result<Value, RpcError> {
        let requested = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("protocolVersion must be a string"))?;

        // Plain string comparison: versions are date-shaped, so this orders them.
        if requested < self.protocol_version.as_str() {
            return Err(RpcError::invalid_params(format!(
                "Unsupported protocol version {requested}; server requires {} or later",
                self.protocol_version
            )));
        }

        tracing::info!(
            project = %ctx.project.slug,
            agent = ctx.agent.as_deref().unwrap_or("-"),
            client_version = requested,
            "client initialized"
        );

        Ok(json!({
            "protocolVersion": self.protocol_version,
            "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
            "capabilities": { "tools": { "listChanged": false } },
            "project": {
                "id": ctx.project.id,
                "slug": ctx.project.slug,
                "name": ctx.project.name,
            },
            "tools": self.registry.catalog(),
        }))
    }

    fn call_tool(
        &self,
        params: Option<&Value>,
        ctx: &CallContext,
    ) -> (Result<Value, RpcError>, Option<String>) {
        let Some(name) = params.and_then(|p| p.get("name")).and_then(Value::as_str) else {
            return (Err(RpcError::invalid_params("params.name must be a string")), None);
        };
        let tool = Some(name.to_string());
        let Some(arguments) = params
            .and_then(|p| p.get("arguments"))
            .filter(|a| a.is_object())
        else {
            return (
                Err(RpcError::invalid_params("params.arguments must be an object")),
                tool,
            );
        };

        let result = self.registry.call(name, arguments, ctx).map_err(|e| match e {
            DispatchError::ToolNotFound(name) => {
                RpcError::method_not_found(format!("Tool not found: {name}"))
            }
            DispatchError::Execution(message) => RpcError::internal(message),
        });
        (result, tool)
    }
}

fn parse_envelope(message: &Value) -> Result<Envelope<'_>, RpcError> {
    let obj: &Map<String, Value> = message
        .as_object()
        .ok_or_else(|| RpcError::invalid_request("Invalid Request: message must be an object"))?;

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(RpcError::invalid_request(
            "Invalid Request: jsonrpc must be \"2.0\"",
        ));
    }
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_request("Invalid Request: method must be a string"))?;

    Ok(Envelope {
        id: obj.get("id"),
        method,
        params: obj.get("params"),
    })
}
