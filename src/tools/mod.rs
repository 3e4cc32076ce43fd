//! Tool registry and dispatcher.
//!
//! A [`Tool`] is a name, a description, a JSON Schema for its arguments and a
//! callback returning [`ToolResult`]. The [`Registry`] is built once at startup from
//! tool groups and shared by reference; [`Registry::call`] is the only way tools run,
//! and it contains any panic a callback raises.

pub mod context;
pub mod decisions;
pub mod insights;
pub mod plans;
pub mod threads;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

use crate::db::Store;
use crate::projects::Project;

/// Who is calling and against which tenant.
#[derive(Clone)]
pub struct CallContext {
    pub store: Store,
    pub project: Project,
    /// Caller-supplied agent identity, recorded as `created_by`.
    pub agent: Option<String>,
}

impl CallContext {
    pub fn new(store: Store, project: Project, agent: Option<String>) -> Self {
        Self {
            store,
            project,
            agent,
        }
    }
}

/// Successful tool payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Wrapped into a text content block.
    Text(String),
    /// Returned to the client as-is.
    Structured(Map<String, Value>),
}

/// `Err` carries a failure reason for the client.
pub type ToolResult = Result<ToolOutput, String>;

type Handler = Arc<dyn Fn(&Value, &CallContext) -> ToolResult + Send + Sync>;

#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: Handler,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl Fn(&Value, &CallContext) -> ToolResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
        }
    }

    /// A tool whose arguments deserialize into `P`; the input schema is derived from `P`.
    pub fn typed<P>(
        name: &str,
        description: &str,
        handler: fn(P, &CallContext) -> ToolResult,
    ) -> Self
    where
        P: DeserializeOwned + JsonSchema + 'static,
    {
        Self::new(name, description, input_schema::<P>(), move |args, ctx| {
            let params: P = serde_json::from_value(args.clone())
                .map_err(|e| format!("invalid arguments: {e}"))?;
            handler(params, ctx)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Catalog entry: everything about a tool except its callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool registered twice: {0}")]
    DuplicateTool(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("{0}")]
    Execution(String),
}

#[derive(Debug, Clone)]
pub struct Registry {
    tools: Vec<Tool>,
}

impl Registry {
    /// Concatenate tool groups in order. Duplicate names are a configuration error.
    pub fn new(groups: Vec<Vec<Tool>>) -> Result<Self, RegistryError> {
        let tools: Vec<Tool> = groups.into_iter().flatten().collect();
        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(RegistryError::DuplicateTool(tool.name.clone()));
            }
        }
        Ok(Self { tools })
    }

    /// Every tool this server ships.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(vec![
            context::tools(),
            decisions::tools(),
            insights::tools(),
            threads::tools(),
            plans::tools(),
        ])
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(Tool::descriptor).collect()
    }

    /// Run a tool and shape its payload for a `tools/call` result.
    pub fn call(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &CallContext,
    ) -> Result<Value, DispatchError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| DispatchError::ToolNotFound(name.to_string()))?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (tool.handler)(arguments, ctx)));
        match outcome {
            Ok(Ok(ToolOutput::Text(text))) => Ok(json!({
                "content": [{ "type": "text", "text": text }]
            })),
            Ok(Ok(ToolOutput::Structured(map))) => Ok(Value::Object(map)),
            Ok(Err(reason)) => {
                tracing::debug!(tool = name, reason = %reason, "tool returned failure");
                Err(DispatchError::Execution(reason))
            }
            Err(payload) => {
                let cause = panic_message(payload.as_ref());
                tracing::error!(tool = name, cause = %cause, "tool panicked");
                Err(DispatchError::Execution(format!(
                    "tool {name} failed unexpectedly"
                )))
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// JSON Schema for a params struct, as advertised in the catalog.
pub fn input_schema<P: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(P)).unwrap_or_else(|_| json!({"type": "object"}))
}

/// Serialize a payload as a structured result. Non-object values are wrapped as `{"value": ...}`.
pub fn structured<T: Serialize>(value: &T) -> ToolResult {
    match serde_json::to_value(value).map_err(|e| format!("serialization failed: {e}"))? {
        Value::Object(map) => Ok(ToolOutput::Structured(map)),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            Ok(ToolOutput::Structured(map))
        }
    }
}

/// Clamp a caller-supplied list limit.
pub(crate) fn list_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(20).clamp(1, 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects;

    fn ctx() -> CallContext {
        let store = Store::in_memory().unwrap();
        let project = projects::create(&store, "test", "Test").unwrap();
        CallContext::new(store, project, None)
    }

    fn tool(name: &str) -> Tool {
        Tool::new(name, "test tool", json!({"type": "object"}), |_, _| {
            Ok(ToolOutput::Text("ok".into()))
        })
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = Registry::new(vec![vec![tool("a"), tool("b")], vec![tool("a")]]).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("a".into()));
    }

    #[test]
    fn groups_keep_their_order() {
        let registry = Registry::new(vec![vec![tool("b"), tool("a")], vec![tool("c")]]).unwrap();
        let names: Vec<&str> = registry.tools().iter().map(Tool::name).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn builtin_catalog_is_unique_and_described() {
        let registry = Registry::builtin().unwrap();
        let catalog = registry.catalog();
        assert!(catalog.iter().any(|t| t.name == "claim_next_step"));
        assert!(catalog.iter().any(|t| t.name == "store_context"));
        for entry in &catalog {
            assert!(!entry.description.is_empty(), "{} lacks a description", entry.name);
            assert!(entry.input_schema.is_object(), "{} lacks a schema", entry.name);
        }
    }

    #[test]
    fn structured_output_passes_through() {
        let registry = Registry::new(vec![vec![Tool::new(
            "info",
            "structured",
            json!({}),
            |_, _| structured(&json!({"answer": 42})),
        )]])
        .unwrap();
        let result = registry.call("info", &json!({}), &ctx()).unwrap();
        assert_eq!(result, json!({"answer": 42}));
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let registry = Registry::new(vec![vec![tool("a")]]).unwrap();
        assert_eq!(
            registry.call("zzz", &json!({}), &ctx()),
            Err(DispatchError::ToolNotFound("zzz".into()))
        );
    }

    #[test]
    fn panicking_tool_is_contained() {
        let registry = Registry::new(vec![vec![
            Tool::new("explode", "panics", json!({}), |_, _| panic!("kaboom")),
            tool("fine"),
        ]])
        .unwrap();
        let ctx = ctx();

        let err = registry.call("explode", &json!({}), &ctx).unwrap_err();
        assert!(matches!(err, DispatchError::Execution(ref m) if m.contains("explode")));

        // The registry and the store keep working afterwards.
        assert!(registry.call("fine", &json!({}), &ctx).is_ok());
        assert!(projects::resolve(&ctx.store, "test").unwrap().is_some());
    }

    #[test]
    fn typed_tool_rejects_bad_arguments() {
        #[derive(serde::Deserialize, JsonSchema)]
        struct Params {
            count: u32,
        }
        fn handler(p: Params, _: &CallContext) -> ToolResult {
            Ok(ToolOutput::Text(p.count.to_string()))
        }
        let registry = Registry::new(vec![vec![Tool::typed::<Params>("count", "counts", handler)]]).unwrap();
        let ctx = ctx();

        let err = registry.call("count", &json!({"count": "many"}), &ctx).unwrap_err();
        assert!(matches!(err, DispatchError::Execution(ref m) if m.starts_with("invalid arguments")));
        assert_eq!(
            registry.call("count", &json!({"count": 3}), &ctx).unwrap(),
            json!({"content": [{"type": "text", "text": "3"}]})
        );
        let schema = &registry.catalog()[0].input_schema;
        assert!(schema["properties"]["count"].is_object());
    }
}
