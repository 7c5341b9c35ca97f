//! Registry of tools the realtime model may call during a session.
//!
//! A tool is an injected capability: a name, a JSON schema advertised to
//! the model, and an async handler from arguments to a JSON result. The
//! registry knows nothing about what a handler actually does; dispatch
//! failures are returned as structured errors, never propagated as a
//! crash of the caller.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Dispatch failure, converted by the bridge into an error-shaped function
/// result so the model never stalls waiting for a reply.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// Schema advertised for one tool, in the realtime service's function
/// declaration shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// A `function`-kind schema with the given JSON-schema parameters.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".into(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

struct RegisteredTool {
    schema: ToolSchema,
    handler: ToolHandler,
}

/// Maps tool names to their schemas and handlers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its schema name; re-registering replaces the
    /// previous handler.
    pub fn register<F, Fut>(&mut self, schema: ToolSchema, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.tools
            .insert(schema.name.clone(), RegisteredTool { schema, handler });
    }

    /// Invokes the named tool with the given arguments.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tracing::debug!(tool = name, "Dispatching tool call");
        (tool.handler)(args).await
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Read-only listing of all registered schemas, for discovery and for
    /// the realtime session configuration.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
