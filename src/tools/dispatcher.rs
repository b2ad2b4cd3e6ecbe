//! Tool registry and dispatch
//!
//! Every dispatch ends in either a `ToolResult` or a `ToolFailure`; handler
//! errors, timeouts and panics are all turned into failures the conversation
//! can speak about.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::schema::{ArgumentSchema, SchemaViolation};
use crate::{Error, Result};

/// A function invocation requested by the conversational engine
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Correlation id linking the call to its result
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    /// Conversational turn that requested the call
    pub turn_id: u64,
}

/// Successful tool output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub output: String,
}

/// Category of a failed dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    InvalidArguments,
    Handler,
    Timeout,
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownTool => "unknown tool",
            Self::InvalidArguments => "invalid arguments",
            Self::Handler => "handler failed",
            Self::Timeout => "timed out",
            Self::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// A failed dispatch, delivered back into the conversation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tool {tool} {kind}: {reason}")]
pub struct ToolFailure {
    pub call_id: String,
    pub tool: String,
    pub kind: FailureKind,
    /// Human-readable explanation
    pub reason: String,
}

impl ToolFailure {
    fn new(call: &ToolCall, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool: call.name.clone(),
            kind,
            reason: reason.into(),
        }
    }

    /// Failure-shaped output for the model
    #[must_use]
    pub fn to_model_output(&self) -> String {
        json!({
            "error": {
                "kind": self.kind,
                "message": format!("The {} tool failed: {}", self.tool, self.reason),
            }
        })
        .to_string()
    }
}

/// Errors a tool handler can report
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// An outbound service answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Outbound request could not be completed
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{0}")]
    Failed(String),
}

/// Executes one tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run with arguments already validated against the tool's schema
    async fn call(&self, arguments: Value) -> std::result::Result<String, ToolError>;
}

/// Declaration of a tool for the conversational engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

struct RegisteredTool {
    description: String,
    schema: ArgumentSchema,
    handler: Arc<dyn ToolHandler>,
}

/// Name → handler registry with schema validation and a per-call timeout
pub struct ToolDispatcher {
    tools: HashMap<String, RegisteredTool>,
    timeout: Duration,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            timeout,
        }
    }

    /// Register a tool
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` if the name is empty or already registered
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        schema: ArgumentSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::Tool("tool name must not be empty".to_string()));
        }
        if self.tools.contains_key(name) {
            return Err(Error::Tool(format!("tool already registered: {name}")));
        }
        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                description: description.to_string(),
                schema,
                handler,
            },
        );
        tracing::debug!(tool = name, "tool registered");
        Ok(())
    }

    /// Definitions of every registered tool, sorted by name
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|(name, tool)| ToolDefinition {
                name: name.clone(),
                description: tool.description.clone(),
                parameters: tool.schema.to_json_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Validate and execute one call
    ///
    /// Arguments that violate the schema fail without running the handler.
    ///
    /// # Errors
    ///
    /// Returns a `ToolFailure` for an unknown tool, invalid arguments, a
    /// handler error, a timeout, or a handler panic
    pub async fn dispatch(&self, call: ToolCall) -> std::result::Result<ToolResult, ToolFailure> {
        let tool = self.tools.get(&call.name).ok_or_else(|| {
            ToolFailure::new(&call, FailureKind::UnknownTool, format!("no tool named {}", call.name))
        })?;

        tool.schema
            .validate(&call.arguments)
            .map_err(|v: SchemaViolation| ToolFailure::new(&call, FailureKind::InvalidArguments, v.to_string()))?;

        tracing::info!(tool = %call.name, call_id = %call.call_id, "executing tool");

        let handler = Arc::clone(&tool.handler);
        let arguments = call.arguments.clone();
        let task = tokio::spawn(async move { handler.call(arguments).await });
        let abort = task.abort_handle();

        let joined = match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                tracing::warn!(tool = %call.name, call_id = %call.call_id, "tool timed out");
                return Err(ToolFailure::new(
                    &call,
                    FailureKind::Timeout,
                    format!("no result within {} seconds", self.timeout.as_secs_f32()),
                ));
            }
        };

        match joined {
            Ok(Ok(output)) => Ok(ToolResult {
                call_id: call.call_id,
                tool: call.name,
                output,
            }),
            Ok(Err(e)) => {
                tracing::warn!(tool = %call.name, call_id = %call.call_id, error = %e, "tool failed");
                Err(ToolFailure::new(&call, FailureKind::Handler, e.to_string()))
            }
            Err(e) => {
                tracing::error!(tool = %call.name, call_id = %call.call_id, error = %e, "tool panicked");
                Err(ToolFailure::new(&call, FailureKind::Panicked, "the tool crashed"))
            }
        }
    }
}
