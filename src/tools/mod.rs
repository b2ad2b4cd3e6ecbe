//! Tools the assistant can call mid-conversation

mod dispatcher;
mod schema;
mod weather;

use std::sync::Arc;

pub use dispatcher::{
    FailureKind, ToolCall, ToolDefinition, ToolDispatcher, ToolError, ToolFailure, ToolHandler,
    ToolResult,
};
pub use schema::{ArgumentSchema, FieldSpec, FieldType, SchemaViolation};
pub use weather::{WEATHER_TOOL, WeatherTool};

use crate::Result;
use crate::config::ToolsConfig;

/// Dispatcher with the built-in tools registered
///
/// # Errors
///
/// Returns error if a built-in tool cannot be constructed
pub fn default_dispatcher(config: &ToolsConfig) -> Result<Arc<ToolDispatcher>> {
    let mut dispatcher = ToolDispatcher::new(config.timeout);
    WeatherTool::new(&config.weather_url, config.timeout)?.register(&mut dispatcher)?;
    Ok(Arc::new(dispatcher))
}
