pub mod registry;
pub mod schema;

pub use registry::{RegistryError, ToolRegistry};
pub use schema::{validate_tool_input, SchemaViolation};

use crate::engine::context::ExecutionContext;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool input rejected: {0}")]
    InvalidInput(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Schema the model sees for one tool.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A named, schema-described, side-effecting capability. Implementations live
/// outside the engine (drawing search, RFI creation, submittal lookups); the
/// engine only resolves, validates, and dispatches them.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    fn execute(&self, input: &Value, context: &ExecutionContext) -> Result<Value, ToolError>;
}
