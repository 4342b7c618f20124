use crate::tools::ToolDeclaration;
use serde_json::Value;

pub mod anthropic;

pub use anthropic::AnthropicClient;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("api key environment variable `{env}` is not set")]
    MissingApiKey { env: String },
    #[error("model request failed: {0}")]
    Transport(String),
    #[error("model endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response parse failure: {reason}")]
    ParseFailure { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the conversation as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    pub role: ModelRole,
    pub content: String,
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDeclaration>,
}

/// What the model decided for one step: a final answer for the caller, or a
/// request to invoke a named tool with the given arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDecision {
    FinalAnswer { text: String },
    ToolUse { name: String, input: Value },
}

/// The opaque model-call collaborator. Given the conversation so far and the
/// agent's tool declarations, returns the next decision. Implementations must
/// be safe to share across concurrently executing runs.
pub trait ModelProvider: Send + Sync {
    fn decide(&self, request: &ModelRequest) -> Result<ModelDecision, ProviderError>;
}
