use super::{ModelDecision, ModelProvider, ModelRequest, ModelRole, ProviderError};
use crate::config::ProviderSettings;
use serde_json::{json, Value};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages-API client. The engine only depends on the
/// [`ModelProvider`] trait; this is the one concrete implementation shipped
/// with the crate.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_base: String,
    api_key: String,
    request_timeout: Duration,
    max_output_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey {
                env: settings.api_key_env.clone(),
            })?;
        Ok(Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key,
            request_timeout: Duration::from_secs(settings.request_timeout_seconds),
            max_output_tokens: settings.max_output_tokens,
        })
    }
}

/// Anthropic has no tool-role turn; persisted tool outcomes are folded back
/// into user turns, and system-role entries into the system parameter.
pub fn build_messages_body(request: &ModelRequest, max_output_tokens: u32) -> Value {
    let mut system = request.system_prompt.clone();
    let mut messages = Vec::new();

    for message in &request.messages {
        match message.role {
            ModelRole::System => {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&message.content);
            }
            ModelRole::User => {
                messages.push(json!({ "role": "user", "content": message.content }));
            }
            ModelRole::Assistant => {
                messages.push(json!({ "role": "assistant", "content": message.content }));
            }
            ModelRole::Tool => {
                let tool_name = message.tool_name.as_deref().unwrap_or("tool");
                messages.push(json!({
                    "role": "user",
                    "content": format!("[{tool_name} result]\n{}", message.content),
                }));
            }
        }
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": max_output_tokens,
        "system": system,
        "temperature": request.temperature,
        "messages": messages,
    });

    if !request.tools.is_empty() {
        let declarations = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect::<Vec<_>>();
        body["tools"] = Value::Array(declarations);
    }

    body
}

pub fn parse_decision(body: &Value) -> Result<ModelDecision, ProviderError> {
    let content = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::ParseFailure {
            reason: "response is missing the content array".to_string(),
        })?;

    let mut text_lines = Vec::new();
    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("tool_use") => {
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProviderError::ParseFailure {
                        reason: "tool_use block is missing a name".to_string(),
                    })?
                    .to_string();
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                return Ok(ModelDecision::ToolUse { name, input });
            }
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        text_lines.push(trimmed.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if text_lines.is_empty() {
        return Err(ProviderError::ParseFailure {
            reason: "response contained no text or tool_use blocks".to_string(),
        });
    }
    Ok(ModelDecision::FinalAnswer {
        text: text_lines.join("\n"),
    })
}

impl ModelProvider for AnthropicClient {
    fn decide(&self, request: &ModelRequest) -> Result<ModelDecision, ProviderError> {
        let url = format!("{}/v1/messages", self.api_base);
        let body = build_messages_body(request, self.max_output_tokens);

        let response = ureq::post(&url)
            .timeout(self.request_timeout)
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .send_json(body);

        match response {
            Ok(response) => {
                let parsed: Value =
                    response
                        .into_json()
                        .map_err(|err| ProviderError::ParseFailure {
                            reason: format!("invalid response json: {err}"),
                        })?;
                parse_decision(&parsed)
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(ProviderError::Status { status, body })
            }
            Err(err) => Err(ProviderError::Transport(err.to_string())),
        }
    }
}
