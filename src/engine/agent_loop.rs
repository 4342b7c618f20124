use crate::config::AgentConfig;
use crate::engine::cancel::CancelToken;
use crate::engine::context::ExecutionContext;
use crate::engine::run_store::{
    AgentMessageRecord, AgentRunRecord, MessageRole, RunOutcome, RunStore, StoreError,
    ToolCallRecord, ToolCallStatus,
};
use crate::provider::{ModelDecision, ModelMessage, ModelProvider, ModelRequest, ModelRole};
use crate::shared::logging::log_run_event;
use crate::shared::time::now_ms;
use crate::tools::{validate_tool_input, ToolRegistry};
use serde_json::Value;
use std::path::Path;

pub(crate) struct LoopContext<'a> {
    pub run_store: &'a RunStore,
    pub tools: &'a ToolRegistry,
    pub provider: &'a dyn ModelProvider,
    pub state_root: &'a Path,
}

fn model_role(role: MessageRole) -> ModelRole {
    match role {
        MessageRole::User => ModelRole::User,
        MessageRole::Assistant => ModelRole::Assistant,
        MessageRole::Tool => ModelRole::Tool,
        MessageRole::System => ModelRole::System,
    }
}

/// Resolves, validates, and executes one model-proposed tool call. Every
/// failure mode here is recoverable: it becomes an error-status record and
/// the loop moves on.
fn dispatch_tool(
    tools: &ToolRegistry,
    name: &str,
    input: &Value,
    context: &ExecutionContext,
) -> Result<Value, String> {
    let Some(tool) = tools.resolve(name) else {
        return Err(format!("unknown tool: {name}"));
    };
    if let Err(violation) = validate_tool_input(&tool.input_schema(), input) {
        return Err(violation.to_string());
    }
    tool.execute(input, context).map_err(|err| err.to_string())
}

/// Drives a claimed run to a terminal state. Per-step errors are recorded in
/// the trail and the loop continues; a provider failure finishes the run as
/// failed. Only persistence failures escape as `Err` — the caller converts
/// those into a terminal failed state where the store still allows it.
pub(crate) fn drive_run(
    ctx: &LoopContext<'_>,
    run: &mut AgentRunRecord,
    agent: &AgentConfig,
    token: &CancelToken,
) -> Result<(), StoreError> {
    let context = ExecutionContext {
        run_id: run.run_id.clone(),
        project_id: run.project_id.clone(),
        org_id: run.org_id.clone(),
        user_id: run.user_id.clone(),
    };
    let declarations = ctx.tools.declarations_for(&agent.tools);

    // Seq allocation is owned here, in the run's single writer.
    let mut message_seq = ctx.run_store.next_message_seq(&run.run_id)?;
    if message_seq == 0 {
        ctx.run_store.append_message(&AgentMessageRecord {
            run_id: run.run_id.clone(),
            seq: 0,
            role: MessageRole::User,
            content: run.input.clone(),
            tool_name: None,
            created_at: now_ms(),
        })?;
        message_seq = 1;
    }
    let mut tool_seq = ctx.run_store.next_tool_call_seq(&run.run_id)?;

    for step in 1..=agent.max_steps {
        if token.is_cancelled() {
            let now = now_ms();
            ctx.run_store.finish_run(run, &RunOutcome::Cancelled, now)?;
            log_run_event(
                ctx.state_root,
                now,
                &run.run_id,
                &format!("cancelled before step {step}"),
            );
            return Ok(());
        }

        let messages = ctx.run_store.load_messages(&run.run_id)?;
        let request = ModelRequest {
            model: agent.model.clone(),
            system_prompt: agent.system_prompt.clone(),
            temperature: agent.temperature,
            messages: messages
                .iter()
                .map(|message| ModelMessage {
                    role: model_role(message.role),
                    content: message.content.clone(),
                    tool_name: message.tool_name.clone(),
                })
                .collect(),
            tools: declarations.clone(),
        };

        let decision = match ctx.provider.decide(&request) {
            Ok(decision) => decision,
            Err(err) => {
                let now = now_ms();
                let error = format!("model call failed on step {step}: {err}");
                ctx.run_store
                    .finish_run(run, &RunOutcome::Failed { error: error.clone() }, now)?;
                log_run_event(ctx.state_root, now, &run.run_id, &error);
                return Ok(());
            }
        };

        match decision {
            ModelDecision::FinalAnswer { text } => {
                let now = now_ms();
                ctx.run_store.append_message(&AgentMessageRecord {
                    run_id: run.run_id.clone(),
                    seq: message_seq,
                    role: MessageRole::Assistant,
                    content: text.clone(),
                    tool_name: None,
                    created_at: now,
                })?;
                ctx.run_store.finish_run(
                    run,
                    &RunOutcome::Succeeded {
                        result_summary: text,
                        result_payload: None,
                    },
                    now,
                )?;
                log_run_event(
                    ctx.state_root,
                    now,
                    &run.run_id,
                    &format!("succeeded on step {step}"),
                );
                return Ok(());
            }
            ModelDecision::ToolUse { name, input } => {
                let started_at = now_ms();
                let outcome = dispatch_tool(ctx.tools, &name, &input, &context);
                let finished_at = now_ms();

                let (status, output, error) = match outcome {
                    Ok(value) => (ToolCallStatus::Ok, Some(value), None),
                    Err(message) => (ToolCallStatus::Error, None, Some(message)),
                };
                ctx.run_store.append_tool_call(&ToolCallRecord {
                    run_id: run.run_id.clone(),
                    seq: tool_seq,
                    tool_name: name.clone(),
                    input,
                    output: output.clone(),
                    status,
                    error: error.clone(),
                    started_at,
                    finished_at,
                })?;
                tool_seq += 1;

                let content = match (&output, &error) {
                    (Some(value), _) => value.to_string(),
                    (None, Some(message)) => message.clone(),
                    (None, None) => String::new(),
                };
                ctx.run_store.append_message(&AgentMessageRecord {
                    run_id: run.run_id.clone(),
                    seq: message_seq,
                    role: MessageRole::Tool,
                    content,
                    tool_name: Some(name.clone()),
                    created_at: finished_at,
                })?;
                message_seq += 1;

                log_run_event(
                    ctx.state_root,
                    finished_at,
                    &run.run_id,
                    &format!("step {step} tool {name} {}", status.as_str()),
                );
            }
        }
    }

    let now = now_ms();
    let error = "step budget exhausted".to_string();
    ctx.run_store
        .finish_run(run, &RunOutcome::Failed { error: error.clone() }, now)?;
    log_run_event(
        ctx.state_root,
        now,
        &run.run_id,
        &format!("failed after {} steps: {error}", agent.max_steps),
    );
    Ok(())
}
