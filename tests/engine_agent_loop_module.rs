use planwright::config::{AgentCatalog, AgentConfig};
use planwright::engine::{
    AgentRunEngine, EngineError, ExecutionContext, MessageRole, RunStatus, StartRunRequest,
    ToolCallStatus, TriggerKind,
};
use planwright::provider::{ModelDecision, ModelProvider, ModelRequest, ProviderError};
use planwright::shared::ids::AgentId;
use planwright::tools::{Tool, ToolError, ToolRegistry};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

struct ScriptedProvider {
    decisions: Mutex<VecDeque<Result<ModelDecision, ProviderError>>>,
}

impl ScriptedProvider {
    fn new(decisions: Vec<Result<ModelDecision, ProviderError>>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
        }
    }
}

impl ModelProvider for ScriptedProvider {
    fn decide(&self, _request: &ModelRequest) -> Result<ModelDecision, ProviderError> {
        self.decisions
            .lock()
            .expect("lock decisions")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::ParseFailure {
                    reason: "script exhausted".to_string(),
                })
            })
    }
}

struct SearchDrawingsTool;

impl Tool for SearchDrawingsTool {
    fn name(&self) -> &str {
        "search_drawings"
    }

    fn description(&self) -> &str {
        "Search the project drawing register"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    fn execute(&self, input: &Value, _context: &ExecutionContext) -> Result<Value, ToolError> {
        Ok(json!({ "matches": ["S-201"], "query": input["query"] }))
    }
}

struct BrokenPlotterTool;

impl Tool for BrokenPlotterTool {
    fn name(&self) -> &str {
        "send_to_plotter"
    }

    fn description(&self) -> &str {
        "Send a sheet to the site plotter"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn execute(&self, _input: &Value, _context: &ExecutionContext) -> Result<Value, ToolError> {
        Err(ToolError::Execution("plotter is offline".to_string()))
    }
}

/// Captures the context each invocation received, for scope assertions.
#[derive(Default)]
struct RecordingTool {
    contexts: Mutex<Vec<ExecutionContext>>,
}

impl Tool for RecordingTool {
    fn name(&self) -> &str {
        "record_context"
    }

    fn description(&self) -> &str {
        "Records its execution context"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn execute(&self, _input: &Value, context: &ExecutionContext) -> Result<Value, ToolError> {
        self.contexts
            .lock()
            .expect("lock contexts")
            .push(context.clone());
        Ok(json!({ "recorded": true }))
    }
}

fn catalog(max_steps: u32, tools: &[&str]) -> AgentCatalog {
    let mut agents = BTreeMap::new();
    agents.insert(
        AgentId::parse("drawings_assistant").expect("agent id"),
        AgentConfig {
            model: "claude-sonnet-4-5".to_string(),
            system_prompt: "You help field engineers find documents.".to_string(),
            temperature: 0.0,
            max_steps,
            tools: tools.iter().map(|name| name.to_string()).collect(),
            enabled: true,
        },
    );
    AgentCatalog::new(agents)
}

fn start_request(input: &str) -> StartRunRequest {
    StartRunRequest {
        agent_id: "drawings_assistant".to_string(),
        org_id: "org-1".to_string(),
        user_id: "user-7".to_string(),
        project_id: Some("proj-12".to_string()),
        trigger: TriggerKind::Api,
        input: input.to_string(),
    }
}

fn engine_with(
    state_root: &std::path::Path,
    agents: AgentCatalog,
    registry: ToolRegistry,
    decisions: Vec<Result<ModelDecision, ProviderError>>,
) -> AgentRunEngine {
    AgentRunEngine::open(
        state_root,
        agents,
        registry,
        Arc::new(ScriptedProvider::new(decisions)),
    )
    .expect("open engine")
}

#[test]
fn tool_step_then_final_answer_succeeds_with_full_trace() {
    let temp = tempdir().expect("tempdir");
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(SearchDrawingsTool))
        .expect("register tool");

    let engine = engine_with(
        temp.path(),
        catalog(3, &["search_drawings"]),
        registry,
        vec![
            Ok(ModelDecision::ToolUse {
                name: "search_drawings".to_string(),
                input: json!({ "query": "S-201" }),
            }),
            Ok(ModelDecision::FinalAnswer {
                text: "Sheet S-201 rev C is current.".to_string(),
            }),
        ],
    );

    let run = engine
        .start(&start_request("find the latest structural drawings"))
        .expect("start run");
    assert_eq!(run.status, RunStatus::Queued);
    assert!(run.finished_at.is_none());

    let finished = engine.execute(&run.run_id).expect("execute run");
    assert_eq!(finished.status, RunStatus::Succeeded);
    assert!(finished.finished_at.is_some());
    assert!(finished.latency_ms.is_some());
    assert_eq!(
        finished.result_summary.as_deref(),
        Some("Sheet S-201 rev C is current.")
    );

    let trace = engine.get(&run.run_id).expect("trace");
    assert_eq!(trace.tool_calls.len(), 1);
    assert_eq!(trace.tool_calls[0].status, ToolCallStatus::Ok);
    assert_eq!(trace.tool_calls[0].seq, 0);
    assert_eq!(trace.tool_calls[0].tool_name, "search_drawings");
    assert!(trace.tool_calls[0].finished_at >= trace.tool_calls[0].started_at);

    let roles = trace
        .messages
        .iter()
        .map(|message| message.role)
        .collect::<Vec<_>>();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Tool, MessageRole::Assistant]
    );
    let seqs = trace.messages.iter().map(|m| m.seq).collect::<Vec<_>>();
    assert_eq!(seqs, vec![0, 1, 2]);
    assert_eq!(
        trace.messages[1].tool_name.as_deref(),
        Some("search_drawings")
    );
}

#[test]
fn exhausting_the_step_budget_fails_the_run() {
    let temp = tempdir().expect("tempdir");
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(SearchDrawingsTool))
        .expect("register tool");

    let tool_use = || {
        Ok(ModelDecision::ToolUse {
            name: "search_drawings".to_string(),
            input: json!({ "query": "S-201" }),
        })
    };
    let engine = engine_with(
        temp.path(),
        catalog(2, &["search_drawings"]),
        registry,
        vec![tool_use(), tool_use()],
    );

    let run = engine.start(&start_request("keep digging")).expect("start");
    let finished = engine.execute(&run.run_id).expect("execute");
    assert_eq!(finished.status, RunStatus::Failed);
    assert_eq!(finished.error.as_deref(), Some("step budget exhausted"));
    assert!(finished.finished_at.is_some());

    let trace = engine.get(&run.run_id).expect("trace");
    assert_eq!(trace.tool_calls.len(), 2);
    assert_eq!(
        trace.tool_calls.iter().map(|c| c.seq).collect::<Vec<_>>(),
        vec![0, 1]
    );
}

#[test]
fn unknown_tool_is_recorded_and_the_loop_continues() {
    let temp = tempdir().expect("tempdir");
    let registry = ToolRegistry::new();

    let engine = engine_with(
        temp.path(),
        catalog(3, &[]),
        registry,
        vec![
            Ok(ModelDecision::ToolUse {
                name: "fly_drone".to_string(),
                input: json!({ "site": "north" }),
            }),
            Ok(ModelDecision::FinalAnswer {
                text: "No drone available; inspected manually.".to_string(),
            }),
        ],
    );

    let run = engine.start(&start_request("survey the site")).expect("start");
    let finished = engine.execute(&run.run_id).expect("execute");
    assert_eq!(finished.status, RunStatus::Succeeded);

    let trace = engine.get(&run.run_id).expect("trace");
    assert_eq!(trace.tool_calls.len(), 1);
    assert_eq!(trace.tool_calls[0].status, ToolCallStatus::Error);
    assert_eq!(
        trace.tool_calls[0].error.as_deref(),
        Some("unknown tool: fly_drone")
    );
    assert!(trace.tool_calls[0].output.is_none());
}

#[test]
fn a_failing_tool_does_not_abort_the_run() {
    let temp = tempdir().expect("tempdir");
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(BrokenPlotterTool))
        .expect("register tool");

    let engine = engine_with(
        temp.path(),
        catalog(3, &["send_to_plotter"]),
        registry,
        vec![
            Ok(ModelDecision::ToolUse {
                name: "send_to_plotter".to_string(),
                input: json!({}),
            }),
            Ok(ModelDecision::FinalAnswer {
                text: "Plotting failed; emailed the sheet instead.".to_string(),
            }),
        ],
    );

    let run = engine.start(&start_request("plot sheet S-201")).expect("start");
    let finished = engine.execute(&run.run_id).expect("execute");
    assert_eq!(finished.status, RunStatus::Succeeded);

    let trace = engine.get(&run.run_id).expect("trace");
    assert_eq!(trace.tool_calls.len(), 1);
    assert_eq!(trace.tool_calls[0].status, ToolCallStatus::Error);
    let error = trace.tool_calls[0].error.as_deref().expect("error recorded");
    assert!(error.contains("plotter is offline"));

    // The failure is visible to the next model call as a tool-role message.
    assert_eq!(trace.messages[1].role, MessageRole::Tool);
    assert!(trace.messages[1].content.contains("plotter is offline"));
}

#[test]
fn schema_invalid_input_is_a_recorded_error_not_a_crash() {
    let temp = tempdir().expect("tempdir");
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(SearchDrawingsTool))
        .expect("register tool");

    let engine = engine_with(
        temp.path(),
        catalog(3, &["search_drawings"]),
        registry,
        vec![
            Ok(ModelDecision::ToolUse {
                name: "search_drawings".to_string(),
                input: json!({ "discipline": "structural" }),
            }),
            Ok(ModelDecision::FinalAnswer {
                text: "Could not search without a query.".to_string(),
            }),
        ],
    );

    let run = engine.start(&start_request("find drawings")).expect("start");
    let finished = engine.execute(&run.run_id).expect("execute");
    assert_eq!(finished.status, RunStatus::Succeeded);

    let trace = engine.get(&run.run_id).expect("trace");
    assert_eq!(trace.tool_calls.len(), 1);
    assert_eq!(trace.tool_calls[0].status, ToolCallStatus::Error);
    assert!(trace.tool_calls[0]
        .error
        .as_deref()
        .expect("error recorded")
        .contains("missing required field `query`"));
}

#[test]
fn model_call_failure_is_run_fatal_with_the_error_preserved() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_with(
        temp.path(),
        catalog(3, &[]),
        ToolRegistry::new(),
        vec![Err(ProviderError::Transport("connection reset".to_string()))],
    );

    let run = engine.start(&start_request("summarize RFIs")).expect("start");
    let finished = engine.execute(&run.run_id).expect("execute");
    assert_eq!(finished.status, RunStatus::Failed);
    let error = finished.error.as_deref().expect("error preserved");
    assert!(error.contains("model call failed on step 1"));
    assert!(error.contains("connection reset"));
    assert!(finished.finished_at.is_some());
}

#[test]
fn tools_receive_the_run_scoped_execution_context() {
    let temp = tempdir().expect("tempdir");
    let recorder = Arc::new(RecordingTool::default());
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::clone(&recorder) as Arc<dyn Tool>)
        .expect("register tool");

    let engine = engine_with(
        temp.path(),
        catalog(2, &["record_context"]),
        registry,
        vec![
            Ok(ModelDecision::ToolUse {
                name: "record_context".to_string(),
                input: json!({}),
            }),
            Ok(ModelDecision::FinalAnswer {
                text: "done".to_string(),
            }),
        ],
    );

    let run = engine.start(&start_request("check scope")).expect("start");
    engine.execute(&run.run_id).expect("execute");

    let contexts = recorder.contexts.lock().expect("lock contexts");
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].run_id, run.run_id);
    assert_eq!(contexts[0].org_id, "org-1");
    assert_eq!(contexts[0].project_id.as_deref(), Some("proj-12"));
    assert_eq!(contexts[0].user_id, "user-7");
}

#[test]
fn executing_a_terminal_run_returns_it_unchanged() {
    let temp = tempdir().expect("tempdir");
    let engine = engine_with(
        temp.path(),
        catalog(3, &[]),
        ToolRegistry::new(),
        vec![Ok(ModelDecision::FinalAnswer {
            text: "done".to_string(),
        })],
    );

    let run = engine.start(&start_request("quick answer")).expect("start");
    let first = engine.execute(&run.run_id).expect("first execute");
    assert_eq!(first.status, RunStatus::Succeeded);

    // The script is exhausted; a second drive would fail if it ran at all.
    let second = engine.execute(&run.run_id).expect("second execute");
    assert_eq!(second, first);
}

#[test]
fn start_rejects_empty_input_and_unknown_or_disabled_agents() {
    let temp = tempdir().expect("tempdir");
    let mut agents = BTreeMap::new();
    agents.insert(
        AgentId::parse("drawings_assistant").expect("agent id"),
        AgentConfig {
            model: "claude-sonnet-4-5".to_string(),
            system_prompt: "prompt".to_string(),
            temperature: 0.0,
            max_steps: 3,
            tools: Vec::new(),
            enabled: true,
        },
    );
    agents.insert(
        AgentId::parse("retired_assistant").expect("agent id"),
        AgentConfig {
            model: "claude-sonnet-4-5".to_string(),
            system_prompt: "prompt".to_string(),
            temperature: 0.0,
            max_steps: 3,
            tools: Vec::new(),
            enabled: false,
        },
    );
    let engine = engine_with(
        temp.path(),
        AgentCatalog::new(agents),
        ToolRegistry::new(),
        Vec::new(),
    );

    let err = engine
        .start(&start_request("   "))
        .expect_err("blank input must fail");
    assert!(matches!(err, EngineError::EmptyInput));

    let mut request = start_request("hello");
    request.agent_id = "nobody".to_string();
    let err = engine
        .start(&request)
        .expect_err("unknown agent must fail");
    assert!(matches!(err, EngineError::UnknownAgent { .. }));

    request.agent_id = "retired_assistant".to_string();
    let err = engine
        .start(&request)
        .expect_err("disabled agent must fail");
    assert!(matches!(err, EngineError::AgentDisabled { .. }));

    let mut request = start_request("hello");
    request.org_id = "org 1".to_string();
    let err = engine
        .start(&request)
        .expect_err("malformed org id must fail");
    assert!(matches!(err, EngineError::InvalidIdentifier(_)));
}
