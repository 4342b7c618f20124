mod agent_loop;
pub mod cancel;
pub mod context;
pub mod error;
pub mod run_store;

pub use cancel::{CancelRegistry, CancelToken};
pub use context::ExecutionContext;
pub use error::EngineError;
pub use run_store::{
    engine_database_path, AgentMessageRecord, AgentRunRecord, MessageRole, NewRun, RunListFilter,
    RunListPage, RunOutcome, RunStatus, RunStore, StoreError, ToolCallRecord, ToolCallStatus,
    TriggerKind,
};

use crate::config::{AgentCatalog, AgentConfig};
use crate::provider::ModelProvider;
use crate::shared::ids::{OrgId, ProjectId, UserId};
use crate::shared::logging::log_run_event;
use crate::shared::run_ids::generate_run_id;
use crate::shared::time::now_ms;
use crate::tools::ToolRegistry;
use agent_loop::{drive_run, LoopContext};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

const RUN_ID_MAX_GENERATION_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRunRequest {
    pub agent_id: String,
    pub org_id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub trigger: TriggerKind,
    pub input: String,
}

/// A run plus its full audit trail, ordered by seq.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunTrace {
    pub run: AgentRunRecord,
    pub messages: Vec<AgentMessageRecord>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// The run lifecycle surface: start, execute, cancel, get, list. One instance
/// is shared across worker threads; each run is driven by exactly one call to
/// [`AgentRunEngine::execute`].
pub struct AgentRunEngine {
    run_store: RunStore,
    agents: AgentCatalog,
    tools: ToolRegistry,
    provider: Arc<dyn ModelProvider>,
    cancel: Arc<CancelRegistry>,
    state_root: PathBuf,
}

impl AgentRunEngine {
    pub fn open(
        state_root: impl Into<PathBuf>,
        agents: AgentCatalog,
        tools: ToolRegistry,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<Self, EngineError> {
        let state_root = state_root.into();
        let run_store = RunStore::open(&engine_database_path(&state_root))?;
        run_store.ensure_schema()?;
        Ok(Self {
            run_store,
            agents,
            tools,
            provider,
            cancel: Arc::new(CancelRegistry::new()),
            state_root,
        })
    }

    pub fn run_store(&self) -> &RunStore {
        &self.run_store
    }

    pub fn cancellation(&self) -> Arc<CancelRegistry> {
        Arc::clone(&self.cancel)
    }

    fn resolve_agent(&self, agent_id: &str) -> Result<AgentConfig, EngineError> {
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| EngineError::UnknownAgent {
                agent_id: agent_id.to_string(),
            })?;
        if !agent.enabled {
            return Err(EngineError::AgentDisabled {
                agent_id: agent_id.to_string(),
            });
        }
        Ok(agent.clone())
    }

    fn allocate_run_id(&self, now: i64) -> Result<String, EngineError> {
        for _ in 0..RUN_ID_MAX_GENERATION_ATTEMPTS {
            let candidate = generate_run_id(now).map_err(EngineError::RunIdAllocation)?;
            if !self.run_store.run_exists(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(EngineError::RunIdAllocation(format!(
            "no unique run id after {RUN_ID_MAX_GENERATION_ATTEMPTS} attempts"
        )))
    }

    /// Creates a run in `queued`. Execution happens separately, on whichever
    /// worker calls [`AgentRunEngine::execute`].
    pub fn start(&self, request: &StartRunRequest) -> Result<AgentRunRecord, EngineError> {
        if request.input.trim().is_empty() {
            return Err(EngineError::EmptyInput);
        }
        OrgId::parse(&request.org_id).map_err(EngineError::InvalidIdentifier)?;
        UserId::parse(&request.user_id).map_err(EngineError::InvalidIdentifier)?;
        if let Some(project_id) = &request.project_id {
            ProjectId::parse(project_id).map_err(EngineError::InvalidIdentifier)?;
        }
        self.resolve_agent(&request.agent_id)?;

        let now = now_ms();
        let run_id = self.allocate_run_id(now)?;
        let run = self.run_store.create_run(
            &NewRun {
                run_id: run_id.clone(),
                agent_id: request.agent_id.clone(),
                org_id: request.org_id.clone(),
                project_id: request.project_id.clone(),
                user_id: request.user_id.clone(),
                trigger: request.trigger,
                input: request.input.clone(),
            },
            now,
        )?;
        log_run_event(
            &self.state_root,
            now,
            &run_id,
            &format!("run created (queued) agent={}", request.agent_id),
        );
        Ok(run)
    }

    /// Drives one run from its current state to a terminal state. Calling it
    /// on an already-terminal run returns the record unchanged.
    pub fn execute(&self, run_id: &str) -> Result<AgentRunRecord, EngineError> {
        let mut run = self.run_store.load_run(run_id)?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        let agent = self.resolve_agent(&run.agent_id)?;
        let token = self.cancel.token(run_id);

        if run.status == RunStatus::Queued {
            if token.is_cancelled() {
                let now = now_ms();
                self.run_store
                    .finish_run(&mut run, &RunOutcome::Cancelled, now)?;
                self.cancel.clear(run_id);
                log_run_event(&self.state_root, now, run_id, "cancelled while queued");
                return Ok(run);
            }
            match self.run_store.claim_run(&mut run) {
                Ok(()) => {
                    log_run_event(&self.state_root, now_ms(), run_id, "claimed (running)");
                }
                Err(StoreError::InvalidTransition { .. }) => {
                    // Lost the claim race, typically to a queued-run cancel.
                    let current = self.run_store.load_run(run_id)?;
                    if current.status.is_terminal() {
                        self.cancel.clear(run_id);
                        return Ok(current);
                    }
                    return Err(StoreError::InvalidTransition {
                        from: current.status,
                        to: RunStatus::Running,
                    }
                    .into());
                }
                Err(err) => return Err(err.into()),
            }
        }

        let loop_ctx = LoopContext {
            run_store: &self.run_store,
            tools: &self.tools,
            provider: self.provider.as_ref(),
            state_root: &self.state_root,
        };
        let outcome = drive_run(&loop_ctx, &mut run, &agent, &token);
        self.cancel.clear(run_id);

        match outcome {
            Ok(()) => Ok(run),
            Err(store_err) => self.recover_from_store_failure(run_id, store_err),
        }
    }

    /// A persistence failure escaped the loop. Try to leave the run in a
    /// terminal `failed` state; if the store cannot even do that, surface the
    /// original error.
    fn recover_from_store_failure(
        &self,
        run_id: &str,
        store_err: StoreError,
    ) -> Result<AgentRunRecord, EngineError> {
        let Ok(mut current) = self.run_store.load_run(run_id) else {
            return Err(store_err.into());
        };
        if current.status.is_terminal() {
            return Ok(current);
        }
        let now = now_ms();
        let error = format!("persistence failure: {store_err}");
        match self
            .run_store
            .finish_run(&mut current, &RunOutcome::Failed { error: error.clone() }, now)
        {
            Ok(()) => {
                log_run_event(&self.state_root, now, run_id, &error);
                Ok(current)
            }
            Err(_) => Err(store_err.into()),
        }
    }

    /// Cancels a run. Queued runs go terminal immediately and never execute;
    /// running runs get their token set and finish at the next step boundary;
    /// cancelling a terminal run is a no-op returning the unchanged record.
    pub fn cancel(&self, run_id: &str) -> Result<AgentRunRecord, EngineError> {
        let mut run = self.run_store.load_run(run_id)?;
        match run.status {
            status if status.is_terminal() => Ok(run),
            RunStatus::Queued => {
                let now = now_ms();
                match self.run_store.finish_run(&mut run, &RunOutcome::Cancelled, now) {
                    Ok(()) => {
                        self.cancel.clear(run_id);
                        log_run_event(&self.state_root, now, run_id, "cancelled while queued");
                        Ok(run)
                    }
                    Err(StoreError::InvalidTransition { .. }) => {
                        // A worker claimed the run first; fall back to the token.
                        self.cancel.request(run_id);
                        Ok(self.run_store.load_run(run_id)?)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            RunStatus::Running => {
                self.cancel.request(run_id);
                log_run_event(&self.state_root, now_ms(), run_id, "cancellation requested");
                Ok(run)
            }
            _ => Ok(run),
        }
    }

    pub fn get(&self, run_id: &str) -> Result<AgentRunTrace, EngineError> {
        let run = self.run_store.load_run(run_id)?;
        let messages = self.run_store.load_messages(run_id)?;
        let tool_calls = self.run_store.load_tool_calls(run_id)?;
        Ok(AgentRunTrace {
            run,
            messages,
            tool_calls,
        })
    }

    pub fn list(&self, filter: &RunListFilter) -> Result<RunListPage, EngineError> {
        Ok(self.run_store.list_runs(filter)?)
    }

    /// Runs `execute` on a dedicated thread, the one-worker-per-run model.
    /// Failures land in the engine log; the run record carries the outcome.
    pub fn spawn(engine: Arc<Self>, run_id: String) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            if let Err(err) = engine.execute(&run_id) {
                log_run_event(
                    &engine.state_root,
                    now_ms(),
                    &run_id,
                    &format!("detached execution failed: {err}"),
                );
            }
        })
    }
}
