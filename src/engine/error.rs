use crate::engine::run_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("agent `{agent_id}` is not configured")]
    UnknownAgent { agent_id: String },
    #[error("agent `{agent_id}` is disabled")]
    AgentDisabled { agent_id: String },
    #[error("run input must be non-empty")]
    EmptyInput,
    #[error("invalid start request: {0}")]
    InvalidIdentifier(String),
    #[error("failed to allocate a run id: {0}")]
    RunIdAllocation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
