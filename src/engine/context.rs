use serde::Serialize;

/// Scoping identifiers threaded into every tool invocation and persisted
/// record for one run. Cloned into each call; a tool can never widen its
/// scope by mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: String,
    pub project_id: Option<String>,
    pub org_id: String,
    pub user_id: String,
}
