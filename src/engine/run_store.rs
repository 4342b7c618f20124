use crate::shared::ids::validate_identifier_value;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const MAX_LIST_LIMIT: usize = 50;
pub const DEFAULT_LIST_LIMIT: usize = 20;

pub fn engine_database_path(state_root: &Path) -> PathBuf {
    state_root.join("runs/engine.sqlite3")
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create run database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("json encoding failed: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },
    #[error("agent run `{run_id}` not found")]
    UnknownRun { run_id: String },
    #[error("run state transition `{from}` -> `{to}` is invalid")]
    InvalidTransition { from: RunStatus, to: RunStatus },
    #[error("run `{run_id}` is terminal ({status}); no further records may be appended")]
    TerminalAppend { run_id: String, status: RunStatus },
    #[error("seq {seq} is already allocated for run `{run_id}`")]
    SequenceConflict { run_id: String, seq: i64 },
    #[error("invalid run status `{value}` in database")]
    InvalidStatus { value: String },
    #[error("invalid trigger kind `{value}` in database")]
    InvalidTrigger { value: String },
    #[error("invalid message role `{value}` in database")]
    InvalidRole { value: String },
    #[error("invalid tool call status `{value}` in database")]
    InvalidCallStatus { value: String },
    #[error("invalid list cursor `{raw}`")]
    InvalidCursor { raw: String },
}

fn sql_error(source: rusqlite::Error) -> StoreError {
    StoreError::Sql { source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Running)
                | (RunStatus::Queued, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Succeeded)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Interactive,
    Api,
    Scheduled,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Interactive => "interactive",
            TriggerKind::Api => "api",
            TriggerKind::Scheduled => "scheduled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "interactive" => Ok(Self::Interactive),
            "api" => Ok(Self::Api),
            "scheduled" => Ok(Self::Scheduled),
            other => Err(StoreError::InvalidTrigger {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            "system" => Ok(Self::System),
            other => Err(StoreError::InvalidRole {
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Ok,
    Error,
}

impl ToolCallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolCallStatus::Ok => "ok",
            ToolCallStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            other => Err(StoreError::InvalidCallStatus {
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunRecord {
    pub run_id: String,
    pub agent_id: String,
    pub org_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub user_id: String,
    pub trigger: TriggerKind,
    pub input: String,
    pub status: RunStatus,
    pub started_at: i64,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub result_payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessageRecord {
    pub run_id: String,
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub run_id: String,
    pub seq: i64,
    pub tool_name: String,
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    pub status: ToolCallStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: i64,
    pub finished_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub run_id: String,
    pub agent_id: String,
    pub org_id: String,
    pub project_id: Option<String>,
    pub user_id: String,
    pub trigger: TriggerKind,
    pub input: String,
}

/// Terminal outcome of a run; carries exactly the fields the terminal status
/// is allowed to set.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded {
        result_summary: String,
        result_payload: Option<Value>,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Succeeded { .. } => RunStatus::Succeeded,
            RunOutcome::Failed { .. } => RunStatus::Failed,
            RunOutcome::Cancelled => RunStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunListFilter {
    pub org_id: String,
    pub agent_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<RunStatus>,
    pub cursor: Option<String>,
    pub limit: usize,
}

impl RunListFilter {
    pub fn for_org(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            agent_id: None,
            project_id: None,
            status: None,
            cursor: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListPage {
    pub items: Vec<AgentRunRecord>,
    pub next_cursor: Option<String>,
}

pub fn encode_cursor(started_at: i64, run_id: &str) -> String {
    format!("{started_at}:{run_id}")
}

pub fn decode_cursor(raw: &str) -> Result<(i64, String), StoreError> {
    let invalid = || StoreError::InvalidCursor {
        raw: raw.to_string(),
    };
    let (ts, run_id) = raw.split_once(':').ok_or_else(invalid)?;
    let started_at = ts.parse::<i64>().map_err(|_| invalid())?;
    validate_identifier_value("run id", run_id).map_err(|_| invalid())?;
    Ok((started_at, run_id.to_string()))
}

/// Sqlite-backed store for runs and their audit trail. One connection per
/// operation; each run has a single in-process writer, so per-run `seq`
/// monotonicity is enforced by that writer plus the composite primary keys.
#[derive(Debug, Clone)]
pub struct RunStore {
    db_path: PathBuf,
}

impl RunStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let store = Self {
            db_path: db_path.to_path_buf(),
        };

        // Fail fast if the path is not openable.
        let _ = store.connect()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        Connection::open(&self.db_path).map_err(|source| StoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS agent_runs (
                    run_id TEXT PRIMARY KEY,
                    agent_id TEXT NOT NULL,
                    org_id TEXT NOT NULL,
                    project_id TEXT,
                    user_id TEXT NOT NULL,
                    trigger_kind TEXT NOT NULL,
                    input TEXT NOT NULL,
                    status TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    finished_at INTEGER,
                    latency_ms INTEGER,
                    error TEXT,
                    result_summary TEXT,
                    result_payload TEXT
                );

                CREATE TABLE IF NOT EXISTS agent_messages (
                    run_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    tool_name TEXT,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (run_id, seq)
                );

                CREATE TABLE IF NOT EXISTS tool_calls (
                    run_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    tool_name TEXT NOT NULL,
                    input TEXT NOT NULL,
                    output TEXT,
                    status TEXT NOT NULL,
                    error TEXT,
                    started_at INTEGER NOT NULL,
                    finished_at INTEGER NOT NULL,
                    PRIMARY KEY (run_id, seq)
                );

                CREATE INDEX IF NOT EXISTS idx_agent_runs_org_started
                    ON agent_runs(org_id, started_at DESC, run_id DESC);
                ",
            )
            .map_err(sql_error)
    }

    pub fn run_exists(&self, run_id: &str) -> Result<bool, StoreError> {
        let connection = self.connect()?;
        connection
            .query_row(
                "SELECT 1 FROM agent_runs WHERE run_id = ?1",
                params![run_id],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(sql_error)
    }

    pub fn create_run(&self, new_run: &NewRun, now: i64) -> Result<AgentRunRecord, StoreError> {
        let run = AgentRunRecord {
            run_id: new_run.run_id.clone(),
            agent_id: new_run.agent_id.clone(),
            org_id: new_run.org_id.clone(),
            project_id: new_run.project_id.clone(),
            user_id: new_run.user_id.clone(),
            trigger: new_run.trigger,
            input: new_run.input.clone(),
            status: RunStatus::Queued,
            started_at: now,
            finished_at: None,
            latency_ms: None,
            error: None,
            result_summary: None,
            result_payload: None,
        };

        let connection = self.connect()?;
        connection
            .execute(
                "INSERT INTO agent_runs (
                    run_id, agent_id, org_id, project_id, user_id,
                    trigger_kind, input, status, started_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.run_id,
                    run.agent_id,
                    run.org_id,
                    run.project_id,
                    run.user_id,
                    run.trigger.as_str(),
                    run.input,
                    run.status.as_str(),
                    run.started_at,
                ],
            )
            .map_err(sql_error)?;
        Ok(run)
    }

    pub fn load_run(&self, run_id: &str) -> Result<AgentRunRecord, StoreError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                "SELECT run_id, agent_id, org_id, project_id, user_id, trigger_kind,
                        input, status, started_at, finished_at, latency_ms, error,
                        result_summary, result_payload
                 FROM agent_runs WHERE run_id = ?1",
                params![run_id],
                raw_run_from_row,
            )
            .optional()
            .map_err(sql_error)?;
        match row {
            Some(raw) => run_from_raw(raw),
            None => Err(StoreError::UnknownRun {
                run_id: run_id.to_string(),
            }),
        }
    }

    /// Claims a queued run for execution. The conditional update makes a lost
    /// race (a concurrent cancel of the queued run) surface as an invalid
    /// transition instead of silently overwriting the terminal state.
    pub fn claim_run(&self, run: &mut AgentRunRecord) -> Result<(), StoreError> {
        if !run.status.can_transition_to(RunStatus::Running) {
            return Err(StoreError::InvalidTransition {
                from: run.status,
                to: RunStatus::Running,
            });
        }
        let connection = self.connect()?;
        let changed = connection
            .execute(
                "UPDATE agent_runs SET status = ?1
                 WHERE run_id = ?2 AND status = ?3",
                params![
                    RunStatus::Running.as_str(),
                    run.run_id,
                    RunStatus::Queued.as_str()
                ],
            )
            .map_err(sql_error)?;
        if changed == 0 {
            let current = self.load_run(&run.run_id)?;
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: RunStatus::Running,
            });
        }
        run.status = RunStatus::Running;
        Ok(())
    }

    /// Moves a run to its terminal state and sets `finished_at`, the computed
    /// latency, and the outcome fields in one conditional update.
    pub fn finish_run(
        &self,
        run: &mut AgentRunRecord,
        outcome: &RunOutcome,
        now: i64,
    ) -> Result<(), StoreError> {
        let next = outcome.status();
        if !run.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: run.status,
                to: next,
            });
        }

        let (error, result_summary, result_payload) = match outcome {
            RunOutcome::Succeeded {
                result_summary,
                result_payload,
            } => (None, Some(result_summary.clone()), result_payload.clone()),
            RunOutcome::Failed { error } => (Some(error.clone()), None, None),
            RunOutcome::Cancelled => (None, None, None),
        };
        let payload_text = result_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| StoreError::Json { source })?;
        let latency_ms = now.saturating_sub(run.started_at);

        let connection = self.connect()?;
        let changed = connection
            .execute(
                "UPDATE agent_runs
                 SET status = ?1, finished_at = ?2, latency_ms = ?3,
                     error = ?4, result_summary = ?5, result_payload = ?6
                 WHERE run_id = ?7 AND status = ?8",
                params![
                    next.as_str(),
                    now,
                    latency_ms,
                    error,
                    result_summary,
                    payload_text,
                    run.run_id,
                    run.status.as_str(),
                ],
            )
            .map_err(sql_error)?;
        if changed == 0 {
            let current = self.load_run(&run.run_id)?;
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        run.status = next;
        run.finished_at = Some(now);
        run.latency_ms = Some(latency_ms);
        run.error = error;
        run.result_summary = result_summary;
        run.result_payload = result_payload;
        Ok(())
    }

    fn guard_appendable(&self, connection: &Connection, run_id: &str) -> Result<(), StoreError> {
        let status = connection
            .query_row(
                "SELECT status FROM agent_runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(sql_error)?;
        let Some(status) = status else {
            return Err(StoreError::UnknownRun {
                run_id: run_id.to_string(),
            });
        };
        let status = RunStatus::parse(&status)?;
        if status.is_terminal() {
            return Err(StoreError::TerminalAppend {
                run_id: run_id.to_string(),
                status,
            });
        }
        Ok(())
    }

    fn map_insert_conflict(err: rusqlite::Error, run_id: &str, seq: i64) -> StoreError {
        match err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::SequenceConflict {
                    run_id: run_id.to_string(),
                    seq,
                }
            }
            other => sql_error(other),
        }
    }

    pub fn append_message(&self, message: &AgentMessageRecord) -> Result<(), StoreError> {
        let connection = self.connect()?;
        self.guard_appendable(&connection, &message.run_id)?;
        connection
            .execute(
                "INSERT INTO agent_messages (run_id, seq, role, content, tool_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.run_id,
                    message.seq,
                    message.role.as_str(),
                    message.content,
                    message.tool_name,
                    message.created_at,
                ],
            )
            .map_err(|err| Self::map_insert_conflict(err, &message.run_id, message.seq))?;
        Ok(())
    }

    pub fn append_tool_call(&self, call: &ToolCallRecord) -> Result<(), StoreError> {
        let input_text =
            serde_json::to_string(&call.input).map_err(|source| StoreError::Json { source })?;
        let output_text = call
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| StoreError::Json { source })?;

        let connection = self.connect()?;
        self.guard_appendable(&connection, &call.run_id)?;
        connection
            .execute(
                "INSERT INTO tool_calls (
                    run_id, seq, tool_name, input, output, status, error,
                    started_at, finished_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    call.run_id,
                    call.seq,
                    call.tool_name,
                    input_text,
                    output_text,
                    call.status.as_str(),
                    call.error,
                    call.started_at,
                    call.finished_at,
                ],
            )
            .map_err(|err| Self::map_insert_conflict(err, &call.run_id, call.seq))?;
        Ok(())
    }

    pub fn next_message_seq(&self, run_id: &str) -> Result<i64, StoreError> {
        let connection = self.connect()?;
        connection
            .query_row(
                "SELECT COALESCE(MAX(seq) + 1, 0) FROM agent_messages WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(sql_error)
    }

    pub fn next_tool_call_seq(&self, run_id: &str) -> Result<i64, StoreError> {
        let connection = self.connect()?;
        connection
            .query_row(
                "SELECT COALESCE(MAX(seq) + 1, 0) FROM tool_calls WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .map_err(sql_error)
    }

    pub fn load_messages(&self, run_id: &str) -> Result<Vec<AgentMessageRecord>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "SELECT run_id, seq, role, content, tool_name, created_at
                 FROM agent_messages WHERE run_id = ?1 ORDER BY seq ASC",
            )
            .map_err(sql_error)?;
        let rows = statement
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(sql_error)?;

        let mut messages = Vec::new();
        for row in rows {
            let (run_id, seq, role, content, tool_name, created_at) = row.map_err(sql_error)?;
            messages.push(AgentMessageRecord {
                run_id,
                seq,
                role: MessageRole::parse(&role)?,
                content,
                tool_name,
                created_at,
            });
        }
        Ok(messages)
    }

    pub fn load_tool_calls(&self, run_id: &str) -> Result<Vec<ToolCallRecord>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "SELECT run_id, seq, tool_name, input, output, status, error,
                        started_at, finished_at
                 FROM tool_calls WHERE run_id = ?1 ORDER BY seq ASC",
            )
            .map_err(sql_error)?;
        let rows = statement
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, i64>(8)?,
                ))
            })
            .map_err(sql_error)?;

        let mut calls = Vec::new();
        for row in rows {
            let (run_id, seq, tool_name, input, output, status, error, started_at, finished_at) =
                row.map_err(sql_error)?;
            calls.push(ToolCallRecord {
                run_id,
                seq,
                tool_name,
                input: serde_json::from_str(&input)
                    .map_err(|source| StoreError::Json { source })?,
                output: output
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|source| StoreError::Json { source })?,
                status: ToolCallStatus::parse(&status)?,
                error,
                started_at,
                finished_at,
            });
        }
        Ok(calls)
    }

    /// Keyset-paginated listing ordered by `started_at` DESC then `run_id`
    /// DESC. The cursor names the last row of the previous page; the strict
    /// predicate keeps pages disjoint even when runs share a timestamp.
    pub fn list_runs(&self, filter: &RunListFilter) -> Result<RunListPage, StoreError> {
        let limit = filter.limit.clamp(1, MAX_LIST_LIMIT);

        let mut sql = String::from(
            "SELECT run_id, agent_id, org_id, project_id, user_id, trigger_kind,
                    input, status, started_at, finished_at, latency_ms, error,
                    result_summary, result_payload
             FROM agent_runs WHERE org_id = ?",
        );
        let mut bound: Vec<Box<dyn ToSql>> = vec![Box::new(filter.org_id.clone())];

        if let Some(agent_id) = &filter.agent_id {
            sql.push_str(" AND agent_id = ?");
            bound.push(Box::new(agent_id.clone()));
        }
        if let Some(project_id) = &filter.project_id {
            sql.push_str(" AND project_id = ?");
            bound.push(Box::new(project_id.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            bound.push(Box::new(status.as_str().to_string()));
        }
        if let Some(cursor) = &filter.cursor {
            let (started_at, run_id) = decode_cursor(cursor)?;
            sql.push_str(" AND (started_at < ? OR (started_at = ? AND run_id < ?))");
            bound.push(Box::new(started_at));
            bound.push(Box::new(started_at));
            bound.push(Box::new(run_id));
        }
        sql.push_str(" ORDER BY started_at DESC, run_id DESC LIMIT ?");
        bound.push(Box::new((limit + 1) as i64));

        let connection = self.connect()?;
        let mut statement = connection.prepare(&sql).map_err(sql_error)?;
        let rows = statement
            .query_map(
                rusqlite::params_from_iter(bound.iter().map(|param| param.as_ref())),
                raw_run_from_row,
            )
            .map_err(sql_error)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(run_from_raw(row.map_err(sql_error)?)?);
        }

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items
                .last()
                .map(|run| encode_cursor(run.started_at, &run.run_id))
        } else {
            None
        };

        Ok(RunListPage { items, next_cursor })
    }
}

type RawRun = (
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn raw_run_from_row(row: &rusqlite::Row<'_>) -> Result<RawRun, rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

fn run_from_raw(raw: RawRun) -> Result<AgentRunRecord, StoreError> {
    let (
        run_id,
        agent_id,
        org_id,
        project_id,
        user_id,
        trigger,
        input,
        status,
        started_at,
        finished_at,
        latency_ms,
        error,
        result_summary,
        result_payload,
    ) = raw;
    Ok(AgentRunRecord {
        run_id,
        agent_id,
        org_id,
        project_id,
        user_id,
        trigger: TriggerKind::parse(&trigger)?,
        input,
        status: RunStatus::parse(&status)?,
        started_at,
        finished_at,
        latency_ms,
        error,
        result_summary,
        result_payload: result_payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|source| StoreError::Json { source })?,
    })
}
