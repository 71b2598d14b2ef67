// ABOUTME: Result and status types for actions, executions and queued tasks
// ABOUTME: Defines ActionResult, ExecutionState, TaskStatus and the per-run ExecutionReport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::error::EngineError;

/// How a failed action or execution should be treated by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Environment failure (driver error, vision service error)
    Transient,
    /// Script-authoring error (unsupported action kind, malformed parameters)
    Fatal,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

impl ActionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            failure_kind: None,
        }
    }

    pub fn failed(error: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            failure_kind: Some(kind),
        }
    }

    pub fn from_error(error: &EngineError) -> Self {
        let kind = match error {
            EngineError::Cancelled => FailureKind::Cancelled,
            e if e.is_fatal() => FailureKind::Fatal,
            _ => FailureKind::Transient,
        };
        Self::failed(error.to_string(), kind)
    }

    pub fn cancelled() -> Self {
        Self::from_error(&EngineError::Cancelled)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure_kind == Some(FailureKind::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Terminal record of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub task_id: Option<String>,
    pub group_id: String,
    pub script_name: String,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub actions_executed: usize,
    /// Data of the last successful top-level action
    pub result: Value,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    /// Variable bindings at termination
    pub variables: Map<String, Value>,
}

impl ExecutionReport {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_successful(&self) -> bool {
        self.state == ExecutionState::Completed
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Created => write!(f, "created"),
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Completed => write!(f, "completed"),
            ExecutionState::Failed => write!(f, "failed"),
            ExecutionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
