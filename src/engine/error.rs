// ABOUTME: Error types for the execution engine
// ABOUTME: Covers queue/group lookups, interpreter failures and engine lifecycle errors

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Group not found: {group}")]
    GroupNotFound { group: String },

    #[error("Group already exists: {group}")]
    GroupExists { group: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Script not found: {script}")]
    ScriptNotFound { script: String },

    #[error("unsupported action kind: {kind}")]
    UnsupportedAction { kind: String },

    #[error("Invalid action parameters: {0}")]
    InvalidParams(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Shutdown timed out after {timeout:?} with {remaining} execution(s) still active")]
    ShutdownTimeout { timeout: Duration, remaining: usize },

    #[error(transparent)]
    Capability(#[from] crate::capability::CapabilityError),

    #[error("Join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Errors caused by the script itself rather than the environment it runs in
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedAction { .. } | EngineError::InvalidParams(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
