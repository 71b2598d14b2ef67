// ABOUTME: Execution context owned by the worker running one script instance
// ABOUTME: Holds variables, identifiers, the cancellation token and the liveness clock

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::execution::ActivityClock;
use super::variables::VariableContext;

/// State of one live script run. Never shared between workers; the
/// registry only sees the cancellation token and the activity clock.
#[derive(Debug)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub task_id: Option<String>,
    pub group_id: String,
    pub script_name: String,
    /// Script dispatched by the watchdog if this execution stalls
    pub exception_script: Option<String>,
    pub created_at: DateTime<Utc>,
    pub variables: VariableContext,
    cancel: CancellationToken,
    activity: Arc<ActivityClock>,
}

impl ExecutionContext {
    pub fn new(group_id: &str, script_name: &str) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            task_id: None,
            group_id: group_id.to_string(),
            script_name: script_name.to_string(),
            exception_script: None,
            created_at: Utc::now(),
            variables: VariableContext::new(),
            cancel: CancellationToken::new(),
            activity: Arc::new(ActivityClock::new()),
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_variables(mut self, initial: &Map<String, Value>) -> Self {
        self.variables = VariableContext::from_map(initial);
        self
    }

    pub fn with_exception_script(mut self, script_id: Option<String>) -> Self {
        self.exception_script = script_id;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn activity(&self) -> &Arc<ActivityClock> {
        &self.activity
    }

    /// Request cooperative cancellation of this execution
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record a successfully completed leaf action
    pub fn touch(&self) {
        self.activity.touch();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.activity.last_activity_at()
    }
}
