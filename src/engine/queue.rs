// ABOUTME: Per-group priority queue with a single running slot and retry handling
// ABOUTME: Defines queued task records, retry policy, snapshots and bounded task history

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{EngineError, Result};
use super::result::{FailureKind, TaskStatus};
use crate::script::ActionNode;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// Delay applied before a failed task becomes eligible again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Immediate,
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    Exponential {
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub backoff: Backoff,
    /// Retry failures caused by the script itself (unsupported action kinds,
    /// malformed parameters) like any other failure
    #[serde(default = "default_retry_unsupported")]
    pub retry_unsupported_actions: bool,
}

fn default_retry_unsupported() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Immediate,
            retry_unsupported_actions: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential {
                initial_delay,
                multiplier,
                max_delay,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(exponent);
                let delay = if delay_ms.is_finite() && delay_ms >= 0.0 {
                    Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64)
                } else {
                    *max_delay
                };

                // Cap at max_delay
                delay.min(*max_delay)
            }
        }
    }

    fn should_retry(&self, kind: FailureKind) -> bool {
        match kind {
            FailureKind::Transient => true,
            FailureKind::Fatal => self.retry_unsupported_actions,
            FailureKind::Cancelled => false,
        }
    }
}

/// A unit of work queued in a group
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: String,
    pub group_id: String,
    pub script_name: String,
    /// Catalog id when submitted by script id
    pub script_id: Option<String>,
    pub actions: Arc<Vec<ActionNode>>,
    pub variables: Map<String, Value>,
    pub exception_script: Option<String>,
    /// Exception handlers never dispatch further exception scripts
    pub is_exception_handler: bool,
    pub priority: i64,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub execution_id: Option<String>,
    pub cancel_requested: bool,
    /// Token of the execution currently driving this task
    cancel_token: Option<CancellationToken>,
}

impl QueuedTask {
    pub fn new(group_id: &str, script_name: &str, actions: Vec<ActionNode>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            script_name: script_name.to_string(),
            script_id: None,
            actions: Arc::new(actions),
            variables: Map::new(),
            exception_script: None,
            is_exception_handler: false,
            priority: 0,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            last_error: None,
            result: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            execution_id: None,
            cancel_requested: false,
            cancel_token: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_script_id(mut self, script_id: &str) -> Self {
        self.script_id = Some(script_id.to_string());
        self
    }

    pub fn with_exception_script(mut self, script_id: Option<String>) -> Self {
        self.exception_script = script_id;
        self
    }

    pub fn as_exception_handler(mut self) -> Self {
        self.is_exception_handler = true;
        self
    }

    fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_at.map_or(true, |at| at <= now)
    }

    fn mark_started(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.completed_at = None;
    }

    fn mark_completed(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            group_id: self.group_id.clone(),
            script_name: self.script_name.clone(),
            script_id: self.script_id.clone(),
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.last_error.clone(),
            result: self.result.clone(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            execution_id: self.execution_id.clone(),
            cancel_requested: self.cancel_requested,
        }
    }

    fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            script_name: self.script_name.clone(),
            priority: self.priority,
            status: self.status,
            retry_count: self.retry_count,
        }
    }
}

/// Serializable record of a task; timestamps are RFC 3339 strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub group_id: String,
    pub script_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_id: Option<String>,
    pub priority: i64,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub execution_id: Option<String>,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub script_name: String,
    pub priority: i64,
    pub status: TaskStatus,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub group_id: String,
    pub name: String,
    pub enabled: bool,
    pub queue_length: usize,
    pub running: Option<TaskSummary>,
    pub pending: Vec<TaskSummary>,
    pub exception_script: Option<String>,
    pub completed_count: usize,
}

/// Interpreter outcome reported back to the queue
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded(Value),
    Failed { error: String, kind: FailureKind },
    Cancelled,
}

/// What `complete` did with the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Retrying { attempt: u32 },
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Pending task removed before it ever ran
    Removed,
    /// Running task flagged; its execution must observe the cancellation
    Requested { execution_id: Option<String> },
}

/// Queue for one logical group: pending tasks ordered by descending
/// priority (FIFO among equals) and at most one running task.
#[derive(Debug)]
pub struct GroupQueue {
    id: String,
    name: String,
    enabled: bool,
    exception_script: Option<String>,
    pending: Vec<QueuedTask>,
    running: Option<QueuedTask>,
    history: IndexMap<String, QueuedTask>,
    history_limit: usize,
    retry_policy: RetryPolicy,
}

impl GroupQueue {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            exception_script: None,
            pending: Vec::new(),
            running: None,
            history: IndexMap::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn exception_script(&self) -> Option<&str> {
        self.exception_script.as_deref()
    }

    pub fn set_exception_script(&mut self, script_id: Option<String>) {
        self.exception_script = script_id;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn running(&self) -> Option<&QueuedTask> {
        self.running.as_ref()
    }

    /// Insert after every task of equal or higher priority
    pub fn enqueue(&mut self, mut task: QueuedTask) -> Result<()> {
        if task.group_id != self.id {
            return Err(EngineError::GroupNotFound {
                group: task.group_id,
            });
        }
        task.status = TaskStatus::Pending;
        let position = self
            .pending
            .iter()
            .position(|t| t.priority < task.priority)
            .unwrap_or(self.pending.len());
        debug!(
            "Queued task {} ({}) in group {} at position {}",
            task.id, task.script_name, self.id, position
        );
        self.pending.insert(position, task);
        Ok(())
    }

    /// Take the highest-priority eligible task and mark it running. Returns
    /// nothing while the group is disabled or already has a running task.
    pub fn dequeue_next(&mut self, now: DateTime<Utc>) -> Option<QueuedTask> {
        if !self.enabled || self.running.is_some() {
            return None;
        }
        let index = self.pending.iter().position(|t| t.is_eligible(now))?;
        let mut task = self.pending.remove(index);
        task.mark_started(now);
        self.running = Some(task.clone());
        Some(task)
    }

    /// Record the execution driving the running task. Later cancellations
    /// fire `cancel` directly; one requested before this call fires it now.
    /// Returns true in that case.
    pub fn attach_execution(
        &mut self,
        task_id: &str,
        execution_id: &str,
        cancel: CancellationToken,
    ) -> bool {
        match self.running.as_mut() {
            Some(task) if task.id == task_id => {
                task.execution_id = Some(execution_id.to_string());
                if task.cancel_requested {
                    cancel.cancel();
                }
                task.cancel_token = Some(cancel);
                task.cancel_requested
            }
            _ => false,
        }
    }

    /// Apply the outcome of the running task and the retry policy
    pub fn complete(
        &mut self,
        task_id: &str,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
    ) -> Result<Disposition> {
        let mut task = match self.running.take() {
            Some(task) if task.id == task_id => task,
            other => {
                self.running = other;
                return Err(EngineError::TaskNotFound {
                    task_id: task_id.to_string(),
                });
            }
        };

        if task.cancel_requested {
            task.last_error = Some("cancelled".to_string());
            task.mark_completed(TaskStatus::Cancelled, now);
            info!("Task {} cancelled in group {}", task.id, self.id);
            self.archive(task);
            return Ok(Disposition::Cancelled);
        }

        match outcome {
            TaskOutcome::Succeeded(result) => {
                task.result = Some(result);
                task.mark_completed(TaskStatus::Completed, now);
                info!("Task {} completed in group {}", task.id, self.id);
                self.archive(task);
                Ok(Disposition::Completed)
            }
            TaskOutcome::Cancelled => {
                task.last_error = Some("cancelled".to_string());
                task.mark_completed(TaskStatus::Cancelled, now);
                info!("Task {} cancelled in group {}", task.id, self.id);
                self.archive(task);
                Ok(Disposition::Cancelled)
            }
            TaskOutcome::Failed { error, kind } => {
                task.last_error = Some(error);

                if task.retry_count < task.max_retries && self.retry_policy.should_retry(kind) {
                    task.retry_count += 1;
                    let delay = self.retry_policy.calculate_delay(task.retry_count);
                    task.scheduled_at = Some(
                        now + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                    );
                    task.started_at = None;
                    task.execution_id = None;
                    task.cancel_token = None;
                    let attempt = task.retry_count;
                    warn!(
                        "Task {} failed, retry {}/{} in {:?}: {}",
                        task.id,
                        attempt,
                        task.max_retries,
                        delay,
                        task.last_error.as_deref().unwrap_or_default()
                    );
                    self.enqueue(task)?;
                    Ok(Disposition::Retrying { attempt })
                } else {
                    task.mark_completed(TaskStatus::Failed, now);
                    warn!(
                        "Task {} failed permanently after {} retries: {}",
                        task.id,
                        task.retry_count,
                        task.last_error.as_deref().unwrap_or_default()
                    );
                    self.archive(task);
                    Ok(Disposition::Failed)
                }
            }
        }
    }

    /// Remove a pending task or flag the running one. `None` if the task is
    /// unknown or already terminal.
    pub fn cancel(&mut self, task_id: &str, now: DateTime<Utc>) -> Option<CancelOutcome> {
        if let Some(index) = self.pending.iter().position(|t| t.id == task_id) {
            let mut task = self.pending.remove(index);
            task.cancel_requested = true;
            task.mark_completed(TaskStatus::Cancelled, now);
            info!("Pending task {} cancelled in group {}", task.id, self.id);
            self.archive(task);
            return Some(CancelOutcome::Removed);
        }

        match self.running.as_mut() {
            Some(task) if task.id == task_id && !task.cancel_requested => {
                task.cancel_requested = true;
                if let Some(ref token) = task.cancel_token {
                    token.cancel();
                }
                Some(CancelOutcome::Requested {
                    execution_id: task.execution_id.clone(),
                })
            }
            _ => None,
        }
    }

    /// Cancel every pending task and flag the running one
    pub fn cancel_all(&mut self, now: DateTime<Utc>) -> Option<String> {
        let ids: Vec<String> = self.pending.iter().map(|t| t.id.clone()).collect();
        for id in ids {
            self.cancel(&id, now);
        }
        let running_id = self.running.as_ref().map(|t| t.id.clone())?;
        match self.cancel(&running_id, now) {
            Some(CancelOutcome::Requested { execution_id }) => execution_id,
            _ => None,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.find(task_id).is_some()
    }

    pub fn find(&self, task_id: &str) -> Option<&QueuedTask> {
        self.running
            .as_ref()
            .filter(|t| t.id == task_id)
            .or_else(|| self.pending.iter().find(|t| t.id == task_id))
            .or_else(|| self.history.get(task_id))
    }

    pub fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.find(task_id).map(QueuedTask::snapshot)
    }

    /// Running, pending (in service order) and historical tasks
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.running
            .iter()
            .chain(self.pending.iter())
            .chain(self.history.values().rev())
            .map(QueuedTask::snapshot)
            .collect()
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            group_id: self.id.clone(),
            name: self.name.clone(),
            enabled: self.enabled,
            queue_length: self.pending.len(),
            running: self.running.as_ref().map(QueuedTask::summary),
            pending: self.pending.iter().map(QueuedTask::summary).collect(),
            exception_script: self.exception_script.clone(),
            completed_count: self.history.len(),
        }
    }

    fn archive(&mut self, task: QueuedTask) {
        self.history.insert(task.id.clone(), task);
        while self.history.len() > self.history_limit {
            self.history.shift_remove_index(0);
        }
    }
}
