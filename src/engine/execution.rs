// ABOUTME: Execution state machine and the registry of live executions
// ABOUTME: Runs one action tree to a terminal state and tracks liveness for the watchdog

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::context::ExecutionContext;
use super::interpreter::Interpreter;
use super::result::{ActionResult, ExecutionReport, ExecutionState, FailureKind};
use crate::script::ActionNode;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Time of the last successful leaf action or loop step, readable from other tasks
#[derive(Debug)]
pub struct ActivityClock {
    last: Mutex<(Instant, DateTime<Utc>)>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new((Instant::now(), Utc::now())),
        }
    }

    pub fn touch(&self) {
        *lock(&self.last) = (Instant::now(), Utc::now());
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(lock(&self.last).0)
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        lock(&self.last).1
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

struct LiveExecution {
    task_id: Option<String>,
    group_id: String,
    script_name: String,
    exception_script: Option<String>,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    activity: Arc<ActivityClock>,
}

/// Summary of a live execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionInfo {
    pub execution_id: String,
    pub task_id: Option<String>,
    pub group_id: String,
    pub script_name: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub running_seconds: f64,
}

/// A live execution found idle past the stall threshold
#[derive(Debug, Clone)]
pub struct StalledExecution {
    pub execution_id: String,
    pub task_id: Option<String>,
    pub group_id: String,
    pub script_name: String,
    pub exception_script: Option<String>,
    pub idle: Duration,
}

/// Table of running executions, keyed by execution id
#[derive(Default)]
pub struct ExecutionRegistry {
    live: Mutex<HashMap<String, LiveExecution>>,
}

/// Removes its execution from the registry when dropped
pub struct ExecutionGuard {
    registry: Arc<ExecutionRegistry>,
    execution_id: String,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if lock(&self.registry.live).remove(&self.execution_id).is_some() {
            debug!("Execution {} removed from live registry", self.execution_id);
        }
    }
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, ctx: &ExecutionContext) -> ExecutionGuard {
        lock(&self.live).insert(
            ctx.execution_id.clone(),
            LiveExecution {
                task_id: ctx.task_id.clone(),
                group_id: ctx.group_id.clone(),
                script_name: ctx.script_name.clone(),
                exception_script: ctx.exception_script.clone(),
                started_at: ctx.created_at,
                cancel: ctx.cancel_token().clone(),
                activity: Arc::clone(ctx.activity()),
            },
        );
        ExecutionGuard {
            registry: Arc::clone(self),
            execution_id: ctx.execution_id.clone(),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.live).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.live).is_empty()
    }

    pub fn contains(&self, execution_id: &str) -> bool {
        lock(&self.live).contains_key(execution_id)
    }

    /// Request cancellation of one execution. Returns false if it is not live.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match lock(&self.live).get(execution_id) {
            Some(live) => {
                live.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let live = lock(&self.live);
        for execution in live.values() {
            execution.cancel.cancel();
        }
        live.len()
    }

    /// Cancel every live execution belonging to `group_id`
    pub fn cancel_group(&self, group_id: &str) -> usize {
        let live = lock(&self.live);
        let mut cancelled = 0;
        for execution in live.values().filter(|e| e.group_id == group_id) {
            execution.cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn list(&self) -> Vec<ExecutionInfo> {
        let now = Utc::now();
        let live = lock(&self.live);
        let mut infos: Vec<ExecutionInfo> = live
            .iter()
            .map(|(id, e)| ExecutionInfo {
                execution_id: id.clone(),
                task_id: e.task_id.clone(),
                group_id: e.group_id.clone(),
                script_name: e.script_name.clone(),
                started_at: e.started_at,
                last_activity: e.activity.last_activity_at(),
                running_seconds: (now - e.started_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .as_secs_f64(),
            })
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    /// Executions idle longer than `threshold` that have not already been
    /// asked to cancel
    pub fn stalled(&self, threshold: Duration, now: Instant) -> Vec<StalledExecution> {
        lock(&self.live)
            .iter()
            .filter(|(_, e)| !e.cancel.is_cancelled())
            .filter_map(|(id, e)| {
                let idle = e.activity.idle_for(now);
                (idle > threshold).then(|| StalledExecution {
                    execution_id: id.clone(),
                    task_id: e.task_id.clone(),
                    group_id: e.group_id.clone(),
                    script_name: e.script_name.clone(),
                    exception_script: e.exception_script.clone(),
                    idle,
                })
            })
            .collect()
    }
}

/// One script run moving through created -> running -> terminal
pub struct Execution {
    ctx: ExecutionContext,
    actions: Arc<Vec<ActionNode>>,
    state: ExecutionState,
}

impl Execution {
    pub fn new(ctx: ExecutionContext, actions: Arc<Vec<ActionNode>>) -> Self {
        Self {
            ctx,
            actions,
            state: ExecutionState::Created,
        }
    }

    pub fn id(&self) -> &str {
        &self.ctx.execution_id
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    fn transition(&mut self, next: ExecutionState) {
        debug!(
            "Execution {}: {} -> {}",
            self.ctx.execution_id, self.state, next
        );
        self.state = next;
    }

    /// Run the action tree to a terminal state. The registry entry is
    /// removed when this returns, whichever state was reached.
    #[instrument(
        skip_all,
        fields(execution_id = %self.ctx.execution_id, script = %self.ctx.script_name)
    )]
    pub async fn run(
        mut self,
        interpreter: &Interpreter,
        registry: &Arc<ExecutionRegistry>,
    ) -> ExecutionReport {
        let _guard = registry.register(&self.ctx);
        let started_at = Utc::now();
        let actions = Arc::clone(&self.actions);

        self.transition(ExecutionState::Running);
        info!(
            "Execution started: {} in group {} ({} actions)",
            self.ctx.script_name,
            self.ctx.group_id,
            actions.len()
        );

        let mut last = ActionResult::ok(Value::Null);
        let mut failure: Option<ActionResult> = None;
        let mut executed = 0;

        for node in actions.iter() {
            if self.ctx.is_cancelled() {
                self.transition(ExecutionState::Cancelled);
                break;
            }

            let result = interpreter.execute(&mut self.ctx, node).await;
            executed += 1;

            if self.ctx.is_cancelled() {
                self.transition(ExecutionState::Cancelled);
                break;
            }
            if !result.success {
                failure = Some(result);
                self.transition(ExecutionState::Failed);
                break;
            }
            last = result;
        }

        if self.state == ExecutionState::Running {
            self.transition(ExecutionState::Completed);
        }

        let (error, failure_kind) = match (&self.state, failure) {
            (ExecutionState::Failed, Some(f)) => (f.error, f.failure_kind),
            (ExecutionState::Cancelled, _) => (
                Some("execution cancelled".to_string()),
                Some(FailureKind::Cancelled),
            ),
            _ => (None, None),
        };

        match self.state {
            ExecutionState::Completed => info!("Execution completed: {}", self.ctx.script_name),
            ExecutionState::Cancelled => warn!("Execution cancelled: {}", self.ctx.script_name),
            _ => error!(
                "Execution failed: {} - {}",
                self.ctx.script_name,
                error.as_deref().unwrap_or("unknown error")
            ),
        }

        ExecutionReport {
            execution_id: self.ctx.execution_id.clone(),
            task_id: self.ctx.task_id.clone(),
            group_id: self.ctx.group_id.clone(),
            script_name: self.ctx.script_name.clone(),
            state: self.state,
            started_at,
            finished_at: Utc::now(),
            actions_executed: executed,
            result: last.data,
            error,
            failure_kind,
            variables: self.ctx.variables.snapshot(),
        }
    }
}
