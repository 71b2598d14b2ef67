// ABOUTME: Group queue set and the scheduler loop that starts queued tasks
// ABOUTME: Each tick pulls at most one task per enabled group and runs it on its own worker

use chrono::Utc;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::context::ExecutionContext;
use super::error::{EngineError, Result};
use super::execution::{Execution, ExecutionRegistry};
use super::interpreter::Interpreter;
use super::queue::{
    CancelOutcome, Disposition, GroupQueue, QueueStatus, QueuedTask, TaskOutcome, TaskSnapshot,
};
use super::result::{ExecutionReport, ExecutionState, FailureKind};

/// Default scheduler tick
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

pub(crate) fn lock_queue(queue: &Mutex<GroupQueue>) -> MutexGuard<'_, GroupQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// All group queues, in creation order
#[derive(Default)]
pub struct QueueSet {
    groups: RwLock<IndexMap<String, Arc<Mutex<GroupQueue>>>>,
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, queue: GroupQueue) -> Result<()> {
        let mut groups = self.groups.write().await;
        if groups.contains_key(queue.id()) {
            return Err(EngineError::GroupExists {
                group: queue.id().to_string(),
            });
        }
        info!("Created group {} ({})", queue.id(), queue.name());
        groups.insert(queue.id().to_string(), Arc::new(Mutex::new(queue)));
        Ok(())
    }

    pub async fn remove(&self, group_id: &str) -> Option<Arc<Mutex<GroupQueue>>> {
        self.groups.write().await.shift_remove(group_id)
    }

    pub async fn get(&self, group_id: &str) -> Result<Arc<Mutex<GroupQueue>>> {
        self.groups
            .read()
            .await
            .get(group_id)
            .cloned()
            .ok_or_else(|| EngineError::GroupNotFound {
                group: group_id.to_string(),
            })
    }

    pub async fn contains(&self, group_id: &str) -> bool {
        self.groups.read().await.contains_key(group_id)
    }

    pub async fn all(&self) -> Vec<Arc<Mutex<GroupQueue>>> {
        self.groups.read().await.values().cloned().collect()
    }

    pub async fn enqueue(&self, task: QueuedTask) -> Result<String> {
        let queue = self.get(&task.group_id).await?;
        let id = task.id.clone();
        lock_queue(&queue).enqueue(task)?;
        Ok(id)
    }

    pub async fn find_group_of(&self, task_id: &str) -> Option<Arc<Mutex<GroupQueue>>> {
        self.all()
            .await
            .into_iter()
            .find(|queue| lock_queue(queue).contains(task_id))
    }

    pub async fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        for queue in self.all().await {
            let found = lock_queue(&queue).snapshot(task_id);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    pub async fn cancel(&self, task_id: &str) -> Option<CancelOutcome> {
        let queue = self.find_group_of(task_id).await?;
        let outcome = lock_queue(&queue).cancel(task_id, Utc::now());
        outcome
    }

    pub async fn statuses(&self) -> Vec<QueueStatus> {
        self.all()
            .await
            .iter()
            .map(|queue| lock_queue(queue).status())
            .collect()
    }
}

impl From<&ExecutionReport> for TaskOutcome {
    fn from(report: &ExecutionReport) -> Self {
        match report.state {
            ExecutionState::Completed => TaskOutcome::Succeeded(report.result.clone()),
            ExecutionState::Cancelled => TaskOutcome::Cancelled,
            _ => TaskOutcome::Failed {
                error: report
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
                kind: report.failure_kind.unwrap_or(FailureKind::Transient),
            },
        }
    }
}

/// Pulls eligible tasks from every enabled group and starts them
pub struct Scheduler {
    queues: Arc<QueueSet>,
    interpreter: Arc<Interpreter>,
    executions: Arc<ExecutionRegistry>,
    workers: TaskTracker,
    enabled: AtomicBool,
    tick: Duration,
}

impl Scheduler {
    pub fn new(
        queues: Arc<QueueSet>,
        interpreter: Arc<Interpreter>,
        executions: Arc<ExecutionRegistry>,
    ) -> Self {
        Self {
            queues,
            interpreter,
            executions,
            workers: TaskTracker::new(),
            enabled: AtomicBool::new(true),
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn pause(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!("Scheduler paused");
    }

    pub fn resume(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!("Scheduler resumed");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> &TaskTracker {
        &self.workers
    }

    /// Run ticks until the token is cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.tick.as_millis() as u64, "Scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass over the groups. Returns the number of tasks started.
    pub async fn tick(&self) -> usize {
        if !self.is_enabled() {
            return 0;
        }

        let now = Utc::now();
        let mut started = 0;
        for queue in self.queues.all().await {
            let next = lock_queue(&queue).dequeue_next(now);
            if let Some(task) = next {
                self.launch(queue, task);
                started += 1;
            }
        }
        if started > 0 {
            debug!("Scheduler tick started {} task(s)", started);
        }
        started
    }

    fn launch(&self, queue: Arc<Mutex<GroupQueue>>, task: QueuedTask) {
        let exception_script = if task.is_exception_handler {
            None
        } else {
            task.exception_script
                .clone()
                .or_else(|| lock_queue(&queue).exception_script().map(str::to_string))
        };

        let ctx = ExecutionContext::new(&task.group_id, &task.script_name)
            .with_task(&task.id)
            .with_variables(&task.variables)
            .with_exception_script(exception_script);

        let cancelled_early = lock_queue(&queue).attach_execution(
            &task.id,
            &ctx.execution_id,
            ctx.cancel_token().clone(),
        );
        if cancelled_early {
            debug!("Task {} was cancelled before it started", task.id);
        }

        info!(
            "Starting task {} ({}) in group {} as execution {}",
            task.id, task.script_name, task.group_id, ctx.execution_id
        );

        let interpreter = Arc::clone(&self.interpreter);
        let executions = Arc::clone(&self.executions);
        let execution = Execution::new(ctx, Arc::clone(&task.actions));

        self.workers.spawn(async move {
            let report = execution.run(&interpreter, &executions).await;
            let disposition =
                lock_queue(&queue).complete(&task.id, TaskOutcome::from(&report), Utc::now());
            match disposition {
                Ok(Disposition::Retrying { attempt }) => {
                    debug!("Task {} requeued (attempt {})", task.id, attempt)
                }
                Ok(d) => debug!("Task {} finished: {:?}", task.id, d),
                Err(e) => error!("Failed to record completion of task {}: {}", task.id, e),
            }
        });
    }
}
