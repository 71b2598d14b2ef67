// ABOUTME: ScriptEngine facade owning queues, the live-execution registry, scheduler and watchdog
// ABOUTME: Exposes task submission, query/cancel, pause/resume, status and lifecycle control

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::context::ExecutionContext;
use super::error::{EngineError, Result};
use super::execution::{Execution, ExecutionInfo, ExecutionRegistry, StalledExecution};
use super::interpreter::Interpreter;
use super::queue::{
    CancelOutcome, GroupQueue, QueueStatus, QueuedTask, RetryPolicy, TaskSnapshot,
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_RETRIES,
};
use super::result::ExecutionReport;
use super::scheduler::{lock_queue, QueueSet, Scheduler, DEFAULT_TICK};
use super::watchdog::{StallHandler, Watchdog, DEFAULT_WATCHDOG_INTERVAL};
use crate::capability::{
    CapabilityRegistry, OcrEngine, TemplateMatcher, UnconfiguredMatcher, UnconfiguredOcr,
};
use crate::script::{ActionNode, GroupDefinition, ScriptDefinition, ScriptLibrary};

/// Priority given to exception scripts queued by the watchdog
pub const DEFAULT_EXCEPTION_PRIORITY: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(with = "humantime_serde")]
    pub scheduler_tick: Duration,
    #[serde(with = "humantime_serde")]
    pub watchdog_interval: Duration,
    /// Inactivity after which an execution counts as stalled; defaults to
    /// the watchdog interval
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub stall_threshold: Option<Duration>,
    pub default_max_retries: u32,
    pub history_limit: usize,
    pub exception_priority: i64,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler_tick: DEFAULT_TICK,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            stall_threshold: None,
            default_max_retries: DEFAULT_MAX_RETRIES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            exception_priority: DEFAULT_EXCEPTION_PRIORITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn stall_threshold(&self) -> Duration {
        self.stall_threshold.unwrap_or(self.watchdog_interval)
    }
}

/// Scripts addressable by id, used for `submit_script` and exception dispatch
#[derive(Default)]
pub struct ScriptCatalog {
    scripts: RwLock<HashMap<String, ScriptDefinition>>,
}

impl ScriptCatalog {
    pub async fn register(&self, script: ScriptDefinition) {
        let mut scripts = self.scripts.write().await;
        if scripts.insert(script.id.clone(), script).is_some() {
            warn!("Script definition replaced in catalog");
        }
    }

    pub async fn get(&self, id: &str) -> Option<ScriptDefinition> {
        self.scripts.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.scripts.read().await.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scripts.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn task_for_script(
    script: &ScriptDefinition,
    group_id: &str,
    priority: Option<i64>,
    default_max_retries: u32,
) -> QueuedTask {
    QueuedTask::new(group_id, script.display_name(), script.actions.clone())
        .with_script_id(&script.id)
        .with_priority(priority.or(script.priority).unwrap_or(0))
        .with_max_retries(script.max_retries.unwrap_or(default_max_retries))
        .with_variables(script.variables.clone())
        .with_exception_script(script.exception_script.clone())
}

/// Queues exception scripts through the ordinary submission path
struct ExceptionDispatcher {
    queues: Arc<QueueSet>,
    catalog: Arc<ScriptCatalog>,
    priority: i64,
    default_max_retries: u32,
}

#[async_trait]
impl StallHandler for ExceptionDispatcher {
    async fn dispatch_exception_script(
        &self,
        stalled: &StalledExecution,
        script_id: &str,
    ) -> Result<String> {
        let script = self
            .catalog
            .get(script_id)
            .await
            .ok_or_else(|| EngineError::ScriptNotFound {
                script: script_id.to_string(),
            })?;
        let task = task_for_script(
            &script,
            &stalled.group_id,
            Some(self.priority),
            self.default_max_retries,
        )
        .as_exception_handler();
        self.queues.enqueue(task).await
    }
}

struct Background {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Explicitly constructed orchestration core. Nothing is global: every
/// queue, registry and background loop hangs off one instance.
pub struct ScriptEngine {
    config: EngineConfig,
    registry: Arc<CapabilityRegistry>,
    interpreter: Arc<Interpreter>,
    executions: Arc<ExecutionRegistry>,
    queues: Arc<QueueSet>,
    catalog: Arc<ScriptCatalog>,
    scheduler: Arc<Scheduler>,
    watchdog: Arc<Watchdog>,
    background: Mutex<Option<Background>>,
}

impl ScriptEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<CapabilityRegistry>,
        matcher: Arc<dyn TemplateMatcher>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        let interpreter = Arc::new(Interpreter::new(Arc::clone(&registry), matcher, ocr));
        let executions = Arc::new(ExecutionRegistry::new());
        let queues = Arc::new(QueueSet::new());
        let catalog = Arc::new(ScriptCatalog::default());

        let scheduler = Arc::new(
            Scheduler::new(
                Arc::clone(&queues),
                Arc::clone(&interpreter),
                Arc::clone(&executions),
            )
            .with_tick(config.scheduler_tick),
        );

        let dispatcher = Arc::new(ExceptionDispatcher {
            queues: Arc::clone(&queues),
            catalog: Arc::clone(&catalog),
            priority: config.exception_priority,
            default_max_retries: config.default_max_retries,
        });
        let watchdog = Arc::new(
            Watchdog::new(Arc::clone(&executions), dispatcher)
                .with_interval(config.watchdog_interval)
                .with_threshold(config.stall_threshold()),
        );

        Self {
            config,
            registry,
            interpreter,
            executions,
            queues,
            catalog,
            scheduler,
            watchdog,
            background: Mutex::new(None),
        }
    }

    /// Engine without template-matching or OCR backends
    pub fn with_registry(config: EngineConfig, registry: Arc<CapabilityRegistry>) -> Self {
        Self::new(
            config,
            registry,
            Arc::new(UnconfiguredMatcher),
            Arc::new(UnconfiguredOcr),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    // ---- groups and catalog ----

    pub async fn create_group(&self, id: &str, name: &str) -> Result<()> {
        let queue = GroupQueue::new(id, name)
            .with_history_limit(self.config.history_limit)
            .with_retry_policy(self.config.retry.clone());
        self.queues.insert(queue).await
    }

    pub async fn add_group(&self, group: &GroupDefinition) -> Result<()> {
        self.create_group(&group.id, group.display_name()).await?;
        let queue = self.queues.get(&group.id).await?;
        let mut queue = lock_queue(&queue);
        queue.set_enabled(group.enabled);
        queue.set_exception_script(group.exception_script.clone());
        Ok(())
    }

    /// Remove a group, cancelling its pending tasks and its running execution
    pub async fn remove_group(&self, id: &str) -> Result<()> {
        let queue = self
            .queues
            .remove(id)
            .await
            .ok_or_else(|| EngineError::GroupNotFound {
                group: id.to_string(),
            })?;
        let running = lock_queue(&queue).cancel_all(Utc::now());
        if let Some(execution_id) = running {
            self.executions.cancel(&execution_id);
        }
        self.executions.cancel_group(id);
        info!("Removed group {}", id);
        Ok(())
    }

    pub async fn register_script(&self, script: ScriptDefinition) {
        info!("Registered script {}", script.id);
        self.catalog.register(script).await;
    }

    /// Register every group and script of a library
    pub async fn load_library(&self, library: &ScriptLibrary) -> Result<()> {
        for script in &library.scripts {
            self.register_script(script.clone()).await;
        }
        for group in &library.groups {
            self.add_group(group).await?;
        }
        Ok(())
    }

    pub async fn set_group_exception_script(
        &self,
        group_id: &str,
        script_id: Option<&str>,
    ) -> Result<()> {
        if let Some(script_id) = script_id {
            if !self.catalog.contains(script_id).await {
                return Err(EngineError::ScriptNotFound {
                    script: script_id.to_string(),
                });
            }
        }
        let queue = self.queues.get(group_id).await?;
        lock_queue(&queue).set_exception_script(script_id.map(str::to_string));
        Ok(())
    }

    // ---- tasks ----

    /// Queue an action tree; returns the task id
    #[instrument(skip(self, actions))]
    pub async fn submit(
        &self,
        group_id: &str,
        script_name: &str,
        actions: Vec<ActionNode>,
        priority: Option<i64>,
    ) -> Result<String> {
        let task = QueuedTask::new(group_id, script_name, actions)
            .with_priority(priority.unwrap_or(0))
            .with_max_retries(self.config.default_max_retries);
        self.queues.enqueue(task).await
    }

    /// Queue a catalog script by id
    #[instrument(skip(self))]
    pub async fn submit_script(
        &self,
        group_id: &str,
        script_id: &str,
        priority: Option<i64>,
    ) -> Result<String> {
        let script = self
            .catalog
            .get(script_id)
            .await
            .ok_or_else(|| EngineError::ScriptNotFound {
                script: script_id.to_string(),
            })?;
        let task = task_for_script(&script, group_id, priority, self.config.default_max_retries);
        self.queues.enqueue(task).await
    }

    /// Queue a script definition directly, registering it in the catalog
    pub async fn submit_definition(
        &self,
        group_id: &str,
        script: ScriptDefinition,
        priority: Option<i64>,
    ) -> Result<String> {
        let script_id = script.id.clone();
        self.register_script(script).await;
        self.submit_script(group_id, &script_id, priority).await
    }

    pub async fn query(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.queues
            .snapshot(task_id)
            .await
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Cancel a pending or running task. Returns false if the task is
    /// unknown or already terminal.
    pub async fn cancel(&self, task_id: &str) -> bool {
        match self.queues.cancel(task_id).await {
            Some(CancelOutcome::Removed) => true,
            Some(CancelOutcome::Requested { execution_id }) => {
                if let Some(execution_id) = execution_id {
                    self.executions.cancel(&execution_id);
                }
                info!("Cancellation requested for running task {}", task_id);
                true
            }
            None => false,
        }
    }

    // ---- pause / resume ----

    pub fn pause_all(&self) {
        self.scheduler.pause();
    }

    pub fn resume_all(&self) {
        self.scheduler.resume();
    }

    pub fn is_paused(&self) -> bool {
        !self.scheduler.is_enabled()
    }

    pub async fn pause_group(&self, group_id: &str) -> Result<()> {
        self.set_group_enabled(group_id, false).await
    }

    pub async fn resume_group(&self, group_id: &str) -> Result<()> {
        self.set_group_enabled(group_id, true).await
    }

    async fn set_group_enabled(&self, group_id: &str, enabled: bool) -> Result<()> {
        let queue = self.queues.get(group_id).await?;
        lock_queue(&queue).set_enabled(enabled);
        info!(
            "Group {} {}",
            group_id,
            if enabled { "resumed" } else { "paused" }
        );
        Ok(())
    }

    // ---- status ----

    pub async fn queue_status(&self, group_id: &str) -> Result<QueueStatus> {
        let queue = self.queues.get(group_id).await?;
        let status = lock_queue(&queue).status();
        Ok(status)
    }

    pub async fn all_queue_status(&self) -> Vec<QueueStatus> {
        self.queues.statuses().await
    }

    /// Running, pending and recently finished tasks of a group
    pub async fn group_tasks(&self, group_id: &str) -> Result<Vec<TaskSnapshot>> {
        let queue = self.queues.get(group_id).await?;
        let tasks = lock_queue(&queue).tasks();
        Ok(tasks)
    }

    pub fn running_executions(&self) -> Vec<ExecutionInfo> {
        self.executions.list()
    }

    // ---- lifecycle ----

    /// One scheduler pass outside the background loop
    pub async fn tick(&self) -> usize {
        self.scheduler.tick().await
    }

    /// Spawn the scheduler and watchdog loops
    pub async fn start(&self) -> Result<()> {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let scheduler = Arc::clone(&self.scheduler);
        let watchdog = Arc::clone(&self.watchdog);
        let scheduler_token = shutdown.child_token();
        let watchdog_token = shutdown.child_token();

        let handles = vec![
            tokio::spawn(async move { scheduler.run(scheduler_token).await }),
            tokio::spawn(async move { watchdog.run(watchdog_token).await }),
        ];

        info!("Script engine started");
        *background = Some(Background { shutdown, handles });
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.background.lock().await.is_some()
    }

    /// Request cancellation of every live execution
    pub fn stop_all_executions(&self) -> usize {
        let cancelled = self.executions.cancel_all();
        if cancelled > 0 {
            info!("Cancelling {} live execution(s)", cancelled);
        }
        cancelled
    }

    /// Stop both loops, cancel live executions, wait up to `timeout` for
    /// workers to drain, then clean up capabilities.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let background = self.background.lock().await.take();
        let mut join_error = None;
        if let Some(background) = background {
            background.shutdown.cancel();
            for handle in background.handles {
                if let Err(e) = handle.await {
                    error!("Background loop ended abnormally: {}", e);
                    join_error.get_or_insert(e);
                }
            }
        }

        self.stop_all_executions();

        let workers = self.scheduler.workers();
        workers.close();
        let drained = tokio::time::timeout(timeout, workers.wait()).await.is_ok();
        workers.reopen();

        self.registry.cleanup_all().await;

        if let Some(e) = join_error {
            return Err(EngineError::JoinError(e));
        }
        if drained {
            info!("Script engine stopped");
            Ok(())
        } else {
            let remaining = self.executions.len();
            warn!(
                "Shutdown timed out after {:?}, {} execution(s) still active",
                timeout, remaining
            );
            Err(EngineError::ShutdownTimeout { timeout, remaining })
        }
    }

    /// Run an action tree inline, outside any queue
    pub async fn execute_once(
        &self,
        group_id: &str,
        script_name: &str,
        actions: Vec<ActionNode>,
    ) -> ExecutionReport {
        self.execute_with(group_id, script_name, actions, &Map::new(), None)
            .await
    }

    /// Run a script definition inline with its initial variables
    pub async fn run_script(&self, script: &ScriptDefinition) -> ExecutionReport {
        let group_id = script.group.as_deref().unwrap_or("default");
        self.execute_with(
            group_id,
            script.display_name(),
            script.actions.clone(),
            &script.variables,
            script.exception_script.clone(),
        )
        .await
    }

    async fn execute_with(
        &self,
        group_id: &str,
        script_name: &str,
        actions: Vec<ActionNode>,
        variables: &Map<String, Value>,
        exception_script: Option<String>,
    ) -> ExecutionReport {
        let ctx = ExecutionContext::new(group_id, script_name)
            .with_variables(variables)
            .with_exception_script(exception_script);
        Execution::new(ctx, Arc::new(actions))
            .run(&self.interpreter, &self.executions)
            .await
    }
}
