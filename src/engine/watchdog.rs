// ABOUTME: Liveness watchdog scanning live executions for stalls
// ABOUTME: Dispatches the stalled execution's exception script, then cancels it

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::Result;
use super::execution::{ExecutionRegistry, StalledExecution};

/// Default polling interval, also the default stall threshold
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Receives exception-script dispatch requests for stalled executions
#[async_trait]
pub trait StallHandler: Send + Sync {
    /// Queue `script_id` on behalf of the stalled execution
    async fn dispatch_exception_script(
        &self,
        stalled: &StalledExecution,
        script_id: &str,
    ) -> Result<String>;
}

pub struct Watchdog {
    registry: Arc<ExecutionRegistry>,
    handler: Arc<dyn StallHandler>,
    interval: Duration,
    threshold: Duration,
}

impl Watchdog {
    pub fn new(registry: Arc<ExecutionRegistry>, handler: Arc<dyn StallHandler>) -> Self {
        Self {
            registry,
            handler,
            interval: DEFAULT_WATCHDOG_INTERVAL,
            threshold: DEFAULT_WATCHDOG_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Run until the token is cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.interval.as_millis() as u64,
            threshold_ms = self.threshold.as_millis() as u64,
            "Watchdog started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Watchdog shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let handled = self.sweep(Instant::now()).await;
                    if handled > 0 {
                        debug!("Watchdog handled {} stalled execution(s)", handled);
                    }
                }
            }
        }
    }

    /// One scan. Each stalled execution gets its exception script queued
    /// (if it has one) and is then cancelled whatever the dispatch outcome.
    /// Returns the number of stalled executions handled.
    pub async fn sweep(&self, now: Instant) -> usize {
        let stalled = self.registry.stalled(self.threshold, now);

        for execution in &stalled {
            warn!(
                execution_id = %execution.execution_id,
                group = %execution.group_id,
                idle_secs = execution.idle.as_secs_f64(),
                "Execution stalled: {}",
                execution.script_name
            );

            if let Some(ref script_id) = execution.exception_script {
                match self
                    .handler
                    .dispatch_exception_script(execution, script_id)
                    .await
                {
                    Ok(task_id) => info!(
                        "Exception script '{}' queued as task {} for group {}",
                        script_id, task_id, execution.group_id
                    ),
                    Err(e) => error!(
                        "Failed to dispatch exception script '{}': {}",
                        script_id, e
                    ),
                }
            }

            self.registry.cancel(&execution.execution_id);
        }

        stalled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::ExecutionContext;
    use crate::engine::error::EngineError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        dispatched: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl StallHandler for RecordingHandler {
        async fn dispatch_exception_script(
            &self,
            stalled: &StalledExecution,
            script_id: &str,
        ) -> Result<String> {
            self.dispatched
                .lock()
                .unwrap()
                .push((stalled.group_id.clone(), script_id.to_string()));
            if self.fail {
                Err(EngineError::ScriptNotFound {
                    script: script_id.to_string(),
                })
            } else {
                Ok("task-1".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_sweep_dispatches_once_and_cancels() {
        let registry = Arc::new(ExecutionRegistry::new());
        let handler = Arc::new(RecordingHandler::default());
        let watchdog = Watchdog::new(Arc::clone(&registry), handler.clone())
            .with_threshold(Duration::from_secs(60));

        let ctx = ExecutionContext::new("g1", "farm").with_exception_script(Some("recover".into()));
        let plain = ExecutionContext::new("g2", "plain");
        let _a = registry.register(&ctx);
        let _b = registry.register(&plain);

        assert_eq!(watchdog.sweep(Instant::now()).await, 0);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(watchdog.sweep(later).await, 2);
        assert!(ctx.is_cancelled());
        assert!(plain.is_cancelled());

        // already cancelled executions are not handled again
        assert_eq!(watchdog.sweep(later).await, 0);
        assert_eq!(
            *handler.dispatched.lock().unwrap(),
            vec![("g1".to_string(), "recover".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cancels_even_when_dispatch_fails() {
        let registry = Arc::new(ExecutionRegistry::new());
        let handler = Arc::new(RecordingHandler {
            fail: true,
            ..Default::default()
        });
        let watchdog = Watchdog::new(Arc::clone(&registry), handler)
            .with_threshold(Duration::from_millis(10));

        let ctx = ExecutionContext::new("g1", "farm").with_exception_script(Some("gone".into()));
        let _guard = registry.register(&ctx);

        watchdog
            .sweep(Instant::now() + Duration::from_secs(1))
            .await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let registry = Arc::new(ExecutionRegistry::new());
        let watchdog = Watchdog::new(registry, Arc::new(RecordingHandler::default()))
            .with_interval(Duration::from_millis(5));
        let token = CancellationToken::new();
        let stopper = token.clone();

        let handle = tokio::spawn(async move { watchdog.run(token).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopper.cancel();
        handle.await.unwrap();
    }
}
