// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides mock capabilities, fast engine configs and polling helpers

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use autoscript::capability::{
    Capability, CapabilityError, CapabilityRegistry, MatchResult, Params, TemplateMatcher,
};
use autoscript::engine::{EngineConfig, EngineError, ScriptEngine, TaskSnapshot, TaskStatus};
use autoscript::script::ActionNode;

/// Device double that records every call and returns canned results
#[derive(Default)]
pub struct RecordingDevice {
    calls: Mutex<Vec<(String, Params)>>,
}

impl RecordingDevice {
    pub fn calls(&self) -> Vec<(String, Params)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|(action, _)| action).collect()
    }
}

#[async_trait]
impl Capability for RecordingDevice {
    fn name(&self) -> &str {
        "device"
    }

    fn list_actions(&self) -> Vec<String> {
        vec!["tap".into(), "screenshot".into(), "swipe".into()]
    }

    async fn invoke(&self, action: &str, params: &Params) -> autoscript::capability::Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((action.to_string(), params.clone()));
        match action {
            "screenshot" => Ok(json!({ "screenshot_path": "/tmp/screen.png" })),
            _ => Ok(json!({ "ok": true })),
        }
    }
}

/// Fails `run` until it has been called `failures` times
pub struct FlakyCapability {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyCapability {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for FlakyCapability {
    fn name(&self) -> &str {
        "flaky"
    }

    fn list_actions(&self) -> Vec<String> {
        vec!["run".into()]
    }

    async fn invoke(
        &self,
        _action: &str,
        _params: &Params,
    ) -> autoscript::capability::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(CapabilityError::ActionFailed(format!("attempt {} failed", call)))
        } else {
            Ok(json!({ "attempt": call }))
        }
    }
}

/// Driver call that ignores cancellation and sleeps for `millis`
pub struct BlockingCapability;

#[async_trait]
impl Capability for BlockingCapability {
    fn name(&self) -> &str {
        "blocking"
    }

    fn list_actions(&self) -> Vec<String> {
        vec!["block".into()]
    }

    async fn invoke(
        &self,
        _action: &str,
        params: &Params,
    ) -> autoscript::capability::Result<Value> {
        let millis = params.get("millis").and_then(Value::as_u64).unwrap_or(1000);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(json!({ "slept_ms": millis }))
    }
}

/// Matcher that always finds the template at a fixed point
pub struct FixedMatcher {
    pub x: i64,
    pub y: i64,
}

#[async_trait]
impl TemplateMatcher for FixedMatcher {
    async fn match_template(
        &self,
        _image: &str,
        _template: &str,
        threshold: f64,
    ) -> autoscript::capability::Result<MatchResult> {
        Ok(MatchResult {
            found: true,
            x: self.x,
            y: self.y,
            width: 10,
            height: 10,
            confidence: threshold.max(0.95),
        })
    }
}

/// Short timings so scheduler and watchdog scenarios finish quickly
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        scheduler_tick: Duration::from_millis(10),
        watchdog_interval: Duration::from_millis(20),
        stall_threshold: Some(Duration::from_millis(300)),
        ..EngineConfig::default()
    }
}

pub async fn registry_with(capabilities: Vec<Arc<dyn Capability>>) -> Arc<CapabilityRegistry> {
    let registry = CapabilityRegistry::new();
    for capability in capabilities {
        registry.register(capability).await;
    }
    Arc::new(registry)
}

pub async fn engine_with(
    config: EngineConfig,
    capabilities: Vec<Arc<dyn Capability>>,
) -> ScriptEngine {
    ScriptEngine::with_registry(config, registry_with(capabilities).await)
}

pub fn actions(value: Value) -> Vec<ActionNode> {
    serde_json::from_value(value).expect("valid action tree")
}

pub fn vars(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("variables must be an object"),
    }
}

/// Poll `query` until the task reaches a terminal status
pub async fn wait_for_terminal(
    engine: &ScriptEngine,
    task_id: &str,
    limit: Duration,
) -> TaskSnapshot {
    wait_for(engine, task_id, limit, |s| s.status.is_terminal()).await
}

pub async fn wait_for<F>(
    engine: &ScriptEngine,
    task_id: &str,
    limit: Duration,
    predicate: F,
) -> TaskSnapshot
where
    F: Fn(&TaskSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let snapshot = engine.query(task_id).await.expect("task is known");
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "task {} did not reach the expected state, last status {:?}",
                task_id, snapshot.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn assert_status(snapshot: &TaskSnapshot, status: TaskStatus) {
    assert_eq!(
        snapshot.status, status,
        "task {} error: {:?}",
        snapshot.id, snapshot.error
    );
}

pub fn is_not_found(result: &Result<TaskSnapshot, EngineError>) -> bool {
    matches!(result, Err(EngineError::TaskNotFound { .. }))
}

pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, content).expect("Failed to write fixture");
        path
    }
}
