// ABOUTME: Integration tests for the script engine, scheduler and watchdog
// ABOUTME: Drives real queues with mock capabilities and short timings

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use autoscript::capability::{Capability, UnconfiguredOcr};
use autoscript::engine::{EngineConfig, EngineError, ExecutionState, ScriptEngine, TaskStatus};
use autoscript::script::ScriptDefinition;

mod common;
use common::{
    actions, assert_status, engine_with, fast_config, registry_with, vars, wait_for,
    wait_for_terminal, BlockingCapability, FixedMatcher, FlakyCapability, RecordingDevice,
};

const LIMIT: Duration = Duration::from_secs(5);

fn tap(label: &str) -> serde_json::Value {
    json!({
        "type": "plugin_call",
        "capability": "device",
        "action": "tap",
        "params": { "label": label }
    })
}

#[tokio::test]
async fn test_scheduler_runs_tasks_by_priority() {
    let device = Arc::new(RecordingDevice::default());
    let engine = engine_with(fast_config(), vec![device.clone() as Arc<dyn Capability>]).await;
    engine.create_group("g1", "Game").await.unwrap();

    let a = engine.submit("g1", "a", actions(json!([tap("A")])), Some(5)).await.unwrap();
    let b = engine.submit("g1", "b", actions(json!([tap("B")])), Some(10)).await.unwrap();
    let c = engine.submit("g1", "c", actions(json!([tap("C")])), Some(5)).await.unwrap();

    engine.start().await.unwrap();
    for id in [&a, &b, &c] {
        assert_status(&wait_for_terminal(&engine, id, LIMIT).await, TaskStatus::Completed);
    }
    engine.shutdown(Duration::from_secs(1)).await.unwrap();

    let labels: Vec<String> = device
        .calls()
        .into_iter()
        .map(|(_, params)| params["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["B", "A", "C"]);
}

#[tokio::test]
async fn test_retries_exhaust_to_failed() {
    let flaky = Arc::new(FlakyCapability::new(u32::MAX));
    let engine = engine_with(fast_config(), vec![flaky.clone() as Arc<dyn Capability>]).await;
    engine.create_group("g1", "Game").await.unwrap();

    let mut script = ScriptDefinition::new(
        "unstable",
        actions(json!([{ "type": "plugin_call", "capability": "flaky", "action": "run" }])),
    );
    script.max_retries = Some(2);
    engine.register_script(script).await;
    let id = engine.submit_script("g1", "unstable", None).await.unwrap();

    engine.start().await.unwrap();
    let snapshot = wait_for_terminal(&engine, &id, LIMIT).await;
    engine.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_status(&snapshot, TaskStatus::Failed);
    assert_eq!(snapshot.retry_count, 2);
    assert_eq!(flaky.calls(), 3);
    assert_eq!(snapshot.error.as_deref(), Some("attempt 3 failed"));
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let flaky = Arc::new(FlakyCapability::new(1));
    let engine = engine_with(fast_config(), vec![flaky.clone() as Arc<dyn Capability>]).await;
    engine.create_group("g1", "Game").await.unwrap();

    let id = engine
        .submit(
            "g1",
            "recovering",
            actions(json!([{ "type": "plugin_call", "capability": "flaky", "action": "run" }])),
            None,
        )
        .await
        .unwrap();

    engine.start().await.unwrap();
    let snapshot = wait_for_terminal(&engine, &id, LIMIT).await;
    engine.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_status(&snapshot, TaskStatus::Completed);
    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(snapshot.result, Some(json!({ "attempt": 2 })));
}

#[tokio::test]
async fn test_unsupported_action_policy() {
    let tree = json!([{ "type": "teleport", "destination": "moon" }]);

    let engine = engine_with(fast_config(), Vec::new()).await;
    engine.create_group("g1", "Game").await.unwrap();
    let id = engine.submit("g1", "bad", actions(tree.clone()), None).await.unwrap();
    engine.start().await.unwrap();
    let snapshot = wait_for_terminal(&engine, &id, LIMIT).await;
    engine.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_status(&snapshot, TaskStatus::Failed);
    assert_eq!(snapshot.retry_count, 3);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("unsupported action kind: teleport")
    );

    let mut config = fast_config();
    config.retry.retry_unsupported_actions = false;
    let engine = engine_with(config, Vec::new()).await;
    engine.create_group("g1", "Game").await.unwrap();
    let id = engine.submit("g1", "bad", actions(tree), None).await.unwrap();
    engine.start().await.unwrap();
    let snapshot = wait_for_terminal(&engine, &id, LIMIT).await;
    engine.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_status(&snapshot, TaskStatus::Failed);
    assert_eq!(snapshot.retry_count, 0);
}

#[tokio::test]
async fn test_one_running_task_per_group() {
    let engine = engine_with(fast_config(), Vec::new()).await;
    engine.create_group("g1", "First").await.unwrap();
    engine.create_group("g2", "Second").await.unwrap();

    let slow = json!([{ "type": "wait", "duration": 0.1 }]);
    let mut ids = Vec::new();
    for group in ["g1", "g1", "g1", "g2", "g2"] {
        ids.push(engine.submit(group, "slow", actions(slow.clone()), None).await.unwrap());
    }

    engine.start().await.unwrap();
    let mut saw_both_groups = false;
    let deadline = tokio::time::Instant::now() + LIMIT;
    loop {
        let statuses = engine.all_queue_status().await;
        let running: Vec<_> = engine.running_executions();
        for group in ["g1", "g2"] {
            assert!(running.iter().filter(|e| e.group_id == group).count() <= 1);
        }
        if running.len() == 2 {
            saw_both_groups = true;
        }
        if statuses.iter().all(|s| s.queue_length == 0 && s.running.is_none()) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "queues never drained");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    engine.shutdown(Duration::from_secs(1)).await.unwrap();

    assert!(saw_both_groups, "groups should run concurrently");
    for id in &ids {
        assert_status(&engine.query(id).await.unwrap(), TaskStatus::Completed);
    }
}

#[tokio::test]
async fn test_cancel_running_task() {
    let engine = engine_with(fast_config(), Vec::new()).await;
    engine.create_group("g1", "Game").await.unwrap();

    let id = engine
        .submit(
            "g1",
            "long",
            actions(json!([{ "type": "wait", "duration": 30 }])),
            None,
        )
        .await
        .unwrap();
    engine.start().await.unwrap();

    let running = wait_for(&engine, &id, LIMIT, |s| s.execution_id.is_some()).await;
    assert_status(&running, TaskStatus::Running);
    assert!(engine.cancel(&id).await);

    let snapshot = wait_for_terminal(&engine, &id, LIMIT).await;
    engine.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_status(&snapshot, TaskStatus::Cancelled);
    assert_eq!(snapshot.retry_count, 0);
    assert!(engine.running_executions().is_empty());
}

#[tokio::test]
async fn test_cancel_pending_task_never_runs() {
    let device = Arc::new(RecordingDevice::default());
    let engine = engine_with(fast_config(), vec![device.clone() as Arc<dyn Capability>]).await;
    engine.create_group("g1", "Game").await.unwrap();
    engine.pause_group("g1").await.unwrap();

    let id = engine.submit("g1", "tap", actions(json!([tap("X")])), None).await.unwrap();
    engine.start().await.unwrap();
    assert!(engine.cancel(&id).await);
    engine.resume_group("g1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.shutdown(Duration::from_secs(1)).await.unwrap();

    let snapshot = engine.query(&id).await.unwrap();
    assert_status(&snapshot, TaskStatus::Cancelled);
    assert!(snapshot.started_at.is_none());
    assert!(device.calls().is_empty());
}

#[tokio::test]
async fn test_watchdog_cancels_stalled_execution_and_dispatches_once() {
    let device = Arc::new(RecordingDevice::default());
    let engine = engine_with(fast_config(), vec![device.clone() as Arc<dyn Capability>]).await;
    engine.create_group("g1", "Game").await.unwrap();

    engine
        .register_script(ScriptDefinition::new("recover", actions(json!([tap("recover")]))))
        .await;
    engine
        .set_group_exception_script("g1", Some("recover"))
        .await
        .unwrap();

    let stuck = engine
        .submit(
            "g1",
            "stuck",
            actions(json!([{ "type": "wait", "duration": 30 }])),
            None,
        )
        .await
        .unwrap();
    engine.start().await.unwrap();

    let snapshot = wait_for_terminal(&engine, &stuck, LIMIT).await;
    assert_status(&snapshot, TaskStatus::Cancelled);
    assert_eq!(snapshot.retry_count, 0);

    // let the recovery task run and give the watchdog time to misbehave
    tokio::time::sleep(Duration::from_millis(400)).await;
    let handlers: Vec<_> = engine
        .group_tasks("g1")
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.script_id.as_deref() == Some("recover"))
        .collect();
    assert_eq!(handlers.len(), 1);
    assert_eq!(handlers[0].priority, 100);
    let handler = wait_for_terminal(&engine, &handlers[0].id, LIMIT).await;
    assert_status(&handler, TaskStatus::Completed);

    engine.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(device.actions_called(), vec!["tap"]);
}

#[tokio::test]
async fn test_variables_flow_into_capability_params() {
    let device = Arc::new(RecordingDevice::default());
    let registry = registry_with(vec![device.clone() as Arc<dyn Capability>]).await;
    let engine = ScriptEngine::new(
        EngineConfig::default(),
        registry,
        Arc::new(FixedMatcher { x: 120, y: 340 }),
        Arc::new(UnconfiguredOcr),
    );

    let mut script = ScriptDefinition::new(
        "collect",
        actions(json!([
            { "type": "plugin_call", "capability": "device", "action": "screenshot" },
            {
                "type": "condition",
                "condition_type": "template_match",
                "template_path": "reward.png",
                "input_image": "$screenshot",
                "on_true": [{
                    "type": "plugin_call",
                    "capability": "device",
                    "action": "tap",
                    "params": { "x": "$match_x", "y": "$match_y", "account": "$account" }
                }]
            }
        ])),
    );
    script.variables = vars(json!({ "account": "main" }));

    let report = engine.run_script(&script).await;
    assert_eq!(report.state, ExecutionState::Completed, "{:?}", report.error);
    assert_eq!(report.variables.get("match_x"), Some(&json!(120)));

    let calls = device.calls();
    assert_eq!(calls.len(), 2);
    let (action, params) = &calls[1];
    assert_eq!(action, "tap");
    assert_eq!(params.get("x"), Some(&json!(120)));
    assert_eq!(params.get("y"), Some(&json!(340)));
    assert_eq!(params.get("account"), Some(&json!("main")));
}

#[tokio::test]
async fn test_shutdown_times_out_on_blocking_driver() {
    let engine = engine_with(
        fast_config(),
        vec![Arc::new(BlockingCapability) as Arc<dyn Capability>],
    )
    .await;
    engine.create_group("g1", "Game").await.unwrap();
    let id = engine
        .submit(
            "g1",
            "blocked",
            actions(json!([{
                "type": "plugin_call",
                "capability": "blocking",
                "action": "block",
                "params": { "millis": 2000 }
            }])),
            None,
        )
        .await
        .unwrap();

    engine.start().await.unwrap();
    wait_for(&engine, &id, LIMIT, |s| s.execution_id.is_some()).await;

    let result = engine.shutdown(Duration::from_millis(50)).await;
    assert!(matches!(
        result,
        Err(EngineError::ShutdownTimeout { remaining: 1, .. })
    ));
}

#[tokio::test]
async fn test_pause_all_holds_queues() {
    let device = Arc::new(RecordingDevice::default());
    let engine = engine_with(fast_config(), vec![device.clone() as Arc<dyn Capability>]).await;
    engine.create_group("g1", "Game").await.unwrap();

    engine.pause_all();
    let id = engine.submit("g1", "tap", actions(json!([tap("P")])), None).await.unwrap();
    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_status(&engine.query(&id).await.unwrap(), TaskStatus::Pending);

    engine.resume_all();
    assert_status(&wait_for_terminal(&engine, &id, LIMIT).await, TaskStatus::Completed);
    engine.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(device.calls().len(), 1);
}
