// ABOUTME: End-to-end tests loading a script library into a running engine
// ABOUTME: Covers group setup from documents, snapshots and group removal

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use autoscript::capability::Capability;
use autoscript::engine::TaskStatus;
use autoscript::output::{render, OutputFormat};
use autoscript::script::{DocumentFormat, ScriptParser};

mod common;
use common::{assert_status, engine_with, fast_config, wait_for, wait_for_terminal, RecordingDevice};

const LIMIT: Duration = Duration::from_secs(5);

const LIBRARY: &str = r#"
groups:
  - id: main
    name: Main account
    exception_script: recover
  - id: alt
    name: Alt account
    enabled: false
scripts:
  - id: daily
    group: main
    autostart: true
    priority: 3
    variables:
      reward: gold
    actions:
      - type: plugin_call
        capability: device
        action: tap
        params:
          item: $reward
  - id: recover
    actions:
      - type: plugin_call
        capability: device
        action: swipe
"#;

#[tokio::test]
async fn test_library_drives_queues() {
    let device = Arc::new(RecordingDevice::default());
    let engine = engine_with(fast_config(), vec![device.clone() as Arc<dyn Capability>]).await;
    let library = ScriptParser::new()
        .parse_library_string(LIBRARY, DocumentFormat::Yaml)
        .unwrap();
    engine.load_library(&library).await.unwrap();

    let statuses = engine.all_queue_status().await;
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].exception_script.as_deref(), Some("recover"));
    assert!(!statuses[1].enabled);

    let daily = engine.submit_script("main", "daily", None).await.unwrap();
    let parked = engine.submit_script("alt", "daily", Some(1)).await.unwrap();

    engine.start().await.unwrap();
    let snapshot = wait_for_terminal(&engine, &daily, LIMIT).await;
    assert_status(&snapshot, TaskStatus::Completed);
    assert_eq!(snapshot.priority, 3);

    // disabled group keeps its task pending
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_status(&engine.query(&parked).await.unwrap(), TaskStatus::Pending);

    engine.resume_group("alt").await.unwrap();
    assert_status(&wait_for_terminal(&engine, &parked, LIMIT).await, TaskStatus::Completed);
    engine.shutdown(Duration::from_secs(1)).await.unwrap();

    let items: Vec<_> = device
        .calls()
        .into_iter()
        .map(|(_, params)| params["item"].clone())
        .collect();
    assert_eq!(items, vec![json!("gold"), json!("gold")]);
}

#[tokio::test]
async fn test_remove_group_cancels_running_task() {
    let engine = engine_with(fast_config(), Vec::new()).await;
    engine.create_group("g1", "Game").await.unwrap();
    let id = engine
        .submit(
            "g1",
            "long",
            common::actions(json!([{ "type": "wait", "duration": 30 }])),
            None,
        )
        .await
        .unwrap();

    engine.start().await.unwrap();
    wait_for(&engine, &id, LIMIT, |s| s.execution_id.is_some()).await;

    engine.remove_group("g1").await.unwrap();
    let deadline = tokio::time::Instant::now() + LIMIT;
    while !engine.running_executions().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "execution kept running");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.query(&id).await.is_err());
    engine.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_snapshots_render_as_yaml() {
    let engine = engine_with(fast_config(), Vec::new()).await;
    engine.create_group("g1", "Game").await.unwrap();
    let id = engine
        .submit("g1", "noop", common::actions(json!([])), Some(4))
        .await
        .unwrap();

    let snapshot = engine.query(&id).await.unwrap();
    let rendered = render(&snapshot, OutputFormat::Yaml).unwrap();
    assert!(rendered.contains("status: pending"));
    assert!(rendered.contains("priority: 4"));
    assert!(rendered.contains(&format!("id: {}", id)));
}
