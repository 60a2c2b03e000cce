#![allow(dead_code)]

use bpmn_runtime_core::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const SIGNAL_PROCESS: &str = include_str!("../models/signal-process.yaml");
pub const SIGNAL_WITHIN_PROCESS: &str = include_str!("../models/signal-within-process.yaml");
pub const MESSAGE_PROCESS: &str = include_str!("../models/message-process.yaml");
pub const MESSAGE_EVENT_SUBPROCESS: &str =
    include_str!("../models/message-event-subprocess.yaml");
pub const COMPENSATION_PROCESS: &str = include_str!("../models/compensation-process.yaml");

/// Route engine logs to the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory engine with `models` deployed and a buffering listener attached.
pub fn engine_with(models: &[&str]) -> (RuntimeEngine, Arc<BufferingListener>) {
    init_tracing();
    let engine = RuntimeEngine::in_memory();
    for model in models {
        engine.deploy_yaml(model).unwrap();
    }
    let events = Arc::new(BufferingListener::new());
    assert!(engine.add_event_listener(events.clone()));
    (engine, events)
}

pub fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// The one live execution at `activity_id`.
pub fn single(engine: &RuntimeEngine, pi: ProcessInstanceId, activity_id: &str) -> Execution {
    let mut found = engine.find_executions(pi, activity_id);
    assert_eq!(
        found.len(),
        1,
        "expected exactly one execution at '{activity_id}', found {}",
        found.len()
    );
    found.remove(0)
}

/// The one open task of an instance.
pub fn single_task(engine: &RuntimeEngine, pi: ProcessInstanceId) -> Task {
    let mut tasks = engine.tasks(pi);
    assert_eq!(tasks.len(), 1, "expected exactly one open task: {tasks:?}");
    tasks.remove(0)
}

/// `(event type, activity id)` pairs, for order assertions.
pub fn trace(events: &[EngineEvent]) -> Vec<(EngineEventType, String)> {
    events
        .iter()
        .map(|e| (e.event_type(), e.activity_id().to_string()))
        .collect()
}
