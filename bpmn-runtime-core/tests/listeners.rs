//! Listener registration and failure handling through the engine facade.

mod common;

use anyhow::{bail, Context};
use bpmn_runtime_core::*;
use common::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

/// Rejects every event.
struct Failing {
    fatal: bool,
    calls: AtomicUsize,
}

impl Failing {
    fn new(fatal: bool) -> Arc<Self> {
        Arc::new(Self {
            fatal,
            calls: AtomicUsize::new(0),
        })
    }
}

impl EventListener for Failing {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("listener refused {}", event.event_type())
    }

    fn fail_on_error(&self) -> bool {
        self.fatal
    }
}

/// Reads a second instance from inside each dispatch.
struct Observer {
    engine: OnceLock<Weak<RuntimeEngine>>,
    watched: ProcessInstanceId,
    seen: Mutex<Vec<bool>>,
}

impl EventListener for Observer {
    fn on_event(&self, _event: &EngineEvent) -> anyhow::Result<()> {
        let engine = self
            .engine
            .get()
            .and_then(Weak::upgrade)
            .context("engine dropped")?;
        let running = engine
            .process_instance(self.watched)
            .is_some_and(|p| !p.is_ended());
        self.seen.lock().unwrap().push(running);
        Ok(())
    }
}

#[test]
fn test_failing_listener_rolls_back_stimulus() {
    let (engine, events) = engine_with(&[SIGNAL_PROCESS]);
    let pi = engine.start_process_instance("signalProcess", None).unwrap();
    let payment = single(&engine, pi.id, "receivePayment");

    let failing = Failing::new(true);
    let handle: Arc<dyn EventListener> = failing.clone();
    assert!(engine.add_event_listener(handle.clone()));

    let err = engine
        .signal_with_variables(payment.id, vars(&[("paid", json!(true))]))
        .unwrap_err();
    match &err {
        EngineError::ListenerNotification { event_type, source } => {
            assert_eq!(*event_type, EngineEventType::ActivitySignaled);
            assert!(source.to_string().contains("ACTIVITY_SIGNALED"));
        }
        other => panic!("expected ListenerNotification, got {other:?}"),
    }
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1);

    // The buffering listener came first and saw the event; the instance did
    // not move.
    assert_eq!(events.take().len(), 1);
    let still = single(&engine, pi.id, "receivePayment");
    assert!(still.is_active);
    assert!(engine.variables(still.id).unwrap().get("paid").is_none());

    assert!(engine.remove_event_listener(&handle));
    engine.signal(payment.id).unwrap();
    assert_eq!(events.take().len(), 1);
    assert!(engine.find_executions(pi.id, "receivePayment").is_empty());
    assert_eq!(single(&engine, pi.id, "join").id, payment.id);
}

#[test]
fn test_failing_typed_listener_rolls_back_task_completion() {
    let (engine, _events) = engine_with(&[COMPENSATION_PROCESS]);
    let failing = Failing::new(true);
    engine.add_typed_event_listener(failing.clone(), &[EngineEventType::ActivityCompensate]);

    let pi = engine
        .start_process_instance("compensationProcess", None)
        .unwrap();
    let task = single_task(&engine, pi.id);

    assert!(matches!(
        engine.complete_task(task.task_id, None),
        Err(EngineError::ListenerNotification {
            event_type: EngineEventType::ActivityCompensate,
            ..
        })
    ));
    // Task is back; instance still running.
    assert_eq!(single_task(&engine, pi.id).task_id, task.task_id);
    assert!(!engine.process_instance(pi.id).unwrap().is_ended());
}

#[test]
fn test_non_fatal_listener_is_skipped() {
    let (engine, events) = engine_with(&[MESSAGE_PROCESS]);
    let failing = Failing::new(false);
    engine.add_event_listener(failing.clone());

    let pi = engine.start_process_instance("messageProcess", None).unwrap();
    engine
        .message_event_received("messageName", pi.id, None)
        .unwrap();

    assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    assert_eq!(events.len(), 2);
    assert!(engine.process_instance(pi.id).unwrap().is_ended());
}

#[test]
fn test_typed_listener_sees_only_its_types() {
    let (engine, all) = engine_with(&[MESSAGE_PROCESS]);
    let messages = Arc::new(BufferingListener::new());
    assert!(engine.add_typed_event_listener(
        messages.clone(),
        &[EngineEventType::ActivityMessageReceived]
    ));

    let pi = engine.start_process_instance("messageProcess", None).unwrap();
    engine
        .message_event_received("messageName", pi.id, None)
        .unwrap();

    assert_eq!(all.len(), 2);
    let only = messages.take();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].event_type(), EngineEventType::ActivityMessageReceived);
}

#[test]
fn test_duplicate_registration_is_ignored() {
    let (engine, events) = engine_with(&[SIGNAL_PROCESS]);
    assert!(!engine.add_event_listener(events.clone()));
    assert!(!engine.add_typed_event_listener(
        events.clone(),
        &[EngineEventType::ActivitySignaled]
    ));
    assert_eq!(engine.dispatcher().listener_count(), 1);

    let pi = engine.start_process_instance("signalProcess", None).unwrap();
    let payment = single(&engine, pi.id, "receivePayment");
    engine.signal(payment.id).unwrap();
    assert_eq!(events.len(), 1, "delivered once per registration");
}

#[test]
fn test_removed_listener_stops_receiving() {
    let (engine, events) = engine_with(&[SIGNAL_PROCESS]);
    let handle: Arc<dyn EventListener> = events.clone();
    assert!(engine.remove_event_listener(&handle));
    assert!(!engine.remove_event_listener(&handle));

    let pi = engine.start_process_instance("signalProcess", None).unwrap();
    engine
        .signal(single(&engine, pi.id, "receivePayment").id)
        .unwrap();
    assert!(events.is_empty());
}

#[test]
fn test_listener_may_query_other_instances() {
    let (engine, _events) = engine_with(&[MESSAGE_PROCESS]);
    let engine = Arc::new(engine);
    let busy = engine.start_process_instance("messageProcess", None).unwrap();
    let watched = engine.start_process_instance("messageProcess", None).unwrap();

    let observer = Arc::new(Observer {
        engine: OnceLock::new(),
        watched: watched.id,
        seen: Mutex::new(Vec::new()),
    });
    observer.engine.set(Arc::downgrade(&engine)).unwrap();
    assert!(engine.add_event_listener(observer.clone()));

    // Only the instance being dispatched for is locked.
    engine
        .message_event_received("messageName", busy.id, None)
        .unwrap();
    assert_eq!(*observer.seen.lock().unwrap(), vec![true, true]);
    assert!(engine.process_instance(busy.id).unwrap().is_ended());
    assert!(!engine.process_instance(watched.id).unwrap().is_ended());
}

#[test]
fn test_event_json_serialization() {
    let (engine, events) = engine_with(&[MESSAGE_PROCESS]);
    let pi = engine.start_process_instance("messageProcess", None).unwrap();
    engine
        .message_event_received("messageName", pi.id, Some(vars(&[("n", json!(1))])))
        .unwrap();

    let received = events.events();
    let message = serde_json::to_value(&received[0]).unwrap();
    assert_eq!(message["variant"], "Message");
    assert_eq!(message["activity_id"], "shipOrder");
    assert_eq!(message["message_name"], "messageName");
    assert_eq!(message["message_data"]["n"], 1);
    assert_eq!(message["process_instance_id"], json!(pi.id.to_string()));

    let back: EngineEvent = serde_json::from_value(message).unwrap();
    assert_eq!(back, received[0]);
}
