use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Discriminant of every event the runtime dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEventType {
    ActivitySignaled,
    ActivityMessageReceived,
    ActivityCompensate,
}

impl EngineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActivitySignaled => "ACTIVITY_SIGNALED",
            Self::ActivityMessageReceived => "ACTIVITY_MESSAGE_RECEIVED",
            Self::ActivityCompensate => "ACTIVITY_COMPENSATE",
        }
    }
}

impl std::fmt::Display for EngineEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields shared by every event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub execution_id: ExecutionId,
    pub process_instance_id: ProcessInstanceId,
    pub process_definition_id: String,
    pub activity_id: ActivityId,
}

/// Plain lifecycle markers carried by `EngineEvent::Activity`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityEventKind {
    /// A compensation handler is about to run.
    Compensate,
}

/// Runtime events, one per semantically meaningful state transition.
/// Dispatched to listeners, never stored by the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant")]
pub enum EngineEvent {
    Activity {
        kind: ActivityEventKind,
        #[serde(flatten)]
        envelope: EventEnvelope,
    },
    /// An execution was signaled past its activity. Name and data are absent
    /// for a plain API signal.
    Signal {
        #[serde(flatten)]
        envelope: EventEnvelope,
        signal_name: Option<String>,
        signal_data: Option<Variables>,
    },
    Message {
        #[serde(flatten)]
        envelope: EventEnvelope,
        message_name: String,
        message_data: Option<Variables>,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> EngineEventType {
        match self {
            EngineEvent::Activity {
                kind: ActivityEventKind::Compensate,
                ..
            } => EngineEventType::ActivityCompensate,
            EngineEvent::Signal { .. } => EngineEventType::ActivitySignaled,
            EngineEvent::Message { .. } => EngineEventType::ActivityMessageReceived,
        }
    }

    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            EngineEvent::Activity { envelope, .. }
            | EngineEvent::Signal { envelope, .. }
            | EngineEvent::Message { envelope, .. } => envelope,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.envelope().execution_id
    }

    pub fn process_instance_id(&self) -> ProcessInstanceId {
        self.envelope().process_instance_id
    }

    pub fn process_definition_id(&self) -> &str {
        &self.envelope().process_definition_id
    }

    pub fn activity_id(&self) -> &str {
        &self.envelope().activity_id
    }
}

/// Observer of runtime events.
///
/// Called synchronously while the emitting process instance is locked. An
/// implementation must not call the engine at all for that same instance:
/// stimuli and queries (`find_executions`, `execution`, `tasks`, ...) both
/// wait on the lock and deadlock. Other instances can be queried.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()>;

    /// Whether an error from `on_event` aborts the dispatch and the stimulus
    /// that caused it. When `false` the error is logged and skipped.
    fn fail_on_error(&self) -> bool {
        true
    }
}

/// Listener that keeps every received event in dispatch order.
#[derive(Debug, Default)]
pub struct BufferingListener {
    events: Mutex<Vec<EngineEvent>>,
}

impl BufferingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.lock().clone()
    }

    /// Drain the buffer.
    pub fn take(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EngineEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventListener for BufferingListener {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self.lock().push(event.clone());
        Ok(())
    }
}
