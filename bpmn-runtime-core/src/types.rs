use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ─── Scalar aliases ───────────────────────────────────────────

/// Execution (token) identifier.
pub type ExecutionId = Uuid;

/// Process instance identifier. Always equal to the root execution's id.
pub type ProcessInstanceId = Uuid;

/// User task identifier.
pub type TaskId = Uuid;

/// Activity id as declared in the process model.
pub type ActivityId = String;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Process variables and event payloads.
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Reserved signal name used to resume a compensation thrower.
pub const COMPENSATION_DONE_SIGNAL: &str = "compensationDone";

// ─── Execution ────────────────────────────────────────────────

/// One node of an execution tree: a concurrently active control-flow token,
/// or a container for such tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub parent: Option<ExecutionId>,
    pub process_instance_id: ProcessInstanceId,
    /// Where the token currently sits. `None` for containers.
    pub activity_id: Option<ActivityId>,
    /// Sub-process or host activity this execution is the scope of.
    /// `None` for the process-instance root and for non-scope executions.
    pub scope_activity: Option<ActivityId>,
    pub is_scope: bool,
    pub is_concurrent: bool,
    /// Holds a token at `activity_id`.
    pub is_active: bool,
    pub is_ended: bool,
    /// Live children in creation order.
    pub children: Vec<ExecutionId>,
    pub variables: Variables,
}

impl Execution {
    /// The root execution of a new process instance.
    pub fn root(id: ExecutionId) -> Self {
        Self {
            id,
            parent: None,
            process_instance_id: id,
            activity_id: None,
            scope_activity: None,
            is_scope: true,
            is_concurrent: false,
            is_active: true,
            is_ended: false,
            children: Vec::new(),
            variables: Variables::new(),
        }
    }

    pub(crate) fn child_of(parent: &Execution) -> Self {
        Self {
            id: Uuid::now_v7(),
            parent: Some(parent.id),
            process_instance_id: parent.process_instance_id,
            activity_id: None,
            scope_activity: None,
            is_scope: false,
            is_concurrent: false,
            is_active: true,
            is_ended: false,
            children: Vec::new(),
            variables: Variables::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Not ended and holding a token.
    pub fn is_waiting_at(&self, activity_id: &str) -> bool {
        !self.is_ended && self.is_active && self.activity_id.as_deref() == Some(activity_id)
    }
}

// ─── Process instance ─────────────────────────────────────────

/// Top-level process state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Running,
    Completed { at: Timestamp },
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Completed { .. })
    }
}

/// Snapshot of one running instantiation of a process definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: ProcessInstanceId,
    pub process_definition_id: String,
    pub process_key: String,
    pub state: ProcessState,
    pub created_at: Timestamp,
}

impl ProcessInstance {
    /// Same value as `id`; mirrors the execution-side accessor.
    pub fn process_instance_id(&self) -> ProcessInstanceId {
        self.id
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_terminal()
    }
}

// ─── Tasks ────────────────────────────────────────────────────

/// A user task waiting for completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub execution_id: ExecutionId,
    pub process_instance_id: ProcessInstanceId,
    pub activity_id: ActivityId,
    pub name: Option<String>,
    pub created_at: Timestamp,
}

pub(crate) fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
