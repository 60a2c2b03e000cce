//! Engine error model.
//!
//! Every failed stimulus maps to exactly one `EngineError` variant and leaves
//! the process instance in its last committed state.

use crate::events::EngineEventType;
use crate::types::{ExecutionId, TaskId};

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The id does not resolve to a live, active execution.
    #[error("execution {0} not found or not active")]
    ExecutionNotFound(ExecutionId),

    /// Tree-consistency violation: a child was requested under an ended or
    /// unknown execution.
    #[error("cannot create a child under execution {parent}: parent is ended or unknown")]
    InvalidParent { parent: ExecutionId },

    /// A fatal listener failed during dispatch.
    #[error("event listener failed while handling {event_type}")]
    ListenerNotification {
        event_type: EngineEventType,
        #[source]
        source: anyhow::Error,
    },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("no process definition deployed for '{0}'")]
    UnknownDefinition(String),

    #[error("process model '{key}' is invalid:\n{details}")]
    InvalidDefinition { key: String, details: String },

    #[error("execution {execution_id} at '{activity_id}' is not waiting for a signal")]
    NotWaiting {
        execution_id: ExecutionId,
        activity_id: String,
    },

    #[error("execution {execution_id} has no subscription for '{event_name}'")]
    NoSubscription {
        execution_id: ExecutionId,
        event_name: String,
    },

    #[error("no outgoing flow of '{activity_id}' can be taken")]
    NoOutgoingFlow { activity_id: String },

    #[error("activity '{activity_id}' cannot be entered through a sequence flow")]
    IllegalEntry { activity_id: String },

    #[error("cascade exceeded {limit} steps")]
    CascadeLimitExceeded { limit: usize },

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}
