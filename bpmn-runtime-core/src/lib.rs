//! Execution-tree runtime for BPMN process instances.
//!
//! Tracks every concurrently active token of a process instance, advances
//! tokens as activities complete, and reports each transition to registered
//! listeners through a synchronous, ordered event stream:
//! - `tree` - the arena of executions of one instance
//! - `dispatcher` - listener registry and event bus
//! - signal, message and compensation protocols driven by `RuntimeEngine`
//!
//! Process models arrive as structured DTOs (or YAML) through a
//! `DefinitionRepository`.

pub mod compensation;
pub mod config;
pub mod definition;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod repository;
pub mod tree;
pub mod types;

mod cascade;
mod message;
mod signal;

pub use config::EngineConfig;
pub use definition::{parse_process_yaml, ProcessDefinition, ProcessModel};
pub use dispatcher::EventDispatcher;
pub use engine::RuntimeEngine;
pub use error::{EngineError, Result};
pub use events::{
    ActivityEventKind, BufferingListener, EngineEvent, EngineEventType, EventEnvelope,
    EventListener,
};
pub use repository::{DefinitionRepository, MemoryDefinitionRepository};
pub use types::*;
