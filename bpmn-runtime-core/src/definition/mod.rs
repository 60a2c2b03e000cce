//! Process definitions: the authoring DTO, its validation, and the compiled
//! lookup structure the runtime walks.

pub mod dto;
pub mod validate;
pub mod yaml;

use crate::error::{EngineError, Result};
use crate::types::ActivityId;
use dto::*;
use std::collections::HashMap;

pub use dto::ProcessModel;
pub use validate::{validate_model, ValidationError};
pub use yaml::parse_process_yaml;

// ─── Compiled form ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityKind {
    Start,
    MessageStart { message: String },
    End,
    UserTask { name: Option<String> },
    ReceiveTask,
    ServiceTask { for_compensation: bool },
    CatchSignal { signal: String },
    CatchMessage { message: String },
    ThrowSignal { signal: String },
    ThrowCompensation { activity: Option<ActivityId> },
    ExclusiveGateway,
    ParallelGateway,
    SubProcess,
    EventSubProcess,
    Boundary {
        host: ActivityId,
        trigger: BoundaryTrigger,
        cancel_activity: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: ActivityId,
    /// Enclosing sub-process; `None` at process level.
    pub parent: Option<ActivityId>,
    pub kind: ActivityKind,
}

impl Activity {
    /// Positions a token can rest at until an external stimulus arrives.
    pub fn is_wait_state(&self) -> bool {
        matches!(
            self.kind,
            ActivityKind::UserTask { .. }
                | ActivityKind::ReceiveTask
                | ActivityKind::CatchSignal { .. }
                | ActivityKind::CatchMessage { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceFlow {
    pub target: ActivityId,
    pub condition: Option<VariableCondition>,
    pub is_default: bool,
}

/// Validated, immutable process definition. Identified by `key:version`.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    pub id: String,
    pub key: String,
    pub version: u32,
    pub name: Option<String>,
    activities: HashMap<ActivityId, Activity>,
    outgoing: HashMap<ActivityId, Vec<SequenceFlow>>,
    incoming: HashMap<ActivityId, usize>,
    /// host → boundary ids, declaration order.
    boundaries: HashMap<ActivityId, Vec<ActivityId>>,
    /// scope (None = process) → start event.
    starts: HashMap<Option<ActivityId>, ActivityId>,
    /// scope (None = process) → event sub-processes, declaration order.
    event_subprocesses: HashMap<Option<ActivityId>, Vec<ActivityId>>,
    /// event sub-process → its message start.
    message_starts: HashMap<ActivityId, ActivityId>,
}

impl ProcessDefinition {
    /// Validate `model` and build the definition for the given version.
    pub fn compile(model: &ProcessModel, version: u32) -> Result<Self> {
        let errors = validate_model(model);
        if !errors.is_empty() {
            return Err(EngineError::InvalidDefinition {
                key: model.key.clone(),
                details: errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
            });
        }

        let mut def = ProcessDefinition {
            id: format!("{}:{}", model.key, version),
            key: model.key.clone(),
            version,
            name: model.name.clone(),
            activities: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            boundaries: HashMap::new(),
            starts: HashMap::new(),
            event_subprocesses: HashMap::new(),
            message_starts: HashMap::new(),
        };

        for node in &model.nodes {
            let parent = node.parent().map(str::to_string);
            let kind = match node {
                NodeDto::Start { id, .. } => {
                    def.starts.insert(parent.clone(), id.clone());
                    ActivityKind::Start
                }
                NodeDto::MessageStart { id, message, .. } => {
                    if let Some(es) = &parent {
                        def.message_starts.insert(es.clone(), id.clone());
                    }
                    ActivityKind::MessageStart {
                        message: message.clone(),
                    }
                }
                NodeDto::End { .. } => ActivityKind::End,
                NodeDto::UserTask { name, .. } => ActivityKind::UserTask { name: name.clone() },
                NodeDto::ReceiveTask { .. } => ActivityKind::ReceiveTask,
                NodeDto::ServiceTask {
                    for_compensation, ..
                } => ActivityKind::ServiceTask {
                    for_compensation: *for_compensation,
                },
                NodeDto::CatchSignal { signal, .. } => ActivityKind::CatchSignal {
                    signal: signal.clone(),
                },
                NodeDto::CatchMessage { message, .. } => ActivityKind::CatchMessage {
                    message: message.clone(),
                },
                NodeDto::ThrowSignal { signal, .. } => ActivityKind::ThrowSignal {
                    signal: signal.clone(),
                },
                NodeDto::ThrowCompensation { activity, .. } => ActivityKind::ThrowCompensation {
                    activity: activity.clone(),
                },
                NodeDto::ExclusiveGateway { .. } => ActivityKind::ExclusiveGateway,
                NodeDto::ParallelGateway { .. } => ActivityKind::ParallelGateway,
                NodeDto::SubProcess { .. } => ActivityKind::SubProcess,
                NodeDto::EventSubProcess { id, .. } => {
                    def.event_subprocesses
                        .entry(parent.clone())
                        .or_default()
                        .push(id.clone());
                    ActivityKind::EventSubProcess
                }
                NodeDto::Boundary {
                    id,
                    host,
                    trigger,
                    cancel_activity,
                    ..
                } => {
                    def.boundaries
                        .entry(host.clone())
                        .or_default()
                        .push(id.clone());
                    ActivityKind::Boundary {
                        host: host.clone(),
                        trigger: trigger.clone(),
                        cancel_activity: *cancel_activity,
                    }
                }
            };
            def.activities.insert(
                node.id().to_string(),
                Activity {
                    id: node.id().to_string(),
                    parent,
                    kind,
                },
            );
        }

        for edge in &model.edges {
            def.outgoing
                .entry(edge.from.clone())
                .or_default()
                .push(SequenceFlow {
                    target: edge.to.clone(),
                    condition: edge.condition.clone(),
                    is_default: edge.is_default,
                });
            *def.incoming.entry(edge.to.clone()).or_default() += 1;
        }

        Ok(def)
    }

    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.activities.get(id)
    }

    /// Like `activity`, for ids that came out of this definition.
    pub(crate) fn require(&self, id: &str) -> Result<&Activity> {
        self.activities
            .get(id)
            .ok_or_else(|| EngineError::InvalidDefinition {
                key: self.key.clone(),
                details: format!("unknown activity '{}'", id),
            })
    }

    pub fn activities(&self) -> impl Iterator<Item = &Activity> {
        self.activities.values()
    }

    /// Outgoing flows in declaration order.
    pub fn outgoing(&self, id: &str) -> &[SequenceFlow] {
        self.outgoing
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn incoming_count(&self, id: &str) -> usize {
        self.incoming.get(id).copied().unwrap_or(0)
    }

    /// Start event of a scope (`None` = process level).
    pub fn start_of(&self, scope: Option<&str>) -> Option<&str> {
        self.starts
            .get(&scope.map(str::to_string))
            .map(|s| s.as_str())
    }

    /// Boundary events attached to `host`, declaration order.
    pub fn boundaries(&self, host: &str) -> Vec<&Activity> {
        self.boundaries
            .get(host)
            .map(|ids| ids.iter().filter_map(|id| self.activities.get(id)).collect())
            .unwrap_or_default()
    }

    /// Signal boundaries of `host` listening for `signal`, declaration order.
    pub fn signal_boundaries(&self, host: &str, signal: &str) -> Vec<&Activity> {
        self.boundaries(host)
            .into_iter()
            .filter(|b| {
                matches!(
                    &b.kind,
                    ActivityKind::Boundary {
                        trigger: BoundaryTrigger::Signal { signal: s },
                        ..
                    } if s == signal
                )
            })
            .collect()
    }

    /// Message boundaries of `host` listening for `message`, declaration order.
    pub fn message_boundaries(&self, host: &str, message: &str) -> Vec<&Activity> {
        self.boundaries(host)
            .into_iter()
            .filter(|b| {
                matches!(
                    &b.kind,
                    ActivityKind::Boundary {
                        trigger: BoundaryTrigger::Message { message: m },
                        ..
                    } if m == message
                )
            })
            .collect()
    }

    /// Handler of the compensation boundary attached to `activity`.
    pub fn compensation_handler(&self, activity: &str) -> Option<&str> {
        self.boundaries(activity)
            .into_iter()
            .find_map(|b| match &b.kind {
                ActivityKind::Boundary {
                    trigger: BoundaryTrigger::Compensation { handler },
                    ..
                } => Some(handler.as_str()),
                _ => None,
            })
    }

    /// Event sub-process of `scope` started by `message`, with its message
    /// start event.
    pub fn event_subprocess_for_message(
        &self,
        scope: Option<&str>,
        message: &str,
    ) -> Option<(&str, &str)> {
        let candidates = self.event_subprocesses.get(&scope.map(str::to_string))?;
        candidates.iter().find_map(|es| {
            let start = self.message_starts.get(es)?;
            match &self.activities.get(start)?.kind {
                ActivityKind::MessageStart { message: m } if m == message => {
                    Some((es.as_str(), start.as_str()))
                }
                _ => None,
            }
        })
    }

    /// Entering this activity opens a scope execution: sub-processes, and
    /// activities carrying signal or message boundary events.
    pub fn needs_scope(&self, id: &str) -> bool {
        match self.activities.get(id).map(|a| &a.kind) {
            Some(ActivityKind::SubProcess) => true,
            Some(_) => self.boundaries(id).iter().any(|b| {
                matches!(
                    b.kind,
                    ActivityKind::Boundary {
                        trigger: BoundaryTrigger::Signal { .. } | BoundaryTrigger::Message { .. },
                        ..
                    }
                )
            }),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
key: fulfilment
name: Order fulfilment
nodes:
  - kind: Start
    id: start
  - kind: UserTask
    id: pack
  - kind: Boundary
    id: on_alert
    host: pack
    trigger: { type: Signal, signal: alert }
  - kind: Boundary
    id: on_cancel
    host: pack
    cancel_activity: false
    trigger: { type: Message, message: cancel }
  - kind: Boundary
    id: pack_comp
    host: pack
    trigger: { type: Compensation, handler: unpack }
  - kind: ServiceTask
    id: unpack
    for_compensation: true
  - kind: EventSubProcess
    id: esp
  - kind: MessageStart
    id: esp_start
    message: abort
    parent: esp
  - kind: End
    id: esp_end
    parent: esp
  - kind: End
    id: end
edges:
  - { from: start, to: pack }
  - { from: pack, to: end }
  - { from: on_alert, to: end }
  - { from: on_cancel, to: end }
  - { from: esp_start, to: esp_end }
"#;

    fn compiled() -> ProcessDefinition {
        let model = parse_process_yaml(MODEL).unwrap();
        ProcessDefinition::compile(&model, 3).unwrap()
    }

    #[test]
    fn test_compile_lookups() {
        let def = compiled();
        assert_eq!(def.id, "fulfilment:3");
        assert_eq!(def.start_of(None), Some("start"));
        assert_eq!(def.outgoing("start")[0].target, "pack");
        assert_eq!(def.incoming_count("end"), 3);
        assert!(def.activity("pack").unwrap().is_wait_state());
        assert!(def.needs_scope("pack"));
        assert!(!def.needs_scope("end"));
    }

    #[test]
    fn test_boundaries_in_declaration_order() {
        let def = compiled();
        let ids: Vec<&str> = def.boundaries("pack").iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["on_alert", "on_cancel", "pack_comp"]);
        assert_eq!(def.signal_boundaries("pack", "alert").len(), 1);
        assert!(def.signal_boundaries("pack", "other").is_empty());
        assert_eq!(def.message_boundaries("pack", "cancel")[0].id, "on_cancel");
        assert_eq!(def.compensation_handler("pack"), Some("unpack"));
    }

    #[test]
    fn test_event_subprocess_lookup() {
        let def = compiled();
        assert_eq!(
            def.event_subprocess_for_message(None, "abort"),
            Some(("esp", "esp_start"))
        );
        assert_eq!(def.event_subprocess_for_message(None, "cancel"), None);
    }

    #[test]
    fn test_compile_rejects_invalid_model() {
        let mut model = parse_process_yaml(MODEL).unwrap();
        model.edges.push(EdgeDto::new("pack", "ghost"));
        match ProcessDefinition::compile(&model, 1) {
            Err(EngineError::InvalidDefinition { key, details }) => {
                assert_eq!(key, "fulfilment");
                assert!(details.contains("[V2]"), "details: {details}");
            }
            other => panic!("expected InvalidDefinition, got {other:?}"),
        }
    }
}
