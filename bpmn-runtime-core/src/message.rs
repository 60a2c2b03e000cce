//! Message stimuli: catching message activities and message-started event
//! sub-processes.

use crate::cascade::{Cascade, Step};
use crate::definition::ActivityKind;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::types::*;
use tracing::debug;

impl Cascade<'_> {
    /// Correlate `message_name` to `execution`.
    ///
    /// A catching activity (intermediate catch or message boundary) sees a
    /// Message event followed by a Signal event. An event sub-process found
    /// in the enclosing scopes sees only the Message event, reported at its
    /// message start.
    pub(crate) fn message_event_received(
        &mut self,
        message_name: &str,
        execution: ExecutionId,
        payload: Option<Variables>,
    ) -> Result<()> {
        self.stimulus_target(execution)?;

        let catching = self.message_subscriptions(execution, message_name);
        if !catching.is_empty() {
            debug!(
                execution_id = %execution,
                message_name,
                subscriptions = catching.len(),
                "message received"
            );
            self.push_all(
                catching
                    .into_iter()
                    .map(|(target, subscription)| Step::ReceiveMessage {
                        execution: target,
                        subscription,
                        message_name: message_name.to_string(),
                        data: payload.clone(),
                    })
                    .collect(),
            );
            return Ok(());
        }

        let Some((scope, event_subprocess, start)) =
            self.find_event_subprocess(execution, message_name)
        else {
            return Err(EngineError::NoSubscription {
                execution_id: execution,
                event_name: message_name.to_string(),
            });
        };

        self.dispatch(EngineEvent::Message {
            envelope: self.envelope(execution, &start),
            message_name: message_name.to_string(),
            message_data: payload.clone(),
        })?;
        if let Some(vars) = &payload {
            self.state.tree.set_variables(scope, vars);
        }
        self.trigger_event_subprocess(scope, &event_subprocess, start)
    }

    fn message_subscriptions(
        &self,
        execution: ExecutionId,
        message_name: &str,
    ) -> Vec<(ExecutionId, ActivityId)> {
        let def = self.definition();
        let tree = &self.state.tree;

        if let Some(at) = tree
            .get(execution)
            .filter(|e| e.is_active)
            .and_then(|e| e.activity_id.as_deref())
        {
            let catches = def.activity(at).is_some_and(|a| {
                matches!(&a.kind, ActivityKind::CatchMessage { message } if message == message_name)
            });
            if catches {
                return vec![(execution, at.to_string())];
            }
        }

        for id in tree.ancestry(execution) {
            let Some(host) = tree.get(id).and_then(|e| e.scope_activity.as_deref()) else {
                continue;
            };
            let boundaries = def.message_boundaries(host, message_name);
            if !boundaries.is_empty() {
                return boundaries.iter().map(|b| (id, b.id.clone())).collect();
            }
        }
        Vec::new()
    }

    /// Innermost enclosing scope execution owning an event sub-process
    /// started by `message_name`: `(scope, event sub-process, message start)`.
    fn find_event_subprocess(
        &self,
        execution: ExecutionId,
        message_name: &str,
    ) -> Option<(ExecutionId, ActivityId, ActivityId)> {
        let def = self.definition();
        let tree = &self.state.tree;
        tree.ancestry(execution).into_iter().find_map(|id| {
            let exec = tree.get(id).filter(|e| e.is_scope)?;
            let (event_subprocess, start) =
                def.event_subprocess_for_message(exec.scope_activity.as_deref(), message_name)?;
            Some((id, event_subprocess.to_string(), start.to_string()))
        })
    }

    /// Interrupt every path of `scope` and start the event sub-process in it.
    fn trigger_event_subprocess(
        &mut self,
        scope: ExecutionId,
        event_subprocess: &str,
        start: ActivityId,
    ) -> Result<()> {
        let interrupted = self.state.tree.live_children(scope).to_vec();
        for child in interrupted {
            self.end_execution(child)?;
        }
        {
            let exec = self.state.tree.get_mut(scope)?;
            exec.is_active = false;
            exec.activity_id = None;
        }
        self.remove_tasks_of(scope);

        let sub_scope = {
            let es = self.spawn(scope)?;
            es.is_scope = true;
            es.scope_activity = Some(event_subprocess.to_string());
            es.activity_id = Some(start.clone());
            es.id
        };
        debug!(
            scope_id = %scope,
            event_subprocess,
            execution_id = %sub_scope,
            "event sub-process started"
        );
        self.push(Step::Leave {
            execution: sub_scope,
            activity: start,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cascade::{Cascade, InstanceState};
    use crate::definition::{parse_process_yaml, ProcessDefinition};
    use crate::dispatcher::EventDispatcher;
    use crate::events::{BufferingListener, EngineEventType};
    use std::sync::Arc;

    const NESTED: &str = r#"
key: nested
nodes:
  - { kind: Start, id: start }
  - { kind: SubProcess, id: sub }
  - { kind: Start, id: subStart, parent: sub }
  - { kind: ReceiveTask, id: inner, parent: sub }
  - { kind: End, id: subEnd, parent: sub }
  - { kind: EventSubProcess, id: innerHandler, parent: sub }
  - { kind: MessageStart, id: innerStart, message: cancel, parent: innerHandler }
  - { kind: ReceiveTask, id: handled, parent: innerHandler }
  - { kind: End, id: handledEnd, parent: innerHandler }
  - { kind: EventSubProcess, id: outerHandler }
  - { kind: MessageStart, id: outerStart, message: cancel, parent: outerHandler }
  - { kind: End, id: outerEnd, parent: outerHandler }
  - { kind: ReceiveTask, id: after }
  - { kind: End, id: end }
edges:
  - { from: start, to: sub }
  - { from: subStart, to: inner }
  - { from: inner, to: subEnd }
  - { from: innerStart, to: handled }
  - { from: handled, to: handledEnd }
  - { from: outerStart, to: outerEnd }
  - { from: sub, to: after }
  - { from: after, to: end }
"#;

    fn started(dispatcher: &EventDispatcher) -> InstanceState {
        let model = parse_process_yaml(NESTED).unwrap();
        let definition = Arc::new(ProcessDefinition::compile(&model, 1).unwrap());
        let mut state = InstanceState::new(definition);
        let mut cascade = Cascade::new(&mut state, dispatcher, 100);
        cascade.start(None).unwrap();
        cascade.run().unwrap();
        state
    }

    fn only_at(state: &InstanceState, activity: &str) -> uuid::Uuid {
        let found = state.tree.find_by_activity(activity);
        assert_eq!(found.len(), 1, "expected one execution at '{activity}'");
        found[0].id
    }

    #[test]
    fn test_innermost_event_subprocess_wins() {
        let dispatcher = EventDispatcher::new();
        let events = Arc::new(BufferingListener::new());
        dispatcher.add_listener(events.clone());
        let mut state = started(&dispatcher);
        let inner = only_at(&state, "inner");

        let mut cascade = Cascade::new(&mut state, &dispatcher, 100);
        cascade.message_event_received("cancel", inner, None).unwrap();
        cascade.run().unwrap();

        let received = events.take();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_type(), EngineEventType::ActivityMessageReceived);
        assert_eq!(received[0].execution_id(), inner);
        assert_eq!(received[0].activity_id(), "innerStart");

        // The event sub-process runs inside the emptied sub-process scope.
        let handled = only_at(&state, "handled");
        let es = state.tree.get(handled).unwrap();
        assert_eq!(es.parent, Some(inner));
        assert_eq!(es.scope_activity.as_deref(), Some("innerHandler"));
        let scope = state.tree.get(inner).unwrap();
        assert!(!scope.is_active);
        assert_eq!(scope.activity_id, None);

        // Finishing it completes the sub-process and the root moves on.
        let mut cascade = Cascade::new(&mut state, &dispatcher, 100);
        cascade.signal(handled, None).unwrap();
        cascade.run().unwrap();
        assert!(state.tree.get(inner).unwrap().is_ended);
        assert_eq!(only_at(&state, "after"), state.tree.root_id());
    }

    #[test]
    fn test_process_level_event_subprocess_interrupts_everything() {
        let dispatcher = EventDispatcher::new();
        let mut state = started(&dispatcher);
        let root = state.tree.root_id();
        let inner = only_at(&state, "inner");

        let mut cascade = Cascade::new(&mut state, &dispatcher, 100);
        cascade.message_event_received("cancel", root, None).unwrap();
        cascade.run().unwrap();

        assert!(state.tree.get(inner).unwrap().is_ended);
        assert!(state.instance.is_ended());
    }
}
