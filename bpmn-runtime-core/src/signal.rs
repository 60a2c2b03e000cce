//! Signal stimuli: plain API signals, named signals and task completion.

use crate::cascade::{Cascade, Step};
use crate::definition::ActivityKind;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::types::*;
use tracing::debug;

impl Cascade<'_> {
    /// Move a waiting execution past its activity. One Signal event without
    /// a name, carrying `variables` as data, precedes the move.
    pub(crate) fn signal(
        &mut self,
        execution: ExecutionId,
        variables: Option<Variables>,
    ) -> Result<()> {
        let activity_id = self
            .active(execution)?
            .activity_id
            .clone()
            .unwrap_or_default();
        let def = self.definition();
        let waiting = def
            .activity(&activity_id)
            .is_some_and(|a| a.is_wait_state());
        if !waiting {
            return Err(EngineError::NotWaiting {
                execution_id: execution,
                activity_id,
            });
        }

        self.dispatch(EngineEvent::Signal {
            envelope: self.envelope(execution, &activity_id),
            signal_name: None,
            signal_data: variables.clone(),
        })?;
        if let Some(vars) = &variables {
            self.state.tree.set_variables(execution, vars);
        }
        self.remove_tasks_of(execution);
        self.push(Step::Leave {
            execution,
            activity: activity_id,
        });
        Ok(())
    }

    /// Complete a user task. Task completion is not a signal: no event is
    /// dispatched for the task itself.
    pub(crate) fn complete_task(
        &mut self,
        task_id: TaskId,
        variables: Option<Variables>,
    ) -> Result<()> {
        let task = self
            .state
            .tasks
            .remove(&task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;
        let still_waiting = self
            .state
            .tree
            .get(task.execution_id)
            .is_some_and(|e| e.is_waiting_at(&task.activity_id));
        if !still_waiting {
            return Err(EngineError::ExecutionNotFound(task.execution_id));
        }

        debug!(task_id = %task_id, execution_id = %task.execution_id, "task completed");
        if let Some(vars) = &variables {
            self.state.tree.set_variables(task.execution_id, vars);
        }
        self.push(Step::Leave {
            execution: task.execution_id,
            activity: task.activity_id,
        });
        Ok(())
    }

    /// Deliver a named signal to exactly `execution`: its intermediate
    /// signal catch, or the matching boundary events of its scope.
    pub(crate) fn signal_event_received(
        &mut self,
        signal_name: &str,
        execution: ExecutionId,
        payload: Option<Variables>,
    ) -> Result<()> {
        self.stimulus_target(execution)?;
        let subscriptions = self.signal_subscriptions(execution, signal_name);
        if subscriptions.is_empty() {
            return Err(EngineError::NoSubscription {
                execution_id: execution,
                event_name: signal_name.to_string(),
            });
        }
        debug!(
            execution_id = %execution,
            signal_name,
            subscriptions = subscriptions.len(),
            "signal received"
        );
        self.push_all(
            subscriptions
                .into_iter()
                .map(|(target, subscription)| Step::Deliver {
                    execution: target,
                    subscription,
                    signal_name: Some(signal_name.to_string()),
                    data: payload.clone(),
                })
                .collect(),
        );
        Ok(())
    }

    /// `(execution, activity)` pairs listening for `signal_name` on behalf of
    /// `execution`. An intermediate catch wins; otherwise the innermost
    /// enclosing scope with matching boundaries, in declaration order.
    fn signal_subscriptions(
        &self,
        execution: ExecutionId,
        signal_name: &str,
    ) -> Vec<(ExecutionId, ActivityId)> {
        let def = self.definition();
        let tree = &self.state.tree;

        if let Some(at) = tree
            .get(execution)
            .filter(|e| e.is_active)
            .and_then(|e| e.activity_id.as_deref())
        {
            let catches = def.activity(at).is_some_and(|a| {
                matches!(&a.kind, ActivityKind::CatchSignal { signal } if signal == signal_name)
            });
            if catches {
                return vec![(execution, at.to_string())];
            }
        }

        for id in tree.ancestry(execution) {
            let Some(host) = tree.get(id).and_then(|e| e.scope_activity.as_deref()) else {
                continue;
            };
            let boundaries = def.signal_boundaries(host, signal_name);
            if !boundaries.is_empty() {
                return boundaries.iter().map(|b| (id, b.id.clone())).collect();
            }
        }
        Vec::new()
    }
}
