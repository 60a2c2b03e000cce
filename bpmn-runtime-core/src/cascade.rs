//! Token-advance machinery shared by every stimulus.
//!
//! A stimulus seeds a work stack of `Step`s; `Cascade::run` pops them until
//! the stack is empty. Each step dispatches its own event (if any) before it
//! mutates the tree, and pushes its follow-ups in reverse so they run in
//! causal, depth-first order.

use crate::compensation::CompensationRegistry;
use crate::definition::{ActivityKind, ProcessDefinition, SequenceFlow};
use crate::dispatcher::EventDispatcher;
use crate::error::{EngineError, Result};
use crate::events::{ActivityEventKind, EngineEvent, EventEnvelope};
use crate::tree::ExecutionTree;
use crate::types::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything one process instance owns. Cloned as the working copy of a
/// stimulus and written back only when the stimulus succeeds.
#[derive(Clone, Debug)]
pub(crate) struct InstanceState {
    pub(crate) instance: ProcessInstance,
    pub(crate) definition: Arc<ProcessDefinition>,
    pub(crate) tree: ExecutionTree,
    pub(crate) tasks: BTreeMap<TaskId, Task>,
    pub(crate) compensation: CompensationRegistry,
}

impl InstanceState {
    pub(crate) fn new(definition: Arc<ProcessDefinition>) -> Self {
        let root = Uuid::now_v7();
        Self {
            instance: ProcessInstance {
                id: root,
                process_definition_id: definition.id.clone(),
                process_key: definition.key.clone(),
                state: ProcessState::Running,
                created_at: now_ms(),
            },
            definition,
            tree: ExecutionTree::new(root),
            tasks: BTreeMap::new(),
            compensation: CompensationRegistry::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Move `execution` onto `activity` and run its entry behavior.
    Enter {
        execution: ExecutionId,
        activity: ActivityId,
    },
    /// `activity` is done for `execution`; take the outgoing flows.
    Leave {
        execution: ExecutionId,
        activity: ActivityId,
    },
    /// The path of `execution` has no further flow.
    EndPath { execution: ExecutionId },
    /// Hand a signal to one subscription (intermediate catch or boundary).
    Deliver {
        execution: ExecutionId,
        subscription: ActivityId,
        signal_name: Option<String>,
        data: Option<Variables>,
    },
    /// Hand a message to one catching subscription; continues as `Deliver`.
    ReceiveMessage {
        execution: ExecutionId,
        subscription: ActivityId,
        message_name: String,
        data: Option<Variables>,
    },
    /// Run one compensation handler inside `scope`.
    Compensate {
        scope: ExecutionId,
        handler: ActivityId,
        compensated: ActivityId,
    },
    /// All handlers ran; resume the throwing execution.
    CompensationDone { execution: ExecutionId },
}

pub(crate) struct Cascade<'a> {
    pub(crate) state: &'a mut InstanceState,
    dispatcher: &'a EventDispatcher,
    max_steps: usize,
    steps: usize,
    stack: Vec<Step>,
    created: Vec<Uuid>,
}

impl<'a> Cascade<'a> {
    pub(crate) fn new(
        state: &'a mut InstanceState,
        dispatcher: &'a EventDispatcher,
        max_steps: usize,
    ) -> Self {
        Self {
            state,
            dispatcher,
            max_steps,
            steps: 0,
            stack: Vec::new(),
            created: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, step: Step) {
        self.stack.push(step);
    }

    /// Push `steps` so that the first one runs first.
    pub(crate) fn push_all(&mut self, steps: Vec<Step>) {
        self.stack.extend(steps.into_iter().rev());
    }

    /// Drain the work stack. Returns the ids of executions and tasks created
    /// along the way.
    pub(crate) fn run(mut self) -> Result<Vec<Uuid>> {
        while let Some(step) = self.stack.pop() {
            self.steps += 1;
            if self.steps > self.max_steps {
                return Err(EngineError::CascadeLimitExceeded {
                    limit: self.max_steps,
                });
            }
            self.step(step)?;
        }
        Ok(self.created)
    }

    fn step(&mut self, step: Step) -> Result<()> {
        match step {
            Step::Enter {
                execution,
                activity,
            } => self.enter(execution, &activity),
            Step::Leave {
                execution,
                activity,
            } => self.leave(execution, &activity),
            Step::EndPath { execution } => self.end_path(execution),
            Step::Deliver {
                execution,
                subscription,
                signal_name,
                data,
            } => self.deliver(execution, &subscription, signal_name, data),
            Step::ReceiveMessage {
                execution,
                subscription,
                message_name,
                data,
            } => self.receive_message(execution, subscription, message_name, data),
            Step::Compensate {
                scope,
                handler,
                compensated,
            } => self.compensate(scope, &handler, &compensated),
            Step::CompensationDone { execution } => self.compensation_done(execution),
        }
    }

    // ── Shared helpers ──

    pub(crate) fn definition(&self) -> Arc<ProcessDefinition> {
        self.state.definition.clone()
    }

    pub(crate) fn envelope(&self, execution: ExecutionId, activity: &str) -> EventEnvelope {
        EventEnvelope {
            execution_id: execution,
            process_instance_id: self.state.instance.id,
            process_definition_id: self.state.instance.process_definition_id.clone(),
            activity_id: activity.to_string(),
        }
    }

    pub(crate) fn dispatch(&self, event: EngineEvent) -> Result<()> {
        self.dispatcher.dispatch(&event)
    }

    /// New child of `parent`, recorded as created by this stimulus.
    pub(crate) fn spawn(&mut self, parent: ExecutionId) -> Result<&mut Execution> {
        let child = self.state.tree.create_child(parent)?;
        self.created.push(child.id);
        Ok(child)
    }

    /// End an execution subtree and drop the tasks and compensation
    /// registrations that belonged to it.
    pub(crate) fn end_execution(&mut self, id: ExecutionId) -> Result<Vec<ExecutionId>> {
        let ended = self.state.tree.end(id)?;
        if !ended.is_empty() {
            self.state
                .tasks
                .retain(|_, t| !ended.contains(&t.execution_id));
            self.state.compensation.discard(&ended);
            debug!(execution_id = %id, ended = ended.len(), "execution ended");
        }
        Ok(ended)
    }

    pub(crate) fn remove_tasks_of(&mut self, execution: ExecutionId) {
        self.state.tasks.retain(|_, t| t.execution_id != execution);
    }

    /// Live execution holding a token, or `ExecutionNotFound`.
    pub(crate) fn active(&self, id: ExecutionId) -> Result<&Execution> {
        self.state
            .tree
            .get(id)
            .filter(|e| !e.is_ended && e.is_active)
            .ok_or(EngineError::ExecutionNotFound(id))
    }

    /// Live execution a stimulus may address: a token, or a scope whose
    /// subscriptions (boundaries, event sub-processes) can still fire.
    pub(crate) fn stimulus_target(&self, id: ExecutionId) -> Result<&Execution> {
        self.state
            .tree
            .get(id)
            .filter(|e| !e.is_ended && (e.is_active || e.is_scope))
            .ok_or(EngineError::ExecutionNotFound(id))
    }

    /// Place the root on the process start event and let it run.
    pub(crate) fn start(&mut self, variables: Option<Variables>) -> Result<()> {
        let def = self.definition();
        let start = def
            .start_of(None)
            .ok_or_else(|| EngineError::InvalidDefinition {
                key: def.key.clone(),
                details: "process has no start event".to_string(),
            })?
            .to_string();
        let root = self.state.tree.root_id();
        if let Some(vars) = &variables {
            self.state.tree.set_variables(root, vars);
        }
        self.state.tree.set_activity(root, Some(start.clone()))?;
        info!(
            process_instance_id = %root,
            definition_id = %def.id,
            "process instance started"
        );
        self.push(Step::Leave {
            execution: root,
            activity: start,
        });
        Ok(())
    }

    // ── Steps ──

    fn enter(&mut self, execution: ExecutionId, activity_id: &str) -> Result<()> {
        let def = self.definition();
        let activity = def.require(activity_id)?;
        debug!(execution_id = %execution, activity_id, "entering activity");

        match &activity.kind {
            ActivityKind::Start
            | ActivityKind::MessageStart { .. }
            | ActivityKind::EventSubProcess
            | ActivityKind::Boundary { .. } => {
                return Err(EngineError::IllegalEntry {
                    activity_id: activity_id.to_string(),
                })
            }
            ActivityKind::SubProcess => return self.enter_subprocess(execution, &def, activity_id),
            _ => {}
        }

        let token = self.place(execution, &def, activity_id)?;
        match &activity.kind {
            ActivityKind::End => self.push(Step::EndPath { execution: token }),
            ActivityKind::UserTask { name } => self.create_task(token, activity_id, name.clone()),
            ActivityKind::ReceiveTask
            | ActivityKind::CatchSignal { .. }
            | ActivityKind::CatchMessage { .. } => {
                debug!(execution_id = %token, activity_id, "waiting");
            }
            ActivityKind::ThrowSignal { signal } => self.throw_signal(token, activity_id, signal),
            ActivityKind::ThrowCompensation { activity } => {
                self.throw_compensation(token, activity_id, activity.as_deref())
            }
            ActivityKind::ParallelGateway if def.incoming_count(activity_id) > 1 => {
                self.join(token, activity_id, def.incoming_count(activity_id))?
            }
            _ => self.push(Step::Leave {
                execution: token,
                activity: activity_id.to_string(),
            }),
        }
        Ok(())
    }

    /// Position `execution` at `activity_id`. Activities with signal or
    /// message boundaries get their own scope execution, which becomes the
    /// token; the entering execution is parked as its inactive parent.
    fn place(
        &mut self,
        execution: ExecutionId,
        def: &ProcessDefinition,
        activity_id: &str,
    ) -> Result<ExecutionId> {
        if def.needs_scope(activity_id) {
            let scope = self.open_scope(execution, activity_id)?;
            self.state
                .tree
                .set_activity(scope, Some(activity_id.to_string()))?;
            return Ok(scope);
        }
        let exec = self.state.tree.get_mut(execution)?;
        exec.activity_id = Some(activity_id.to_string());
        exec.is_active = true;
        Ok(execution)
    }

    fn open_scope(&mut self, parent: ExecutionId, scope_activity: &str) -> Result<ExecutionId> {
        let scope = {
            let s = self.spawn(parent)?;
            s.is_scope = true;
            s.scope_activity = Some(scope_activity.to_string());
            s.id
        };
        let p = self.state.tree.get_mut(parent)?;
        p.is_active = false;
        p.activity_id = None;
        Ok(scope)
    }

    fn enter_subprocess(
        &mut self,
        execution: ExecutionId,
        def: &ProcessDefinition,
        subprocess: &str,
    ) -> Result<()> {
        let start = def
            .start_of(Some(subprocess))
            .ok_or_else(|| EngineError::InvalidDefinition {
                key: def.key.clone(),
                details: format!("sub-process '{}' has no start event", subprocess),
            })?
            .to_string();
        let scope = self.open_scope(execution, subprocess)?;
        self.state.tree.set_activity(scope, Some(start.clone()))?;
        self.push(Step::Leave {
            execution: scope,
            activity: start,
        });
        Ok(())
    }

    fn create_task(&mut self, execution: ExecutionId, activity_id: &str, name: Option<String>) {
        let task = Task {
            task_id: Uuid::now_v7(),
            execution_id: execution,
            process_instance_id: self.state.instance.id,
            activity_id: activity_id.to_string(),
            name,
            created_at: now_ms(),
        };
        debug!(task_id = %task.task_id, execution_id = %execution, activity_id, "task created");
        self.created.push(task.task_id);
        self.state.tasks.insert(task.task_id, task);
    }

    fn leave(&mut self, execution: ExecutionId, activity_id: &str) -> Result<()> {
        let exec = self.state.tree.live(execution)?;

        // Leaving the activity that opened this scope closes the scope.
        if exec.scope_activity.as_deref() == Some(activity_id) {
            if let Some(parent) = exec.parent {
                self.end_execution(execution)?;
                return self.resume(parent, activity_id);
            }
        }

        let def = self.definition();
        if let Some(handler) = def.compensation_handler(activity_id) {
            let scope = self.state.tree.nearest_scope(execution);
            self.state.compensation.register(scope, activity_id, handler);
            debug!(scope_id = %scope, activity_id, handler, "compensation handler registered");
        }

        let activity = def.require(activity_id)?;
        let flows = def.outgoing(activity_id);
        if matches!(activity.kind, ActivityKind::ExclusiveGateway) {
            let flow = self.choose_flow(execution, flows).ok_or_else(|| {
                EngineError::NoOutgoingFlow {
                    activity_id: activity_id.to_string(),
                }
            })?;
            self.push(Step::Enter {
                execution,
                activity: flow.target.clone(),
            });
            return Ok(());
        }

        match flows {
            [] => self.push(Step::EndPath { execution }),
            [flow] => self.push(Step::Enter {
                execution,
                activity: flow.target.clone(),
            }),
            _ => self.fork(execution, flows)?,
        }
        Ok(())
    }

    /// First unconditional or satisfied flow in declaration order, else the
    /// default flow.
    fn choose_flow<'f>(
        &self,
        execution: ExecutionId,
        flows: &'f [SequenceFlow],
    ) -> Option<&'f SequenceFlow> {
        flows
            .iter()
            .filter(|f| !f.is_default)
            .find(|f| match &f.condition {
                Some(c) => c.holds(self.state.tree.variable(execution, &c.variable)),
                None => true,
            })
            .or_else(|| flows.iter().find(|f| f.is_default))
    }

    fn fork(&mut self, execution: ExecutionId, flows: &[SequenceFlow]) -> Result<()> {
        {
            let exec = self.state.tree.get_mut(execution)?;
            exec.is_active = false;
            exec.activity_id = None;
        }
        let mut enters = Vec::with_capacity(flows.len());
        for flow in flows {
            let child = self.spawn(execution)?;
            child.is_concurrent = true;
            enters.push(Step::Enter {
                execution: child.id,
                activity: flow.target.clone(),
            });
        }
        debug!(execution_id = %execution, branches = flows.len(), "fork");
        self.push_all(enters);
        Ok(())
    }

    /// Park `token` at the join; once every incoming flow is accounted for,
    /// end the arrived siblings and continue on their parent.
    fn join(&mut self, token: ExecutionId, gateway: &str, expected: usize) -> Result<()> {
        let (parent, concurrent) = {
            let exec = self.state.tree.get_mut(token)?;
            exec.is_active = false;
            (exec.parent, exec.is_concurrent)
        };
        let Some(parent) = parent.filter(|_| concurrent) else {
            debug!(execution_id = %token, gateway, "waiting at join without siblings");
            return Ok(());
        };

        let arrived: Vec<ExecutionId> = self
            .state
            .tree
            .live_children(parent)
            .iter()
            .filter(|c| {
                self.state.tree.get(**c).is_some_and(|e| {
                    !e.is_active && e.activity_id.as_deref() == Some(gateway)
                })
            })
            .copied()
            .collect();
        debug!(gateway, arrived = arrived.len(), expected, "join arrival");
        if arrived.len() < expected {
            return Ok(());
        }
        for sibling in arrived {
            self.end_execution(sibling)?;
        }
        self.resume(parent, gateway)
    }

    /// Continue on `parent` after `activity_id`: the parent itself takes the
    /// token when it has no other live children, otherwise a new concurrent
    /// child does.
    fn resume(&mut self, parent: ExecutionId, activity_id: &str) -> Result<()> {
        let token = if self.state.tree.live_children(parent).is_empty() {
            let exec = self.state.tree.get_mut(parent)?;
            exec.is_active = true;
            exec.activity_id = Some(activity_id.to_string());
            parent
        } else {
            let child = self.spawn(parent)?;
            child.is_concurrent = true;
            child.activity_id = Some(activity_id.to_string());
            child.id
        };
        self.push(Step::Leave {
            execution: token,
            activity: activity_id.to_string(),
        });
        Ok(())
    }

    fn end_path(&mut self, execution: ExecutionId) -> Result<()> {
        let Some(exec) = self.state.tree.get(execution).filter(|e| !e.is_ended) else {
            return Ok(());
        };
        let parent = exec.parent;

        if exec.is_scope {
            let Some(scope_activity) = exec.scope_activity.clone() else {
                return self.complete_instance();
            };
            let def = self.definition();
            match def.require(&scope_activity)?.kind {
                ActivityKind::SubProcess => {
                    self.push(Step::Leave {
                        execution,
                        activity: scope_activity,
                    });
                    return Ok(());
                }
                ActivityKind::EventSubProcess => {
                    // The triggering scope was emptied when the event
                    // sub-process started; it completes with it.
                    self.end_execution(execution)?;
                    if let Some(parent) = parent {
                        self.push(Step::EndPath { execution: parent });
                    }
                    return Ok(());
                }
                _ => {}
            }
        }

        self.end_execution(execution)?;
        if let Some(parent) = parent {
            self.on_child_ended(parent);
        }
        Ok(())
    }

    /// An inactive container left without children has finished its path.
    fn on_child_ended(&mut self, parent: ExecutionId) {
        let finished = self.state.tree.get(parent).is_some_and(|p| {
            !p.is_ended && !p.is_active && p.activity_id.is_none() && p.children.is_empty()
        });
        if finished {
            self.push(Step::EndPath { execution: parent });
        }
    }

    fn complete_instance(&mut self) -> Result<()> {
        let root = self.state.tree.root_id();
        self.end_execution(root)?;
        self.state.tasks.clear();
        self.state.instance.state = ProcessState::Completed { at: now_ms() };
        info!(
            process_instance_id = %self.state.instance.id,
            definition_id = %self.state.instance.process_definition_id,
            "process instance completed"
        );
        Ok(())
    }

    fn deliver(
        &mut self,
        execution: ExecutionId,
        subscription: &str,
        signal_name: Option<String>,
        data: Option<Variables>,
    ) -> Result<()> {
        let def = self.definition();
        let activity = def.require(subscription)?;
        let boundary = match &activity.kind {
            ActivityKind::Boundary {
                host,
                cancel_activity,
                ..
            } => Some((host.as_str(), *cancel_activity)),
            _ => None,
        };

        let still_subscribed = match (self.state.tree.get(execution), boundary) {
            (Some(e), Some((host, _))) => !e.is_ended && e.scope_activity.as_deref() == Some(host),
            (Some(e), None) => e.is_waiting_at(subscription),
            (None, _) => false,
        };
        if !still_subscribed {
            debug!(execution_id = %execution, subscription, "subscription gone, skipping delivery");
            return Ok(());
        }

        self.dispatch(EngineEvent::Signal {
            envelope: self.envelope(execution, subscription),
            signal_name,
            signal_data: data.clone(),
        })?;
        if let Some(vars) = &data {
            self.state.tree.set_variables(execution, vars);
        }

        match boundary {
            Some((_, cancel_activity)) => {
                self.fire_boundary(execution, subscription, cancel_activity)
            }
            None => {
                self.remove_tasks_of(execution);
                self.push(Step::Leave {
                    execution,
                    activity: subscription.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Fire `boundary` on the host held by `scope`.
    ///
    /// A non-interrupting path runs beside the host. When the host sits in a
    /// parallel branch, that path becomes a sibling of the branch under the
    /// fork container, so a later join counts the branch and the path under
    /// one parent.
    fn fire_boundary(
        &mut self,
        scope: ExecutionId,
        boundary: &str,
        cancel_activity: bool,
    ) -> Result<()> {
        let parent = self
            .state
            .tree
            .live(scope)?
            .parent
            .ok_or(EngineError::InvalidParent { parent: scope })?;
        debug!(scope_id = %scope, boundary, cancel_activity, "boundary event fired");
        if cancel_activity {
            self.end_execution(scope)?;
            return self.resume(parent, boundary);
        }
        let container = self.concurrency_container(parent);
        let child = self.spawn(container)?;
        child.is_concurrent = true;
        child.activity_id = Some(boundary.to_string());
        let child = child.id;
        self.push(Step::Leave {
            execution: child,
            activity: boundary.to_string(),
        });
        Ok(())
    }

    /// Where new concurrent paths next to `execution` belong: the fork
    /// container when `execution` is itself a parallel branch.
    fn concurrency_container(&self, execution: ExecutionId) -> ExecutionId {
        self.state
            .tree
            .get(execution)
            .filter(|e| e.is_concurrent && !e.is_scope)
            .and_then(|e| e.parent)
            .unwrap_or(execution)
    }

    fn receive_message(
        &mut self,
        execution: ExecutionId,
        subscription: ActivityId,
        message_name: String,
        data: Option<Variables>,
    ) -> Result<()> {
        if self.state.tree.get(execution).map_or(true, |e| e.is_ended) {
            return Ok(());
        }
        self.dispatch(EngineEvent::Message {
            envelope: self.envelope(execution, &subscription),
            message_name: message_name.clone(),
            message_data: data.clone(),
        })?;
        self.push(Step::Deliver {
            execution,
            subscription,
            signal_name: Some(message_name),
            data,
        });
        Ok(())
    }

    fn throw_signal(&mut self, thrower: ExecutionId, activity_id: &str, signal: &str) {
        let def = self.definition();
        let mut deliveries = Vec::new();
        for exec in self.state.tree.preorder() {
            if exec.id == thrower {
                continue;
            }
            if let Some(at) = exec.activity_id.as_deref().filter(|_| exec.is_active) {
                let catches = def.activity(at).is_some_and(|a| {
                    matches!(&a.kind, ActivityKind::CatchSignal { signal: s } if s == signal)
                });
                if catches {
                    deliveries.push((exec.id, at.to_string()));
                }
            }
            if let Some(host) = exec.scope_activity.as_deref() {
                for boundary in def.signal_boundaries(host, signal) {
                    deliveries.push((exec.id, boundary.id.clone()));
                }
            }
        }
        debug!(
            execution_id = %thrower,
            signal,
            subscribers = deliveries.len(),
            "throwing signal"
        );

        self.push(Step::Leave {
            execution: thrower,
            activity: activity_id.to_string(),
        });
        self.push_all(
            deliveries
                .into_iter()
                .map(|(execution, subscription)| Step::Deliver {
                    execution,
                    subscription,
                    signal_name: Some(signal.to_string()),
                    data: None,
                })
                .collect(),
        );
    }

    fn throw_compensation(
        &mut self,
        thrower: ExecutionId,
        activity_id: &str,
        target: Option<&str>,
    ) {
        let scope = self.state.tree.nearest_scope(thrower);
        let entries = self.state.compensation.take(scope, target);
        if entries.is_empty() {
            debug!(execution_id = %thrower, activity_id, "nothing to compensate");
            self.push(Step::Leave {
                execution: thrower,
                activity: activity_id.to_string(),
            });
            return;
        }
        debug!(
            execution_id = %thrower,
            scope_id = %scope,
            handlers = entries.len(),
            "throwing compensation"
        );
        self.push(Step::CompensationDone { execution: thrower });
        self.push_all(
            entries
                .into_iter()
                .map(|e| Step::Compensate {
                    scope,
                    handler: e.handler,
                    compensated: e.activity,
                })
                .collect(),
        );
    }

    /// Run one handler. Handlers have no body: the compensate event is the
    /// whole run, after which the handler execution ends.
    fn compensate(&mut self, scope: ExecutionId, handler: &str, compensated: &str) -> Result<()> {
        let execution = {
            let exec = self.spawn(scope)?;
            exec.activity_id = Some(handler.to_string());
            exec.id
        };
        self.dispatch(EngineEvent::Activity {
            kind: ActivityEventKind::Compensate,
            envelope: self.envelope(execution, handler),
        })?;
        debug!(execution_id = %execution, handler, compensated, "compensation handler ran");
        self.end_execution(execution)?;
        Ok(())
    }

    fn compensation_done(&mut self, execution: ExecutionId) -> Result<()> {
        let activity = self
            .state
            .tree
            .live(execution)?
            .activity_id
            .clone()
            .ok_or(EngineError::ExecutionNotFound(execution))?;
        self.dispatch(EngineEvent::Signal {
            envelope: self.envelope(execution, &activity),
            signal_name: Some(COMPENSATION_DONE_SIGNAL.to_string()),
            signal_data: None,
        })?;
        self.push(Step::Leave {
            execution,
            activity,
        });
        Ok(())
    }
}
