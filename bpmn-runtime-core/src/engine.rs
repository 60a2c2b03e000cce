use crate::cascade::{Cascade, InstanceState};
use crate::config::EngineConfig;
use crate::definition::{parse_process_yaml, ProcessDefinition, ProcessModel};
use crate::dispatcher::EventDispatcher;
use crate::error::{EngineError, Result};
use crate::events::{EngineEventType, EventListener};
use crate::repository::{DefinitionRepository, MemoryDefinitionRepository};
use crate::types::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Runtime facade: owns the live process instances and drives every
/// stimulus through a cascade.
///
/// Stimuli for one instance are serialized by that instance's mutex and run
/// against a working copy that is committed only on success. Different
/// instances proceed in parallel.
///
/// A commit prunes the executions and tasks the stimulus ended. A completed
/// instance leaves the live map and only its final record is kept.
pub struct RuntimeEngine {
    config: EngineConfig,
    definitions: Arc<dyn DefinitionRepository>,
    dispatcher: Arc<EventDispatcher>,
    instances: RwLock<HashMap<ProcessInstanceId, Arc<Mutex<InstanceState>>>>,
    completed: RwLock<HashMap<ProcessInstanceId, CompletedInstance>>,
    /// Live execution and task ids → owning instance.
    owners: RwLock<HashMap<Uuid, ProcessInstanceId>>,
}

/// What stays of an instance once it completes.
#[derive(Clone, Debug)]
struct CompletedInstance {
    instance: ProcessInstance,
    /// Ended root, holding the final process variables.
    root: Execution,
}

impl CompletedInstance {
    fn of(state: &InstanceState) -> Option<Self> {
        state.instance.is_ended().then(|| Self {
            instance: state.instance.clone(),
            root: state.tree.root().clone(),
        })
    }
}

impl RuntimeEngine {
    pub fn new(
        config: EngineConfig,
        definitions: Arc<dyn DefinitionRepository>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        dispatcher.set_enabled(config.dispatch_enabled);
        Self {
            config,
            definitions,
            dispatcher,
            instances: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// In-memory repository, fresh dispatcher, default configuration.
    pub fn in_memory() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryDefinitionRepository::new()),
            Arc::new(EventDispatcher::new()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn definitions(&self) -> &Arc<dyn DefinitionRepository> {
        &self.definitions
    }

    // ── Deployment ──

    pub fn deploy(&self, model: &ProcessModel) -> Result<Arc<ProcessDefinition>> {
        self.definitions.deploy(model)
    }

    pub fn deploy_yaml(&self, yaml_str: &str) -> Result<Arc<ProcessDefinition>> {
        self.deploy(&parse_process_yaml(yaml_str)?)
    }

    // ── Listeners ──

    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) -> bool {
        self.dispatcher.add_listener(listener)
    }

    pub fn add_typed_event_listener(
        &self,
        listener: Arc<dyn EventListener>,
        types: &[EngineEventType],
    ) -> bool {
        self.dispatcher.add_typed_listener(listener, types)
    }

    pub fn remove_event_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        self.dispatcher.remove_listener(listener)
    }

    // ── Stimuli ──

    /// Start the latest version of `key` and run it until every path waits
    /// or ends.
    pub fn start_process_instance(
        &self,
        key: &str,
        variables: Option<Variables>,
    ) -> Result<ProcessInstance> {
        let definition = self.definitions.latest(key)?;
        let mut state = InstanceState::new(definition);
        let created = {
            let mut cascade =
                Cascade::new(&mut state, &self.dispatcher, self.config.max_cascade_steps);
            cascade.start(variables)?;
            cascade.run()
        }
        .inspect_err(|e| warn!(process_key = key, error = %e, "process start rejected"))?;

        let retired = state.tree.prune_ended();
        let instance = state.instance.clone();
        match CompletedInstance::of(&state) {
            Some(done) => self.retire_instance(done, created, retired),
            None => {
                self.write_instances()
                    .insert(instance.id, Arc::new(Mutex::new(state)));
                self.record_owners(instance.id, created, &retired);
            }
        }
        Ok(instance)
    }

    /// API signal without payload.
    pub fn signal(&self, execution_id: ExecutionId) -> Result<()> {
        self.stimulate(
            execution_id,
            EngineError::ExecutionNotFound(execution_id),
            |c| c.signal(execution_id, None),
        )
    }

    pub fn signal_with_variables(
        &self,
        execution_id: ExecutionId,
        variables: Variables,
    ) -> Result<()> {
        self.stimulate(
            execution_id,
            EngineError::ExecutionNotFound(execution_id),
            |c| c.signal(execution_id, Some(variables)),
        )
    }

    pub fn signal_event_received(
        &self,
        signal_name: &str,
        execution_id: ExecutionId,
        payload: Option<Variables>,
    ) -> Result<()> {
        self.stimulate(
            execution_id,
            EngineError::ExecutionNotFound(execution_id),
            |c| c.signal_event_received(signal_name, execution_id, payload),
        )
    }

    pub fn message_event_received(
        &self,
        message_name: &str,
        execution_id: ExecutionId,
        payload: Option<Variables>,
    ) -> Result<()> {
        self.stimulate(
            execution_id,
            EngineError::ExecutionNotFound(execution_id),
            |c| c.message_event_received(message_name, execution_id, payload),
        )
    }

    pub fn complete_task(&self, task_id: TaskId, variables: Option<Variables>) -> Result<()> {
        self.stimulate(task_id, EngineError::TaskNotFound(task_id), |c| {
            c.complete_task(task_id, variables)
        })
    }

    /// Run one stimulus against a working copy of the instance owning
    /// `target` and commit it if the whole cascade succeeds.
    fn stimulate<F>(&self, target: Uuid, not_found: EngineError, seed: F) -> Result<()>
    where
        F: FnOnce(&mut Cascade<'_>) -> Result<()>,
    {
        let Some(slot) = self.owner_of(target).and_then(|id| self.slot(id)) else {
            return Err(not_found);
        };
        let mut committed = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let instance_id = committed.instance.id;

        let mut working = committed.clone();
        let outcome = {
            let mut cascade =
                Cascade::new(&mut working, &self.dispatcher, self.config.max_cascade_steps);
            seed(&mut cascade).and_then(|()| cascade.run())
        };
        let created = outcome.inspect_err(|e| {
            warn!(
                process_instance_id = %instance_id,
                target = %target,
                error = %e,
                "stimulus rejected, instance unchanged"
            )
        })?;

        let mut retired = working.tree.prune_ended();
        retired.extend(
            committed
                .tasks
                .keys()
                .filter(|task_id| !working.tasks.contains_key(*task_id)),
        );
        let done = CompletedInstance::of(&working);
        *committed = working;
        drop(committed);
        debug!(
            process_instance_id = %instance_id,
            created = created.len(),
            retired = retired.len(),
            "stimulus committed"
        );
        match done {
            Some(done) => self.retire_instance(done, created, retired),
            None => self.record_owners(instance_id, created, &retired),
        }
        Ok(())
    }

    // ── Queries ──

    /// Live executions of an instance positioned at `activity_id`, in tree
    /// order. Empty for an unknown instance.
    pub fn find_executions(
        &self,
        process_instance_id: ProcessInstanceId,
        activity_id: &str,
    ) -> Vec<Execution> {
        self.read_state(process_instance_id, |s| {
            s.tree
                .find_by_activity(activity_id)
                .into_iter()
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    /// A live execution, or the ended root of a completed instance. Other
    /// ended executions are gone once the stimulus that ended them commits.
    pub fn execution(&self, execution_id: ExecutionId) -> Option<Execution> {
        match self.owner_of(execution_id) {
            Some(instance_id) => self
                .read_state(instance_id, |s| s.tree.get(execution_id).cloned())
                .flatten(),
            None => self.completed_instance(execution_id).map(|c| c.root),
        }
    }

    pub fn process_instance(
        &self,
        process_instance_id: ProcessInstanceId,
    ) -> Option<ProcessInstance> {
        self.read_state(process_instance_id, |s| s.instance.clone())
            .or_else(|| {
                self.completed_instance(process_instance_id)
                    .map(|c| c.instance)
            })
    }

    /// Open user tasks of an instance, oldest first.
    pub fn tasks(&self, process_instance_id: ProcessInstanceId) -> Vec<Task> {
        self.read_state(process_instance_id, |s| {
            let mut tasks: Vec<Task> = s.tasks.values().cloned().collect();
            tasks.sort_by_key(|t| (t.created_at, t.task_id));
            tasks
        })
        .unwrap_or_default()
    }

    /// Variables visible from a live execution.
    pub fn variables(&self, execution_id: ExecutionId) -> Result<Variables> {
        let instance_id = self
            .owner_of(execution_id)
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        self.read_state(instance_id, |s| {
            s.tree
                .live(execution_id)
                .map(|_| s.tree.visible_variables(execution_id))
        })
        .unwrap_or(Err(EngineError::ExecutionNotFound(execution_id)))
    }

    // ── Internals ──

    fn slot(&self, id: ProcessInstanceId) -> Option<Arc<Mutex<InstanceState>>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn read_state<T>(
        &self,
        id: ProcessInstanceId,
        f: impl FnOnce(&InstanceState) -> T,
    ) -> Option<T> {
        let slot = self.slot(id)?;
        let state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&state))
    }

    fn write_instances(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<ProcessInstanceId, Arc<Mutex<InstanceState>>>> {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn owner_of(&self, id: Uuid) -> Option<ProcessInstanceId> {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    fn completed_instance(&self, id: ProcessInstanceId) -> Option<CompletedInstance> {
        self.completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Map `created` to the instance and forget `retired`. An id can be in
    /// both when it was created and ended by the same stimulus.
    fn record_owners(&self, instance_id: ProcessInstanceId, created: Vec<Uuid>, retired: &[Uuid]) {
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        owners.insert(instance_id, instance_id);
        owners.extend(created.into_iter().map(|id| (id, instance_id)));
        for id in retired {
            owners.remove(id);
        }
    }

    /// Move a completed instance out of the live map. Its remaining
    /// executions and tasks all ended with it, so `retired` together with
    /// the root covers every owner entry it still had.
    fn retire_instance(&self, done: CompletedInstance, created: Vec<Uuid>, retired: Vec<Uuid>) {
        let instance_id = done.instance.id;
        self.completed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance_id, done);
        self.write_instances().remove(&instance_id);

        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        for id in created.iter().chain(&retired) {
            owners.remove(id);
        }
        owners.remove(&instance_id);
        debug!(process_instance_id = %instance_id, "instance archived");
    }
}

impl Default for RuntimeEngine {
    fn default() -> Self {
        Self::in_memory()
    }
}
