use crate::error::{EngineError, Result};
use crate::types::*;
use std::collections::HashMap;

/// Arena of the executions of one process instance.
///
/// Nodes are keyed by id and linked through `parent` / `children`. Ended
/// executions are detached from their parent's child list at once, so every
/// traversal from the root only sees live executions; they stay in the arena
/// as tombstones until [`ExecutionTree::prune_ended`] drops them.
#[derive(Clone, Debug)]
pub struct ExecutionTree {
    root: ExecutionId,
    nodes: HashMap<ExecutionId, Execution>,
}

impl ExecutionTree {
    /// A tree holding only the root execution. The root id doubles as the
    /// process instance id.
    pub fn new(root: ExecutionId) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root, Execution::root(root));
        Self { root, nodes }
    }

    pub fn root(&self) -> &Execution {
        // The root is inserted on construction and never removed.
        &self.nodes[&self.root]
    }

    pub fn root_id(&self) -> ExecutionId {
        self.root
    }

    pub fn process_instance_id(&self) -> ProcessInstanceId {
        self.root
    }

    pub fn get(&self, id: ExecutionId) -> Option<&Execution> {
        self.nodes.get(&id)
    }

    /// Live (not ended) execution or `ExecutionNotFound`.
    pub fn live(&self, id: ExecutionId) -> Result<&Execution> {
        self.nodes
            .get(&id)
            .filter(|e| !e.is_ended)
            .ok_or(EngineError::ExecutionNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: ExecutionId) -> Result<&mut Execution> {
        self.nodes
            .get_mut(&id)
            .ok_or(EngineError::ExecutionNotFound(id))
    }

    pub fn contains(&self, id: ExecutionId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Nodes held by the arena, tombstones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ── Mutation primitives ──

    /// Create a new active execution under `parent`.
    pub fn create_child(&mut self, parent: ExecutionId) -> Result<&mut Execution> {
        let child = match self.nodes.get(&parent) {
            Some(p) if !p.is_ended => Execution::child_of(p),
            _ => return Err(EngineError::InvalidParent { parent }),
        };
        let id = child.id;
        self.nodes.insert(id, child);
        self.get_mut(parent)?.children.push(id);
        self.get_mut(id)
    }

    /// Record the position of an execution. Dispatches nothing.
    pub fn set_activity(
        &mut self,
        id: ExecutionId,
        activity_id: Option<ActivityId>,
    ) -> Result<()> {
        self.get_mut(id)?.activity_id = activity_id;
        Ok(())
    }

    /// End `id` and all its live descendants, children before parents, then
    /// detach it from its parent. Returns the ended ids in end order; empty
    /// when `id` was already ended.
    pub fn end(&mut self, id: ExecutionId) -> Result<Vec<ExecutionId>> {
        let exec = self
            .nodes
            .get(&id)
            .ok_or(EngineError::ExecutionNotFound(id))?;
        if exec.is_ended {
            return Ok(Vec::new());
        }
        let parent = exec.parent;

        let mut ended = Vec::new();
        self.end_subtree(id, &mut ended);

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        Ok(ended)
    }

    fn end_subtree(&mut self, id: ExecutionId, ended: &mut Vec<ExecutionId>) {
        let children = match self.nodes.get_mut(&id) {
            Some(exec) => std::mem::take(&mut exec.children),
            None => return,
        };
        for child in children {
            if self.nodes.get(&child).is_some_and(|c| !c.is_ended) {
                self.end_subtree(child, ended);
            }
        }
        if let Some(exec) = self.nodes.get_mut(&id) {
            exec.is_ended = true;
            exec.is_active = false;
        }
        ended.push(id);
    }

    /// Drop every ended execution except the root and return their ids.
    /// Ended nodes are already detached, so no live link points at them.
    pub fn prune_ended(&mut self) -> Vec<ExecutionId> {
        let root = self.root;
        let pruned: Vec<ExecutionId> = self
            .nodes
            .values()
            .filter(|e| e.is_ended && e.id != root)
            .map(|e| e.id)
            .collect();
        for id in &pruned {
            self.nodes.remove(id);
        }
        pruned
    }

    pub fn is_active(&self, id: ExecutionId) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|e| !e.is_ended && e.is_active)
    }

    // ── Traversal ──

    /// Live executions in pre-order (parent before children, children in
    /// creation order).
    pub fn preorder(&self) -> Vec<&Execution> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(exec) = self.nodes.get(&id).filter(|e| !e.is_ended) else {
                continue;
            };
            out.push(exec);
            stack.extend(exec.children.iter().rev());
        }
        out
    }

    /// Live executions positioned at `activity_id`, in pre-order.
    pub fn find_by_activity(&self, activity_id: &str) -> Vec<&Execution> {
        self.preorder()
            .into_iter()
            .filter(|e| e.activity_id.as_deref() == Some(activity_id))
            .collect()
    }

    pub fn live_children(&self, id: ExecutionId) -> &[ExecutionId] {
        self.nodes
            .get(&id)
            .map(|e| e.children.as_slice())
            .unwrap_or_default()
    }

    /// First scope execution on the path from `id` up to the root, `id`
    /// included.
    pub fn nearest_scope(&self, id: ExecutionId) -> ExecutionId {
        let mut current = id;
        while let Some(exec) = self.nodes.get(&current) {
            if exec.is_scope {
                return current;
            }
            match exec.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        self.root
    }

    /// `id` followed by its ancestors up to the root.
    pub fn ancestry(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            let Some(exec) = self.nodes.get(&current) else {
                break;
            };
            chain.push(current);
            next = exec.parent;
        }
        chain
    }

    // ── Variables ──

    /// Resolve a variable up the parent chain.
    pub fn variable(&self, id: ExecutionId, name: &str) -> Option<&serde_json::Value> {
        self.ancestry(id)
            .into_iter()
            .find_map(|e| self.nodes.get(&e).and_then(|e| e.variables.get(name)))
    }

    /// Every variable visible from `id`; nearer executions shadow outer ones.
    pub fn visible_variables(&self, id: ExecutionId) -> Variables {
        let mut merged = Variables::new();
        for exec_id in self.ancestry(id).into_iter().rev() {
            if let Some(exec) = self.nodes.get(&exec_id) {
                merged.extend(exec.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        merged
    }

    /// Write to the nearest execution already holding `name`, otherwise to
    /// the root.
    pub fn set_variable(&mut self, id: ExecutionId, name: &str, value: serde_json::Value) {
        let holder = self
            .ancestry(id)
            .into_iter()
            .find(|e| {
                self.nodes
                    .get(e)
                    .is_some_and(|e| e.variables.contains_key(name))
            })
            .unwrap_or(self.root);
        if let Some(exec) = self.nodes.get_mut(&holder) {
            exec.variables.insert(name.to_string(), value);
        }
    }

    pub fn set_variables(&mut self, id: ExecutionId, variables: &Variables) {
        for (name, value) in variables {
            self.set_variable(id, name, value.clone());
        }
    }
}
