use crate::types::{ActivityId, ExecutionId};
use serde::{Deserialize, Serialize};

/// A completed compensable activity and the handler that undoes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationEntry {
    /// Scope execution the activity completed in.
    pub scope: ExecutionId,
    pub activity: ActivityId,
    pub handler: ActivityId,
}

/// Per-instance record of compensation handlers, in completion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompensationRegistry {
    entries: Vec<CompensationEntry>,
}

impl CompensationRegistry {
    pub fn register(&mut self, scope: ExecutionId, activity: &str, handler: &str) {
        self.entries.push(CompensationEntry {
            scope,
            activity: activity.to_string(),
            handler: handler.to_string(),
        });
    }

    /// Remove and return the handlers registered in `scope`, most recently
    /// completed first. `activity` restricts the result to one activity.
    pub fn take(&mut self, scope: ExecutionId, activity: Option<&str>) -> Vec<CompensationEntry> {
        let matches = |e: &CompensationEntry| {
            e.scope == scope && activity.map_or(true, |a| a == e.activity)
        };
        let mut taken: Vec<CompensationEntry> =
            self.entries.iter().filter(|e| matches(e)).cloned().collect();
        self.entries.retain(|e| !matches(e));
        taken.reverse();
        taken
    }

    /// Drop registrations whose scope execution ended.
    pub fn discard(&mut self, ended: &[ExecutionId]) {
        self.entries.retain(|e| !ended.contains(&e.scope));
    }

    pub fn entries(&self) -> &[CompensationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_take_is_reverse_completion_order() {
        let scope = Uuid::now_v7();
        let mut registry = CompensationRegistry::default();
        registry.register(scope, "bookHotel", "cancelHotel");
        registry.register(scope, "bookFlight", "cancelFlight");

        let taken = registry.take(scope, None);
        let handlers: Vec<&str> = taken.iter().map(|e| e.handler.as_str()).collect();
        assert_eq!(handlers, vec!["cancelFlight", "cancelHotel"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_take_filters_by_scope_and_activity() {
        let outer = Uuid::now_v7();
        let inner = Uuid::now_v7();
        let mut registry = CompensationRegistry::default();
        registry.register(outer, "bookHotel", "cancelHotel");
        registry.register(outer, "bookFlight", "cancelFlight");
        registry.register(inner, "bookCar", "cancelCar");

        let taken = registry.take(outer, Some("bookHotel"));
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].handler, "cancelHotel");
        assert_eq!(registry.entries().len(), 2);

        assert!(registry.take(inner, Some("bookHotel")).is_empty());
    }

    #[test]
    fn test_discard_ended_scopes() {
        let outer = Uuid::now_v7();
        let inner = Uuid::now_v7();
        let mut registry = CompensationRegistry::default();
        registry.register(outer, "a", "undoA");
        registry.register(inner, "b", "undoB");

        registry.discard(&[inner]);
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.entries()[0].scope, outer);
    }
}
