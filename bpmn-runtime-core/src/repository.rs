use crate::definition::{ProcessDefinition, ProcessModel};
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Deployment collaborator: turns process models into versioned,
/// immutable definitions and serves them to the runtime.
pub trait DefinitionRepository: Send + Sync {
    /// Validate and store `model` as the next version of its key.
    fn deploy(&self, model: &ProcessModel) -> Result<Arc<ProcessDefinition>>;

    /// Highest deployed version of `key`.
    fn latest(&self, key: &str) -> Result<Arc<ProcessDefinition>>;

    /// Lookup by definition id (`key:version`).
    fn get(&self, definition_id: &str) -> Option<Arc<ProcessDefinition>>;
}

// ── MemoryDefinitionRepository ──

/// In-memory DefinitionRepository. Versions start at 1 and increase per key.
pub struct MemoryDefinitionRepository {
    inner: RwLock<HashMap<String, Vec<Arc<ProcessDefinition>>>>,
}

impl MemoryDefinitionRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryDefinitionRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionRepository for MemoryDefinitionRepository {
    fn deploy(&self, model: &ProcessModel) -> Result<Arc<ProcessDefinition>> {
        let mut store = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let versions = store.entry(model.key.clone()).or_default();
        let version = versions.last().map(|d| d.version + 1).unwrap_or(1);

        let definition = Arc::new(ProcessDefinition::compile(model, version)?);
        versions.push(definition.clone());

        info!(
            definition_id = %definition.id,
            activities = definition.activities().count(),
            "process definition deployed"
        );
        Ok(definition)
    }

    fn latest(&self, key: &str) -> Result<Arc<ProcessDefinition>> {
        let store = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        store
            .get(key)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| EngineError::UnknownDefinition(key.to_string()))
    }

    fn get(&self, definition_id: &str) -> Option<Arc<ProcessDefinition>> {
        let (key, _) = definition_id.rsplit_once(':')?;
        let store = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        store
            .get(key)?
            .iter()
            .find(|d| d.id == definition_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::parse_process_yaml;

    fn model(key: &str) -> ProcessModel {
        parse_process_yaml(&format!(
            r#"
key: {key}
nodes:
  - {{ kind: Start, id: start }}
  - {{ kind: End, id: end }}
edges:
  - {{ from: start, to: end }}
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_versions_increase_per_key() {
        let repo = MemoryDefinitionRepository::new();
        assert_eq!(repo.deploy(&model("a")).unwrap().id, "a:1");
        assert_eq!(repo.deploy(&model("a")).unwrap().id, "a:2");
        assert_eq!(repo.deploy(&model("b")).unwrap().id, "b:1");

        assert_eq!(repo.latest("a").unwrap().version, 2);
        assert_eq!(repo.get("a:1").unwrap().version, 1);
        assert!(repo.get("a:9").is_none());
        assert!(repo.get("nonsense").is_none());
    }

    #[test]
    fn test_latest_unknown_key() {
        let repo = MemoryDefinitionRepository::new();
        assert!(matches!(
            repo.latest("missing"),
            Err(EngineError::UnknownDefinition(k)) if k == "missing"
        ));
    }

    #[test]
    fn test_invalid_model_is_not_stored() {
        let repo = MemoryDefinitionRepository::new();
        let mut bad = model("a");
        bad.nodes.clear();
        assert!(matches!(
            repo.deploy(&bad),
            Err(EngineError::InvalidDefinition { .. })
        ));
        assert!(repo.latest("a").is_err());
        assert_eq!(repo.deploy(&model("a")).unwrap().version, 1);
    }
}
