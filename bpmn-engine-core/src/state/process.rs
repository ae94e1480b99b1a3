use crate::error::{ProcessingError, ProcessingResult};
use crate::model::ProcessGraph;
use crate::types::Key;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct DeployedProcess {
    pub key: Key,
    pub bpmn_process_id: String,
    pub version: u32,
    pub graph: Arc<ProcessGraph>,
}

/// Deployed, immutable process graphs by definition key and by latest version.
#[derive(Clone, Debug, Default)]
pub struct ProcessRepository {
    by_key: BTreeMap<Key, DeployedProcess>,
    latest: BTreeMap<String, Key>,
}

impl ProcessRepository {
    pub fn deploy(&mut self, key: Key, graph: ProcessGraph) -> DeployedProcess {
        let bpmn_process_id = graph.id().to_string();
        let version = self
            .get_latest(&bpmn_process_id)
            .map(|latest| latest.version + 1)
            .unwrap_or(1);
        let deployed = DeployedProcess {
            key,
            bpmn_process_id: bpmn_process_id.clone(),
            version,
            graph: Arc::new(graph),
        };
        self.by_key.insert(key, deployed.clone());
        self.latest.insert(bpmn_process_id, key);
        deployed
    }

    pub fn get_by_key(&self, key: Key) -> Option<&DeployedProcess> {
        self.by_key.get(&key)
    }

    /// Lookup that must succeed: a running instance always has its process.
    pub fn process(&self, key: Key) -> ProcessingResult<&DeployedProcess> {
        self.get_by_key(key).ok_or(ProcessingError::ProcessNotFound(key))
    }

    pub fn get_latest(&self, bpmn_process_id: &str) -> Option<&DeployedProcess> {
        self.latest
            .get(bpmn_process_id)
            .and_then(|key| self.by_key.get(key))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
id: simple
nodes:
  - kind: Start
    id: start
  - kind: End
    id: end
edges:
  - from: start
    to: end
"#;

    #[test]
    fn test_versions_increase_and_latest_moves() {
        let mut repo = ProcessRepository::default();
        let v1 = repo.deploy(10, ProcessGraph::from_yaml(SIMPLE).unwrap());
        let v2 = repo.deploy(11, ProcessGraph::from_yaml(SIMPLE).unwrap());
        assert_eq!((v1.version, v2.version), (1, 2));
        assert_eq!(repo.get_latest("simple").unwrap().key, 11);
        assert!(repo.get_by_key(10).is_some());
        assert!(matches!(repo.process(99), Err(ProcessingError::ProcessNotFound(99))));
    }
}
