use crate::records::IncidentRecord;
use crate::types::Key;
use std::collections::{BTreeMap, BTreeSet};

/// Returned by index lookups when no incident is pinned.
pub const MISSING_INCIDENT: Key = -1;

#[derive(Clone, Debug, Default)]
pub struct IncidentStore {
    incidents: BTreeMap<Key, IncidentRecord>,
    by_job: BTreeMap<Key, Key>,
    by_element_instance: BTreeMap<Key, BTreeSet<Key>>,
}

impl IncidentStore {
    pub fn create_incident(&mut self, key: Key, record: &IncidentRecord) {
        if record.is_job_incident() {
            self.by_job.insert(record.job_key, key);
        } else {
            self.by_element_instance
                .entry(record.element_instance_key)
                .or_default()
                .insert(key);
        }
        self.incidents.insert(key, record.clone());
    }

    pub fn get_incident(&self, key: Key) -> Option<&IncidentRecord> {
        self.incidents.get(&key)
    }

    pub fn get_job_incident_key(&self, job_key: Key) -> Key {
        self.by_job.get(&job_key).copied().unwrap_or(MISSING_INCIDENT)
    }

    pub fn get_element_incident_keys(&self, element_instance_key: Key) -> Vec<Key> {
        self.by_element_instance
            .get(&element_instance_key)
            .into_iter()
            .flatten()
            .copied()
            .collect()
    }

    pub fn delete_incident(&mut self, key: Key) -> Option<IncidentRecord> {
        let record = self.incidents.remove(&key)?;
        if record.is_job_incident() {
            self.by_job.remove(&record.job_key);
        } else if let Some(keys) = self.by_element_instance.get_mut(&record.element_instance_key) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_element_instance.remove(&record.element_instance_key);
            }
        }
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::types::NO_KEY;

    fn make_incident(job_key: Key, element_instance_key: Key) -> IncidentRecord {
        IncidentRecord {
            error_type: ErrorType::JobNoRetries,
            error_message: "no retries left".into(),
            bpmn_process_id: "p".into(),
            process_definition_key: 1,
            process_instance_key: 2,
            element_id: "task".into(),
            element_instance_key,
            job_key,
            variable_scope_key: element_instance_key,
        }
    }

    #[test]
    fn test_job_index_returns_sentinel_after_delete() {
        let mut store = IncidentStore::default();
        store.create_incident(50, &make_incident(7, 3));
        assert_eq!(store.get_job_incident_key(7), 50);
        assert!(store.get_element_incident_keys(3).is_empty());

        store.delete_incident(50);
        assert_eq!(store.get_job_incident_key(7), MISSING_INCIDENT);
        assert!(store.delete_incident(50).is_none());
    }

    #[test]
    fn test_element_index() {
        let mut store = IncidentStore::default();
        store.create_incident(60, &make_incident(NO_KEY, 3));
        assert_eq!(store.get_element_incident_keys(3), vec![60]);
        store.delete_incident(60);
        assert!(store.is_empty());
        assert!(store.get_element_incident_keys(3).is_empty());
    }
}
