use crate::error::{ProcessingError, ProcessingResult};
use crate::records::ProcessInstanceRecord;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ─── Element instance ─────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementInstance {
    pub key: Key,
    /// Flow scope instance; `NO_KEY` for a root process instance.
    pub parent_key: Key,
    pub state: ProcessInstanceIntent,
    pub value: ProcessInstanceRecord,
    /// Direct children not yet removed.
    pub active_element_instances: u32,
    /// In-flight execution branches of this scope.
    pub active_tokens: u32,
    pub job_key: Key,
    /// Event key of the interrupting event sub-process trigger, once interrupted.
    pub interrupting_event_key: Key,
    /// Child process instance created by a call activity.
    pub called_child_instance_key: Key,
    pub multi_instance_loop_counter: u32,
}

impl ElementInstance {
    pub fn new(
        key: Key,
        parent_key: Key,
        state: ProcessInstanceIntent,
        value: ProcessInstanceRecord,
    ) -> Self {
        Self {
            key,
            parent_key,
            state,
            value,
            active_element_instances: 0,
            active_tokens: 0,
            job_key: NO_KEY,
            interrupting_event_key: NO_KEY,
            called_child_instance_key: NO_KEY,
            multi_instance_loop_counter: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active_state()
    }

    pub fn is_terminating(&self) -> bool {
        self.state == ProcessInstanceIntent::ElementTerminating
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupting_event_key > 0
    }

    pub fn can_terminate(&self) -> bool {
        self.is_active()
    }
}

// ─── Deferred records ─────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Purpose {
    Deferred,
}

/// A follow-up command kept back until its parent allows publishing it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeferredRecord {
    pub key: Key,
    pub parent_key: Key,
    pub purpose: Purpose,
    pub intent: ProcessInstanceIntent,
    pub value: ProcessInstanceRecord,
}

/// What a removal took out of the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Removal {
    /// Removed instance keys, deepest first.
    pub instances: Vec<Key>,
    /// Keys of deferred records dropped with their parents.
    pub deferred: Vec<Key>,
}

// ─── Store ────────────────────────────────────────────────────

/// Keyed arena of element instances. Callers get copies and write them back;
/// no reference into the store outlives a call.
#[derive(Clone, Debug, Default)]
pub struct ElementInstanceStore {
    instances: BTreeMap<Key, ElementInstance>,
    children: BTreeMap<Key, BTreeSet<Key>>,
    /// (flow scope key, gateway id) → taken incoming flow id → count.
    taken_flows: BTreeMap<(Key, String), BTreeMap<String, u32>>,
    deferred: BTreeMap<(Key, Key), DeferredRecord>,
}

impl ElementInstanceStore {
    /// Create an instance under `parent_key` (or as a root with `NO_KEY`).
    pub fn new_instance(
        &mut self,
        parent_key: Key,
        key: Key,
        value: ProcessInstanceRecord,
        state: ProcessInstanceIntent,
    ) -> ProcessingResult<ElementInstance> {
        if parent_key != NO_KEY {
            let parent = self
                .instances
                .get_mut(&parent_key)
                .ok_or(ProcessingError::ElementInstanceNotFound(parent_key))?;
            parent.active_element_instances += 1;
            self.children.entry(parent_key).or_default().insert(key);
        }
        let instance = ElementInstance::new(key, parent_key, state, value);
        self.instances.insert(key, instance.clone());
        Ok(instance)
    }

    pub fn get_instance(&self, key: Key) -> Option<ElementInstance> {
        self.instances.get(&key).cloned()
    }

    pub fn instance(&self, key: Key) -> ProcessingResult<ElementInstance> {
        self.get_instance(key)
            .ok_or(ProcessingError::ElementInstanceNotFound(key))
    }

    pub fn contains(&self, key: Key) -> bool {
        self.instances.contains_key(&key)
    }

    /// Write back a modified copy.
    pub fn update_instance(&mut self, instance: ElementInstance) -> ProcessingResult<()> {
        let slot = self
            .instances
            .get_mut(&instance.key)
            .ok_or(ProcessingError::ElementInstanceNotFound(instance.key))?;
        *slot = instance;
        Ok(())
    }

    pub fn set_state(&mut self, key: Key, state: ProcessInstanceIntent) -> ProcessingResult<()> {
        let instance = self
            .instances
            .get_mut(&key)
            .ok_or(ProcessingError::ElementInstanceNotFound(key))?;
        instance.state = state;
        Ok(())
    }

    pub fn children(&self, parent_key: Key) -> Vec<ElementInstance> {
        self.children
            .get(&parent_key)
            .into_iter()
            .flatten()
            .filter_map(|key| self.instances.get(key).cloned())
            .collect()
    }

    /// Remove an instance and, recursively, its children, their deferred records and
    /// join counters.
    pub fn remove_instance(&mut self, key: Key) -> ProcessingResult<Removal> {
        let instance = self
            .instances
            .get(&key)
            .ok_or(ProcessingError::ElementInstanceNotFound(key))?;
        let parent_key = instance.parent_key;

        let mut removed = Removal::default();
        self.remove_subtree(key, &mut removed);

        if parent_key != NO_KEY {
            if let Some(siblings) = self.children.get_mut(&parent_key) {
                siblings.remove(&key);
                if siblings.is_empty() {
                    self.children.remove(&parent_key);
                }
            }
            if let Some(parent) = self.instances.get_mut(&parent_key) {
                parent.active_element_instances = parent
                    .active_element_instances
                    .checked_sub(1)
                    .ok_or(ProcessingError::CounterUnderflow {
                        key: parent_key,
                        counter: "active_element_instances",
                    })?;
            }
        }
        Ok(removed)
    }

    fn remove_subtree(&mut self, key: Key, removed: &mut Removal) {
        if let Some(children) = self.children.remove(&key) {
            for child in children {
                self.remove_subtree(child, removed);
            }
        }
        self.instances.remove(&key);
        let dropped: Vec<(Key, Key)> = self
            .deferred
            .range((key, Key::MIN)..=(key, Key::MAX))
            .map(|(entry, _)| *entry)
            .collect();
        for entry in dropped {
            self.deferred.remove(&entry);
            removed.deferred.push(entry.1);
        }
        self.taken_flows.retain(|(scope, _), _| *scope != key);
        removed.instances.push(key);
    }

    // ── Tokens ──

    pub fn spawn_token(&mut self, key: Key) -> ProcessingResult<u32> {
        let instance = self
            .instances
            .get_mut(&key)
            .ok_or(ProcessingError::ElementInstanceNotFound(key))?;
        instance.active_tokens += 1;
        Ok(instance.active_tokens)
    }

    pub fn consume_token(&mut self, key: Key) -> ProcessingResult<u32> {
        let instance = self
            .instances
            .get_mut(&key)
            .ok_or(ProcessingError::ElementInstanceNotFound(key))?;
        instance.active_tokens = instance
            .active_tokens
            .checked_sub(1)
            .ok_or(ProcessingError::CounterUnderflow {
                key,
                counter: "active_tokens",
            })?;
        Ok(instance.active_tokens)
    }

    // ── Joins ──

    pub fn increment_taken_flow(&mut self, scope_key: Key, gateway_id: &str, flow_id: &str) {
        *self
            .taken_flows
            .entry((scope_key, gateway_id.to_string()))
            .or_default()
            .entry(flow_id.to_string())
            .or_insert(0) += 1;
    }

    /// Number of distinct incoming flows taken at least once.
    pub fn distinct_taken_flows(&self, scope_key: Key, gateway_id: &str) -> usize {
        self.taken_flows
            .get(&(scope_key, gateway_id.to_string()))
            .map(|flows| flows.values().filter(|count| **count > 0).count())
            .unwrap_or(0)
    }

    /// Consume one take of every incoming flow (a join fired).
    pub fn decrement_taken_flows(&mut self, scope_key: Key, gateway_id: &str) {
        let entry_key = (scope_key, gateway_id.to_string());
        if let Some(flows) = self.taken_flows.get_mut(&entry_key) {
            flows.values_mut().for_each(|count| *count = count.saturating_sub(1));
            flows.retain(|_, count| *count > 0);
            if flows.is_empty() {
                self.taken_flows.remove(&entry_key);
            }
        }
    }

    // ── Deferred records ──

    pub fn store_record(&mut self, record: DeferredRecord) {
        self.deferred.insert((record.parent_key, record.key), record);
    }

    pub fn deferred_records(&self, parent_key: Key) -> Vec<DeferredRecord> {
        self.deferred
            .range((parent_key, Key::MIN)..=(parent_key, Key::MAX))
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn remove_stored_record(
        &mut self,
        parent_key: Key,
        key: Key,
        purpose: Purpose,
    ) -> Option<DeferredRecord> {
        match self.deferred.get(&(parent_key, key)) {
            Some(record) if record.purpose == purpose => self.deferred.remove(&(parent_key, key)),
            _ => None,
        }
    }

    /// Every deferred entry whose parent no longer exists. Empty in a healthy store.
    pub fn orphaned_deferred_records(&self) -> Vec<Key> {
        self.deferred
            .keys()
            .filter(|(parent, _)| !self.instances.contains_key(parent))
            .map(|(_, key)| *key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(element_id: &str, flow_scope_key: Key) -> ProcessInstanceRecord {
        ProcessInstanceRecord {
            bpmn_process_id: "p".into(),
            version: 1,
            process_definition_key: 100,
            process_instance_key: 1,
            element_id: element_id.into(),
            flow_scope_key,
            bpmn_element_type: BpmnElementType::ServiceTask,
            bpmn_event_type: BpmnEventType::None,
            parent_process_instance_key: NO_KEY,
            parent_element_instance_key: NO_KEY,
        }
    }

    fn make_deferred(key: Key, parent_key: Key) -> DeferredRecord {
        DeferredRecord {
            key,
            parent_key,
            purpose: Purpose::Deferred,
            intent: ProcessInstanceIntent::ActivateElement,
            value: make_record("b", parent_key),
        }
    }

    #[test]
    fn test_child_counter_follows_create_and_remove() {
        let mut store = ElementInstanceStore::default();
        store
            .new_instance(
                NO_KEY,
                1,
                make_record("p", NO_KEY),
                ProcessInstanceIntent::ElementActivating,
            )
            .unwrap();
        store
            .new_instance(1, 2, make_record("a", 1), ProcessInstanceIntent::ElementActivating)
            .unwrap();
        assert_eq!(store.instance(1).unwrap().active_element_instances, 1);
        store.remove_instance(2).unwrap();
        assert_eq!(store.instance(1).unwrap().active_element_instances, 0);
        assert!(store.children(1).is_empty());
    }

    #[test]
    fn test_missing_parent_is_fatal() {
        let mut store = ElementInstanceStore::default();
        let result = store.new_instance(
            9,
            2,
            make_record("a", 9),
            ProcessInstanceIntent::ElementActivating,
        );
        assert!(matches!(result, Err(ProcessingError::ElementInstanceNotFound(9))));
    }

    /// Token conservation: spawns minus consumes equals the counter, never below zero.
    #[test]
    fn test_token_counter_never_negative() {
        let mut store = ElementInstanceStore::default();
        store
            .new_instance(
                NO_KEY,
                1,
                make_record("p", NO_KEY),
                ProcessInstanceIntent::ElementActivated,
            )
            .unwrap();
        let ops = [true, true, false, true, false, false];
        let mut expected = 0u32;
        for spawn in ops {
            let counter = if spawn {
                expected += 1;
                store.spawn_token(1).unwrap()
            } else {
                expected -= 1;
                store.consume_token(1).unwrap()
            };
            assert_eq!(counter, expected);
        }
        assert!(matches!(
            store.consume_token(1),
            Err(ProcessingError::CounterUnderflow { .. })
        ));
        assert_eq!(store.instance(1).unwrap().active_tokens, 0);
    }

    /// Deferred-record cleanup: removing the parent drains every entry.
    #[test]
    fn test_removing_parent_drains_deferred_records() {
        let mut store = ElementInstanceStore::default();
        store
            .new_instance(
                NO_KEY,
                1,
                make_record("p", NO_KEY),
                ProcessInstanceIntent::ElementActivated,
            )
            .unwrap();
        store
            .new_instance(1, 2, make_record("sub", 1), ProcessInstanceIntent::ElementActivated)
            .unwrap();
        for key in 10..15 {
            store.store_record(make_deferred(key, 1));
        }
        store.store_record(make_deferred(20, 2));
        assert_eq!(store.deferred_records(1).len(), 5);

        let removal = store.remove_instance(1).unwrap();
        assert_eq!(removal.instances, vec![2, 1]);
        assert_eq!(removal.deferred, vec![20, 10, 11, 12, 13, 14]);
        assert!(store.deferred_records(1).is_empty());
        assert!(store.deferred_records(2).is_empty());
        assert_eq!(store.deferred_len(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_one_deferred_record_checks_purpose() {
        let mut store = ElementInstanceStore::default();
        store.store_record(make_deferred(10, 1));
        store.store_record(make_deferred(11, 1));
        assert!(store.remove_stored_record(1, 10, Purpose::Deferred).is_some());
        assert!(store.remove_stored_record(1, 10, Purpose::Deferred).is_none());
        assert_eq!(store.deferred_records(1).len(), 1);
    }

    #[test]
    fn test_join_counts_distinct_flows() {
        let mut store = ElementInstanceStore::default();
        store.increment_taken_flow(1, "join", "a");
        store.increment_taken_flow(1, "join", "a");
        assert_eq!(store.distinct_taken_flows(1, "join"), 1);
        store.increment_taken_flow(1, "join", "b");
        assert_eq!(store.distinct_taken_flows(1, "join"), 2);
        store.decrement_taken_flows(1, "join");
        // One extra take of `a` is left for the next round.
        assert_eq!(store.distinct_taken_flows(1, "join"), 1);
    }
}
