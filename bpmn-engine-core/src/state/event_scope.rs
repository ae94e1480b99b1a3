use crate::types::{Document, Key};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether a scope takes triggers, and which trigger ids interrupt it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventScopeInstance {
    pub accepting: bool,
    /// Set once an interrupting trigger was accepted.
    pub interrupted: bool,
    pub interrupting_element_ids: BTreeSet<String>,
}

impl EventScopeInstance {
    pub fn is_interrupting(&self, element_id: &str) -> bool {
        self.interrupting_element_ids.contains(element_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub event_key: Key,
    pub element_id: String,
    pub variables: Document,
    pub process_instance_key: Key,
}

/// Event scopes keyed by element instance; start-event triggers keyed by process
/// definition key. Triggers of a scope are ordered by event key (FIFO).
#[derive(Clone, Debug, Default)]
pub struct EventScopeStore {
    scopes: BTreeMap<Key, EventScopeInstance>,
    triggers: BTreeMap<(Key, Key), EventTrigger>,
}

impl EventScopeStore {
    pub fn create_instance(&mut self, key: Key, interrupting_element_ids: BTreeSet<String>) {
        self.scopes.insert(
            key,
            EventScopeInstance {
                accepting: true,
                interrupted: false,
                interrupting_element_ids,
            },
        );
    }

    pub fn get_instance(&self, key: Key) -> Option<&EventScopeInstance> {
        self.scopes.get(&key)
    }

    /// Stop accepting any trigger (the scope is terminating).
    pub fn shutdown_instance(&mut self, key: Key) {
        if let Some(scope) = self.scopes.get_mut(&key) {
            scope.accepting = false;
        }
    }

    pub fn delete_instance(&mut self, key: Key) {
        self.scopes.remove(&key);
        self.delete_triggers(key);
    }

    pub fn can_trigger_event(&self, key: Key, element_id: &str) -> bool {
        match self.scopes.get(&key) {
            Some(scope) => {
                scope.accepting && !(scope.interrupted && scope.is_interrupting(element_id))
            }
            None => false,
        }
    }

    /// Queue a trigger if the scope accepts it. The first accepted interrupting
    /// trigger marks the scope interrupted; later interrupting triggers are refused.
    pub fn trigger_event(
        &mut self,
        key: Key,
        event_key: Key,
        element_id: &str,
        variables: Document,
        process_instance_key: Key,
    ) -> bool {
        let Some(scope) = self.scopes.get_mut(&key) else {
            return false;
        };
        if !scope.accepting {
            return false;
        }
        if scope.is_interrupting(element_id) {
            if scope.interrupted {
                return false;
            }
            scope.interrupted = true;
        }
        self.queue_trigger(key, event_key, element_id, variables, process_instance_key);
        true
    }

    /// Start-event triggers always queue: they create new instances.
    pub fn trigger_start_event(
        &mut self,
        process_definition_key: Key,
        event_key: Key,
        element_id: &str,
        variables: Document,
        process_instance_key: Key,
    ) {
        self.queue_trigger(
            process_definition_key,
            event_key,
            element_id,
            variables,
            process_instance_key,
        );
    }

    fn queue_trigger(
        &mut self,
        key: Key,
        event_key: Key,
        element_id: &str,
        variables: Document,
        process_instance_key: Key,
    ) {
        self.triggers.insert(
            (key, event_key),
            EventTrigger {
                event_key,
                element_id: element_id.to_string(),
                variables,
                process_instance_key,
            },
        );
    }

    /// Oldest pending trigger of a scope.
    pub fn peek_event_trigger(&self, key: Key) -> Option<EventTrigger> {
        self.triggers
            .range((key, Key::MIN)..=(key, Key::MAX))
            .next()
            .map(|(_, trigger)| trigger.clone())
    }

    pub fn poll_event_trigger(&mut self, key: Key) -> Option<EventTrigger> {
        let trigger = self.peek_event_trigger(key)?;
        self.triggers.remove(&(key, trigger.event_key));
        Some(trigger)
    }

    pub fn delete_trigger(&mut self, key: Key, event_key: Key) {
        self.triggers.remove(&(key, event_key));
    }

    fn delete_triggers(&mut self, key: Key) {
        self.triggers.retain(|(scope, _), _| *scope != key);
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_scope(interrupting: &[&str]) -> EventScopeStore {
        let mut store = EventScopeStore::default();
        store.create_instance(1, interrupting.iter().map(|s| s.to_string()).collect());
        store
    }

    /// Event-scope singularity: one interrupting trigger per scope, FIFO for the rest.
    #[test]
    fn test_single_interrupting_trigger_then_fifo() {
        let mut store = make_scope(&["A", "B"]);
        assert!(store.trigger_event(1, 10, "A", Document::new(), 1));
        assert_eq!(store.peek_event_trigger(1).unwrap().element_id, "A");

        assert!(!store.trigger_event(1, 11, "A", Document::new(), 1));
        assert!(!store.trigger_event(1, 12, "B", Document::new(), 1));
        assert!(!store.can_trigger_event(1, "B"));

        for (event_key, id) in [(13, "n1"), (14, "n2"), (15, "n3")] {
            assert!(store.trigger_event(1, event_key, id, Document::new(), 1));
        }
        let order: Vec<String> = std::iter::from_fn(|| store.poll_event_trigger(1))
            .map(|t| t.element_id)
            .collect();
        assert_eq!(order, vec!["A", "n1", "n2", "n3"]);
    }

    #[test]
    fn test_shutdown_scope_refuses_everything() {
        let mut store = make_scope(&["A"]);
        store.shutdown_instance(1);
        assert!(!store.trigger_event(1, 10, "n", Document::new(), 1));
        assert!(!store.trigger_event(1, 11, "A", Document::new(), 1));
        assert!(store.peek_event_trigger(1).is_none());
    }

    #[test]
    fn test_delete_instance_drops_triggers() {
        let mut store = make_scope(&[]);
        store.trigger_event(1, 10, "n", Document::new(), 1);
        store.delete_instance(1);
        assert_eq!(store.trigger_count(), 0);
        assert!(!store.can_trigger_event(1, "n"));
    }

    #[test]
    fn test_start_event_triggers_need_no_scope() {
        let mut store = EventScopeStore::default();
        store.trigger_start_event(500, 7, "start", Document::new(), 8);
        let trigger = store.poll_event_trigger(500).unwrap();
        assert_eq!(trigger.process_instance_key, 8);
    }
}
