//! Buffered messages and the correlation-key locks of message-started instances.

use crate::records::MessageRecord;
use crate::types::{Key, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default)]
pub struct MessageStore {
    messages: BTreeMap<Key, MessageRecord>,
    by_name_and_correlation_key: BTreeMap<(String, String), BTreeSet<Key>>,
    deadlines: BTreeSet<(Timestamp, Key)>,
    /// (message key, bpmn process id): message already started an instance of that process.
    correlated: BTreeSet<(Key, String)>,
    /// (bpmn process id, correlation key) → process instance holding the lock.
    active_instances: BTreeMap<(String, String), Key>,
    /// process instance → correlation key it holds.
    instance_correlation_keys: BTreeMap<Key, String>,
}

impl MessageStore {
    pub fn put(&mut self, key: Key, message: &MessageRecord) {
        self.by_name_and_correlation_key
            .entry((message.name.clone(), message.correlation_key.clone()))
            .or_default()
            .insert(key);
        self.deadlines.insert((message.deadline, key));
        self.messages.insert(key, message.clone());
    }

    pub fn get(&self, key: Key) -> Option<&MessageRecord> {
        self.messages.get(&key)
    }

    pub fn remove(&mut self, key: Key) -> Option<MessageRecord> {
        let message = self.messages.remove(&key)?;
        let index = (message.name.clone(), message.correlation_key.clone());
        if let Some(keys) = self.by_name_and_correlation_key.get_mut(&index) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_name_and_correlation_key.remove(&index);
            }
        }
        self.deadlines.remove(&(message.deadline, key));
        self.correlated.retain(|(message_key, _)| *message_key != key);
        Some(message)
    }

    /// Buffered messages with this name and correlation key, lowest key first.
    pub fn messages_for(&self, name: &str, correlation_key: &str) -> Vec<(Key, &MessageRecord)> {
        self.by_name_and_correlation_key
            .get(&(name.to_string(), correlation_key.to_string()))
            .into_iter()
            .flatten()
            .filter_map(|key| self.messages.get(key).map(|m| (*key, m)))
            .collect()
    }

    /// Messages whose deadline is before `timestamp`.
    pub fn expired_before(&self, timestamp: Timestamp) -> Vec<Key> {
        self.deadlines
            .range(..(timestamp, Key::MIN))
            .map(|(_, key)| *key)
            .collect()
    }

    pub fn exists_message_id(&self, name: &str, correlation_key: &str, message_id: &str) -> bool {
        self.messages_for(name, correlation_key)
            .into_iter()
            .any(|(_, m)| m.message_id.as_deref() == Some(message_id))
    }

    // ── Correlation ──

    pub fn put_message_correlation(&mut self, message_key: Key, bpmn_process_id: &str) {
        self.correlated.insert((message_key, bpmn_process_id.to_string()));
    }

    pub fn exists_message_correlation(&self, message_key: Key, bpmn_process_id: &str) -> bool {
        self.correlated
            .contains(&(message_key, bpmn_process_id.to_string()))
    }

    // ── Correlation-key lock ──

    pub fn put_active_process_instance(
        &mut self,
        bpmn_process_id: &str,
        correlation_key: &str,
        process_instance_key: Key,
    ) {
        self.active_instances.insert(
            (bpmn_process_id.to_string(), correlation_key.to_string()),
            process_instance_key,
        );
        self.instance_correlation_keys
            .insert(process_instance_key, correlation_key.to_string());
    }

    pub fn exists_active_process_instance(
        &self,
        bpmn_process_id: &str,
        correlation_key: &str,
    ) -> bool {
        self.active_instances
            .contains_key(&(bpmn_process_id.to_string(), correlation_key.to_string()))
    }

    pub fn get_process_instance_correlation_key(&self, process_instance_key: Key) -> Option<&str> {
        self.instance_correlation_keys
            .get(&process_instance_key)
            .map(String::as_str)
    }

    /// Release the lock held by a process instance.
    pub fn remove_active_process_instance(
        &mut self,
        bpmn_process_id: &str,
        process_instance_key: Key,
    ) {
        if let Some(correlation_key) =
            self.instance_correlation_keys.remove(&process_instance_key)
        {
            let lock = (bpmn_process_id.to_string(), correlation_key);
            if self.active_instances.get(&lock) == Some(&process_instance_key) {
                self.active_instances.remove(&lock);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_message(name: &str, correlation_key: &str, deadline: Timestamp) -> MessageRecord {
        MessageRecord {
            name: name.into(),
            correlation_key: correlation_key.into(),
            time_to_live_ms: 1_000,
            deadline,
            ..MessageRecord::default()
        }
    }

    #[test]
    fn test_messages_for_sorted_by_key() {
        let mut store = MessageStore::default();
        for key in [5, 2, 9] {
            store.put(key, &make_message("order", "k", 1_000));
        }
        store.put(3, &make_message("order", "other", 1_000));
        let keys: Vec<Key> = store.messages_for("order", "k").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![2, 5, 9]);
    }

    #[test]
    fn test_expiry_and_remove() {
        let mut store = MessageStore::default();
        store.put(1, &make_message("a", "k", 100));
        store.put(2, &make_message("a", "k", 200));
        store.put_message_correlation(1, "proc");
        assert_eq!(store.expired_before(150), vec![1]);
        store.remove(1);
        assert!(!store.exists_message_correlation(1, "proc"));
        assert_eq!(store.messages_for("a", "k").len(), 1);
    }

    #[test]
    fn test_lock_release_only_by_holder() {
        let mut store = MessageStore::default();
        store.put_active_process_instance("proc", "k", 10);
        assert!(store.exists_active_process_instance("proc", "k"));
        store.remove_active_process_instance("proc", 11);
        assert!(store.exists_active_process_instance("proc", "k"));
        store.remove_active_process_instance("proc", 10);
        assert!(!store.exists_active_process_instance("proc", "k"));
        assert!(store.get_process_instance_correlation_key(10).is_none());
    }
}
