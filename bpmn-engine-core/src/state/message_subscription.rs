use crate::records::MessageSubscriptionRecord;
use crate::types::Key;
use std::collections::{BTreeMap, BTreeSet};

/// A message start event of the latest version of a process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageStartEventSubscription {
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub start_event_id: String,
    pub message_name: String,
}

/// Open catch-event subscriptions plus the message start event subscriptions.
#[derive(Clone, Debug, Default)]
pub struct MessageSubscriptionStore {
    subscriptions: BTreeMap<(Key, String), MessageSubscriptionRecord>,
    by_name_and_correlation_key: BTreeMap<(String, String), BTreeSet<(Key, String)>>,
    /// message name → bpmn process id → subscription
    start_events: BTreeMap<String, BTreeMap<String, Vec<MessageStartEventSubscription>>>,
}

impl MessageSubscriptionStore {
    pub fn put(&mut self, record: &MessageSubscriptionRecord) {
        let key = (record.element_instance_key, record.element_id.clone());
        self.by_name_and_correlation_key
            .entry((record.message_name.clone(), record.correlation_key.clone()))
            .or_default()
            .insert(key.clone());
        self.subscriptions.insert(key, record.clone());
    }

    pub fn get(
        &self,
        element_instance_key: Key,
        element_id: &str,
    ) -> Option<&MessageSubscriptionRecord> {
        self.subscriptions
            .get(&(element_instance_key, element_id.to_string()))
    }

    pub fn remove(
        &mut self,
        element_instance_key: Key,
        element_id: &str,
    ) -> Option<MessageSubscriptionRecord> {
        let key = (element_instance_key, element_id.to_string());
        let record = self.subscriptions.remove(&key)?;
        let index = (record.message_name.clone(), record.correlation_key.clone());
        if let Some(keys) = self.by_name_and_correlation_key.get_mut(&index) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_name_and_correlation_key.remove(&index);
            }
        }
        Some(record)
    }

    pub fn subscriptions_for_element_instance(
        &self,
        element_instance_key: Key,
    ) -> Vec<MessageSubscriptionRecord> {
        self.subscriptions
            .range((element_instance_key, String::new())..)
            .take_while(|((key, _), _)| *key == element_instance_key)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Open subscriptions for a message, oldest element instance first.
    pub fn subscriptions_for(
        &self,
        message_name: &str,
        correlation_key: &str,
    ) -> Vec<MessageSubscriptionRecord> {
        self.by_name_and_correlation_key
            .get(&(message_name.to_string(), correlation_key.to_string()))
            .into_iter()
            .flatten()
            .filter_map(|key| self.subscriptions.get(key).cloned())
            .collect()
    }

    // ── Start events ──

    /// Replace the start event subscriptions of a process with those of its newest version.
    pub fn replace_start_event_subscriptions(
        &mut self,
        bpmn_process_id: &str,
        subscriptions: Vec<MessageStartEventSubscription>,
    ) {
        for by_process in self.start_events.values_mut() {
            by_process.remove(bpmn_process_id);
        }
        self.start_events.retain(|_, by_process| !by_process.is_empty());
        for subscription in subscriptions {
            self.start_events
                .entry(subscription.message_name.clone())
                .or_default()
                .entry(subscription.bpmn_process_id.clone())
                .or_default()
                .push(subscription);
        }
    }

    pub fn start_event_subscriptions(
        &self,
        message_name: &str,
    ) -> Vec<MessageStartEventSubscription> {
        self.start_events
            .get(message_name)
            .into_iter()
            .flat_map(|by_process| by_process.values().flatten().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;

    fn make_subscription(element_instance_key: Key, element_id: &str) -> MessageSubscriptionRecord {
        MessageSubscriptionRecord {
            element_instance_key,
            process_instance_key: 1,
            bpmn_process_id: "p".into(),
            element_id: element_id.into(),
            message_name: "paid".into(),
            correlation_key: "order-1".into(),
            interrupting: true,
            message_key: -1,
            variables: Document::new(),
        }
    }

    #[test]
    fn test_put_lookup_remove() {
        let mut store = MessageSubscriptionStore::default();
        store.put(&make_subscription(5, "wait"));
        store.put(&make_subscription(6, "boundary"));
        assert_eq!(store.subscriptions_for("paid", "order-1").len(), 2);
        assert_eq!(store.subscriptions_for_element_instance(5).len(), 1);
        store.remove(5, "wait");
        assert_eq!(store.subscriptions_for("paid", "order-1").len(), 1);
        assert!(store.get(5, "wait").is_none());
    }

    #[test]
    fn test_newer_version_replaces_start_subscriptions() {
        let mut store = MessageSubscriptionStore::default();
        let make = |key, message: &str| MessageStartEventSubscription {
            process_definition_key: key,
            bpmn_process_id: "p".into(),
            start_event_id: "start".into(),
            message_name: message.into(),
        };
        store.replace_start_event_subscriptions("p", vec![make(1, "a")]);
        store.replace_start_event_subscriptions("p", vec![make(2, "b")]);
        assert!(store.start_event_subscriptions("a").is_empty());
        assert_eq!(store.start_event_subscriptions("b")[0].process_definition_key, 2);
    }
}
