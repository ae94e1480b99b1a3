use crate::records::TimerRecord;
use crate::types::{Key, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub struct TimerInstance {
    pub key: Key,
    pub record: TimerRecord,
}

/// Timers ordered by due date.
#[derive(Clone, Debug, Default)]
pub struct TimerStore {
    timers: BTreeMap<Key, TimerRecord>,
    due_dates: BTreeSet<(Timestamp, Key)>,
    by_element_instance: BTreeMap<Key, BTreeSet<Key>>,
}

impl TimerStore {
    pub fn put(&mut self, key: Key, record: &TimerRecord) {
        self.due_dates.insert((record.due_date, key));
        self.by_element_instance
            .entry(record.element_instance_key)
            .or_default()
            .insert(key);
        self.timers.insert(key, record.clone());
    }

    pub fn get(&self, key: Key) -> Option<TimerInstance> {
        self.timers.get(&key).map(|record| TimerInstance {
            key,
            record: record.clone(),
        })
    }

    pub fn remove(&mut self, key: Key) -> Option<TimerRecord> {
        let record = self.timers.remove(&key)?;
        self.due_dates.remove(&(record.due_date, key));
        if let Some(keys) = self.by_element_instance.get_mut(&record.element_instance_key) {
            keys.remove(&key);
            if keys.is_empty() {
                self.by_element_instance.remove(&record.element_instance_key);
            }
        }
        Some(record)
    }

    pub fn timers_for_element_instance(&self, element_instance_key: Key) -> Vec<TimerInstance> {
        self.by_element_instance
            .get(&element_instance_key)
            .into_iter()
            .flatten()
            .filter_map(|key| self.get(*key))
            .collect()
    }

    /// Timers due at or before `timestamp`, earliest first.
    pub fn find_due(&self, timestamp: Timestamp) -> Vec<TimerInstance> {
        self.due_dates
            .range(..=(timestamp, Key::MAX))
            .filter_map(|(_, key)| self.get(*key))
            .collect()
    }

    pub fn next_due_date(&self) -> Option<Timestamp> {
        self.due_dates.iter().next().map(|(due, _)| *due)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_timer(element_instance_key: Key, due_date: Timestamp) -> TimerRecord {
        TimerRecord {
            element_instance_key,
            process_instance_key: 1,
            process_definition_key: 2,
            due_date,
            target_element_id: "wait".into(),
        }
    }

    #[test]
    fn test_due_timers_in_due_order() {
        let mut store = TimerStore::default();
        store.put(10, &make_timer(3, 300));
        store.put(11, &make_timer(4, 100));
        store.put(12, &make_timer(5, 200));

        let due: Vec<Key> = store.find_due(200).into_iter().map(|t| t.key).collect();
        assert_eq!(due, vec![11, 12]);
        assert_eq!(store.next_due_date(), Some(100));
    }

    #[test]
    fn test_remove_cleans_indices() {
        let mut store = TimerStore::default();
        store.put(10, &make_timer(3, 300));
        assert_eq!(store.timers_for_element_instance(3).len(), 1);
        store.remove(10);
        assert!(store.timers_for_element_instance(3).is_empty());
        assert!(store.find_due(i64::MAX).is_empty());
    }
}
