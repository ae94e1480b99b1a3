//! Record writers and the in-memory log.
//!
//! Processing a command never touches the log directly: follow-up records are
//! buffered in [`Writers`] and committed together once the command succeeded.

use crate::records::{Record, RecordValue};
use crate::types::{Intent, Key, RecordType, Timestamp, NO_KEY};
use std::collections::VecDeque;

/// Sink for the records produced while processing one command.
pub trait RecordWriter {
    /// An event about `key`. The caller has already applied it to state.
    fn append_follow_up_event(&mut self, key: Key, intent: Intent, value: RecordValue);

    /// A command without a key yet (e.g. a request to create an incident).
    fn append_new_command(&mut self, intent: Intent, value: RecordValue);

    fn append_follow_up_command(&mut self, key: Key, intent: Intent, value: RecordValue);

    fn append_rejection(&mut self, command: &Record, reason: &str);
}

/// A record written during the current step, not yet committed.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingRecord {
    pub key: Key,
    pub record_type: RecordType,
    pub intent: Intent,
    pub value: RecordValue,
    pub rejection_reason: Option<String>,
}

/// Buffers the records of one processing step.
#[derive(Debug, Default)]
pub struct Writers {
    pending: Vec<PendingRecord>,
}

impl Writers {
    pub fn take(&mut self) -> Vec<PendingRecord> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[PendingRecord] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn push(&mut self, key: Key, record_type: RecordType, intent: Intent, value: RecordValue) {
        self.pending.push(PendingRecord {
            key,
            record_type,
            intent,
            value,
            rejection_reason: None,
        });
    }
}

impl RecordWriter for Writers {
    fn append_follow_up_event(&mut self, key: Key, intent: Intent, value: RecordValue) {
        self.push(key, RecordType::Event, intent, value);
    }

    fn append_new_command(&mut self, intent: Intent, value: RecordValue) {
        self.push(NO_KEY, RecordType::Command, intent, value);
    }

    fn append_follow_up_command(&mut self, key: Key, intent: Intent, value: RecordValue) {
        self.push(key, RecordType::Command, intent, value);
    }

    fn append_rejection(&mut self, command: &Record, reason: &str) {
        self.pending.push(PendingRecord {
            key: command.key,
            record_type: RecordType::CommandRejection,
            intent: command.intent,
            value: command.value.clone(),
            rejection_reason: Some(reason.to_string()),
        });
    }
}

// ─── Log ──────────────────────────────────────────────────────

/// Append-only log of committed records plus the queue of unprocessed commands.
#[derive(Clone, Debug, Default)]
pub struct RecordLog {
    records: Vec<Record>,
    /// Indices into `records` of commands not yet processed, in log order.
    queue: VecDeque<usize>,
}

impl RecordLog {
    /// Write an external command. Returns its position.
    pub fn write_command(
        &mut self,
        key: Key,
        intent: Intent,
        value: RecordValue,
        timestamp: Timestamp,
    ) -> u64 {
        self.push(PendingRecord {
            key,
            record_type: RecordType::Command,
            intent,
            value,
            rejection_reason: None,
        }, timestamp, 0)
    }

    /// Commit the records of a processed command. Follow-up commands are queued.
    pub fn commit(
        &mut self,
        pending: Vec<PendingRecord>,
        timestamp: Timestamp,
        source_position: u64,
    ) {
        for record in pending {
            self.push(record, timestamp, source_position);
        }
    }

    fn push(&mut self, pending: PendingRecord, timestamp: Timestamp, source_position: u64) -> u64 {
        let position = self.records.len() as u64 + 1;
        if pending.record_type == RecordType::Command {
            self.queue.push_back(self.records.len());
        }
        self.records.push(Record {
            position,
            key: pending.key,
            record_type: pending.record_type,
            intent: pending.intent,
            value: pending.value,
            timestamp,
            source_position,
            rejection_reason: pending.rejection_reason,
        });
        position
    }

    pub fn next_command(&mut self) -> Option<Record> {
        let index = self.queue.pop_front()?;
        self.records.get(index).cloned()
    }

    pub fn has_pending_commands(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, position: u64) -> Option<&Record> {
        position
            .checked_sub(1)
            .and_then(|index| self.records.get(index as usize))
    }

    /// Records written while processing the command at `source_position`.
    pub fn follow_ups(&self, source_position: u64) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(move |record| record.source_position == source_position)
    }

    pub fn rejection_for(&self, position: u64) -> Option<&Record> {
        self.follow_ups(position)
            .find(|record| record.record_type == RecordType::CommandRejection)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
