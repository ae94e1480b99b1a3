use crate::error::ErrorType;
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ─── Process instance ─────────────────────────────────────────

/// Payload of every element lifecycle command/event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstanceRecord {
    pub bpmn_process_id: String,
    pub version: u32,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub flow_scope_key: Key,
    pub bpmn_element_type: BpmnElementType,
    pub bpmn_event_type: BpmnEventType,
    /// Call activity instance that created this process instance, if any.
    pub parent_process_instance_key: Key,
    pub parent_element_instance_key: Key,
}

impl ProcessInstanceRecord {
    /// Copy of `self` pointing at another element of the same process instance.
    pub fn for_element(
        &self,
        element_id: &str,
        element_type: BpmnElementType,
        event_type: BpmnEventType,
        flow_scope_key: Key,
    ) -> Self {
        Self {
            element_id: element_id.to_string(),
            bpmn_element_type: element_type,
            bpmn_event_type: event_type,
            flow_scope_key,
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstanceCreationRecord {
    pub bpmn_process_id: String,
    /// `NO_KEY` selects the latest version of `bpmn_process_id`.
    pub process_definition_key: Key,
    pub version: u32,
    pub variables: Document,
    pub process_instance_key: Key,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstanceBatchRecord {
    pub process_instance_key: Key,
    pub batch_element_instance_key: Key,
    /// Children with a key strictly greater than this are still to be handled.
    pub index: Key,
}

/// A trigger for a catch event, queued on an event scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessEventRecord {
    /// Element instance owning the event scope, or the process definition key for start events.
    pub scope_key: Key,
    pub target_element_id: String,
    pub variables: Document,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
}

// ─── Jobs ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_type: String,
    pub worker: String,
    pub retries: u32,
    pub deadline: Timestamp,
    pub error_message: String,
    pub custom_headers: BTreeMap<String, String>,
    /// Transient: travels with commands and events, never kept in the job store.
    pub variables: Document,
    pub element_id: String,
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobBatchRecord {
    pub job_type: String,
    pub worker: String,
    pub timeout_ms: i64,
    pub max_jobs_to_activate: usize,
    pub job_keys: Vec<Key>,
    pub jobs: Vec<JobRecord>,
}

// ─── Incidents ────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub error_type: ErrorType,
    pub error_message: String,
    pub bpmn_process_id: String,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub element_instance_key: Key,
    pub job_key: Key,
    pub variable_scope_key: Key,
}

impl IncidentRecord {
    pub fn is_job_incident(&self) -> bool {
        self.job_key > 0
    }
}

// ─── Timers ───────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub due_date: Timestamp,
    /// Catch event the timer belongs to.
    pub target_element_id: String,
}

// ─── Messages ─────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub name: String,
    pub correlation_key: String,
    pub time_to_live_ms: i64,
    pub variables: Document,
    pub message_id: Option<String>,
    /// `publish timestamp + ttl`, filled in when the message is published.
    pub deadline: Timestamp,
}

/// An open subscription of a catch event on a message name and correlation key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageSubscriptionRecord {
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub bpmn_process_id: String,
    pub element_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub interrupting: bool,
    pub message_key: Key,
    pub variables: Document,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageStartEventSubscriptionRecord {
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
    pub start_event_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub message_key: Key,
    pub process_instance_key: Key,
    pub variables: Document,
}

// ─── Variables ────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub name: String,
    pub value: Value,
    pub scope_key: Key,
    pub process_instance_key: Key,
    pub process_definition_key: Key,
    pub bpmn_process_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableUpdateSemantics {
    Local,
    Propagate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableDocumentRecord {
    pub scope_key: Key,
    pub update_semantics: VariableUpdateSemantics,
    pub variables: Document,
}

// ─── Record envelope ──────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordValue {
    ProcessInstance(ProcessInstanceRecord),
    ProcessInstanceCreation(ProcessInstanceCreationRecord),
    ProcessInstanceBatch(ProcessInstanceBatchRecord),
    ProcessEvent(ProcessEventRecord),
    Job(JobRecord),
    JobBatch(JobBatchRecord),
    Incident(IncidentRecord),
    Timer(TimerRecord),
    Message(MessageRecord),
    MessageSubscription(MessageSubscriptionRecord),
    MessageStartEventSubscription(MessageStartEventSubscriptionRecord),
    Variable(VariableRecord),
    VariableDocument(VariableDocumentRecord),
}

/// One entry of the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub position: u64,
    pub key: Key,
    pub record_type: RecordType,
    pub intent: Intent,
    pub value: RecordValue,
    pub timestamp: Timestamp,
    /// Position of the command this record was written for (0 for external commands).
    pub source_position: u64,
    pub rejection_reason: Option<String>,
}

impl Record {
    pub fn is_command(&self) -> bool {
        self.record_type == RecordType::Command
    }

    pub fn process_instance_value(&self) -> Option<&ProcessInstanceRecord> {
        match &self.value {
            RecordValue::ProcessInstance(value) => Some(value),
            _ => None,
        }
    }
}
