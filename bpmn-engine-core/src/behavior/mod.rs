//! Behaviors shared by the element processors.
//!
//! [`BpmnBehaviors`] borrows everything one processing step needs. Each behavior
//! lives in its own module as an `impl BpmnBehaviors<'_>` block.

mod buffered_message_start;
mod deferred_records;
mod event_subscription;
mod incident;
mod state;
mod transition;
mod variable_mapping;

pub use deferred_records::PendingActivation;

use crate::config::EngineConfig;
use crate::error::ProcessingResult;
use crate::expression::ExpressionEvaluator;
use crate::model::ProcessGraph;
use crate::processor::container::ContainerProcessors;
use crate::records::{ProcessInstanceRecord, Record, RecordValue};
use crate::state::EngineState;
use crate::types::*;
use crate::writer::{RecordWriter, Writers};
use std::sync::Arc;
use tracing::debug;

/// Key, payload and lifecycle state of the element instance being processed.
///
/// A context is a value: transitions return a new one and callers continue with
/// that, never with a stale copy.
#[derive(Clone, Debug, PartialEq)]
pub struct BpmnElementContext {
    pub element_instance_key: Key,
    pub record: ProcessInstanceRecord,
    pub intent: ProcessInstanceIntent,
}

impl BpmnElementContext {
    pub fn new(
        element_instance_key: Key,
        record: ProcessInstanceRecord,
        intent: ProcessInstanceIntent,
    ) -> Self {
        Self {
            element_instance_key,
            record,
            intent,
        }
    }

    pub fn copy(
        &self,
        element_instance_key: Key,
        record: ProcessInstanceRecord,
        intent: ProcessInstanceIntent,
    ) -> Self {
        Self::new(element_instance_key, record, intent)
    }

    pub fn with_intent(&self, intent: ProcessInstanceIntent) -> Self {
        Self {
            intent,
            ..self.clone()
        }
    }

    pub fn key(&self) -> Key {
        self.element_instance_key
    }

    pub fn flow_scope_key(&self) -> Key {
        self.record.flow_scope_key
    }

    pub fn process_instance_key(&self) -> Key {
        self.record.process_instance_key
    }

    pub fn process_definition_key(&self) -> Key {
        self.record.process_definition_key
    }

    pub fn element_id(&self) -> &str {
        &self.record.element_id
    }

    pub fn element_type(&self) -> BpmnElementType {
        self.record.bpmn_element_type
    }
}

pub struct BpmnBehaviors<'a> {
    pub(crate) state: &'a mut EngineState,
    pub(crate) writers: &'a mut Writers,
    pub(crate) evaluator: &'a dyn ExpressionEvaluator,
    pub(crate) config: &'a EngineConfig,
    pub(crate) containers: &'a ContainerProcessors,
    /// Timestamp of the command being processed.
    pub(crate) timestamp: Timestamp,
    /// Set while an incident resolution re-runs a pending transition.
    pub(crate) resolving_incident: bool,
}

impl<'a> BpmnBehaviors<'a> {
    pub fn new(
        state: &'a mut EngineState,
        writers: &'a mut Writers,
        evaluator: &'a dyn ExpressionEvaluator,
        config: &'a EngineConfig,
        containers: &'a ContainerProcessors,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            state,
            writers,
            evaluator,
            config,
            containers,
            timestamp,
            resolving_incident: false,
        }
    }

    pub fn state(&self) -> &EngineState {
        self.state
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn next_key(&mut self) -> Key {
        self.state.keys.next_key()
    }

    /// Deployed graph of a process definition; cloned out so callers may keep it
    /// while mutating state.
    pub fn graph(&self, process_definition_key: Key) -> ProcessingResult<Arc<ProcessGraph>> {
        let process = self.state.processes.process(process_definition_key)?;
        Ok(Arc::clone(&process.graph))
    }

    // ── Writing ──

    /// Apply an event to state, then append it.
    pub fn append_event(
        &mut self,
        key: Key,
        intent: Intent,
        value: RecordValue,
    ) -> ProcessingResult<()> {
        self.state.apply_event(key, intent, &value)?;
        self.writers.append_follow_up_event(key, intent, value);
        Ok(())
    }

    pub fn append_command(&mut self, key: Key, intent: Intent, value: RecordValue) {
        self.writers.append_follow_up_command(key, intent, value);
    }

    pub fn append_new_command(&mut self, intent: Intent, value: RecordValue) {
        self.writers.append_new_command(intent, value);
    }

    pub fn reject(&mut self, command: &Record, reason: &str) {
        debug!(key = command.key, intent = ?command.intent, reason, "Command rejected");
        self.writers.append_rejection(command, reason);
    }

    /// Append an element lifecycle command.
    pub fn append_element_command(
        &mut self,
        key: Key,
        intent: ProcessInstanceIntent,
        record: ProcessInstanceRecord,
    ) {
        self.append_command(
            key,
            Intent::ProcessInstance(intent),
            RecordValue::ProcessInstance(record),
        );
    }

    pub fn activate_element_command(&mut self, key: Key, record: ProcessInstanceRecord) {
        self.append_element_command(key, ProcessInstanceIntent::ActivateElement, record);
    }

    pub fn complete_element(&mut self, context: &BpmnElementContext) {
        self.append_element_command(
            context.key(),
            ProcessInstanceIntent::CompleteElement,
            context.record.clone(),
        );
    }

    pub fn terminate_element(&mut self, context: &BpmnElementContext) {
        self.append_element_command(
            context.key(),
            ProcessInstanceIntent::TerminateElement,
            context.record.clone(),
        );
    }
}
