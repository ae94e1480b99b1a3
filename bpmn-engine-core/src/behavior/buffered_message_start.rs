//! Message start events: creating instances from messages and the correlation-key
//! lock that keeps one active instance per process and correlation key.

use super::{BpmnBehaviors, BpmnElementContext};
use crate::error::ProcessingResult;
use crate::records::*;
use crate::state::DeployedProcess;
use crate::types::*;
use tracing::{debug, info};

impl BpmnBehaviors<'_> {
    /// Correlation key locked by a root process instance that was started by a
    /// message. Read it before the instance ends; ending releases the lock.
    pub fn message_start_correlation_key(&self, context: &BpmnElementContext) -> Option<String> {
        if context.element_type() != BpmnElementType::Process
            || context.record.parent_element_instance_key != NO_KEY
        {
            return None;
        }
        self.state
            .messages
            .get_process_instance_correlation_key(context.key())
            .filter(|correlation_key| !correlation_key.is_empty())
            .map(str::to_string)
    }

    /// After a message-started instance ended, start the next instance from the
    /// oldest buffered message with the same correlation key, if any is left.
    pub fn correlate_next_buffered_message(
        &mut self,
        ended: &BpmnElementContext,
        correlation_key: &str,
    ) -> ProcessingResult<()> {
        let bpmn_process_id = ended.record.bpmn_process_id.clone();
        let Some(process) = self.state.processes.get_latest(&bpmn_process_id).cloned() else {
            return Ok(());
        };
        if self
            .state
            .messages
            .exists_active_process_instance(&bpmn_process_id, correlation_key)
        {
            return Ok(());
        }

        let mut next: Option<(Key, String, MessageRecord)> = None;
        for start_event in process.graph.message_start_events() {
            let Some(message_definition) = &start_event.message else {
                continue;
            };
            let candidate = self
                .state
                .messages
                .messages_for(&message_definition.name, correlation_key)
                .into_iter()
                .find(|(message_key, message)| {
                    message.deadline >= self.timestamp
                        && !self
                            .state
                            .messages
                            .exists_message_correlation(*message_key, &bpmn_process_id)
                });
            if let Some((message_key, message)) = candidate {
                if next.as_ref().map_or(true, |(lowest, _, _)| message_key < *lowest) {
                    next = Some((message_key, start_event.id.clone(), message.clone()));
                }
            }
        }

        match next {
            Some((message_key, start_event_id, message)) => {
                debug!(message_key, correlation_key, "Correlating next buffered message");
                self.start_instance_from_message(&process, &start_event_id, message_key, &message)?;
            }
            None => debug!(%bpmn_process_id, correlation_key, "Correlation key released"),
        }
        Ok(())
    }

    /// Create a process instance whose message start event is triggered by
    /// `message`. Acquires the correlation-key lock when the key is non-empty.
    pub fn start_instance_from_message(
        &mut self,
        process: &DeployedProcess,
        start_event_id: &str,
        message_key: Key,
        message: &MessageRecord,
    ) -> ProcessingResult<Key> {
        let process_instance_key = self.next_key();
        let event_key = self.next_key();

        let trigger = ProcessEventRecord {
            scope_key: process.key,
            target_element_id: start_event_id.to_string(),
            variables: message.variables.clone(),
            process_definition_key: process.key,
            process_instance_key,
        };
        self.append_event(
            event_key,
            Intent::ProcessEvent(ProcessEventIntent::Triggering),
            RecordValue::ProcessEvent(trigger.clone()),
        )?;

        let correlated = MessageStartEventSubscriptionRecord {
            process_definition_key: process.key,
            bpmn_process_id: process.bpmn_process_id.clone(),
            start_event_id: start_event_id.to_string(),
            message_name: message.name.clone(),
            correlation_key: message.correlation_key.clone(),
            message_key,
            process_instance_key,
            variables: message.variables.clone(),
        };
        self.append_event(
            process.key,
            Intent::MessageStartEventSubscription(MessageStartEventSubscriptionIntent::Correlated),
            RecordValue::MessageStartEventSubscription(correlated),
        )?;

        let root = ProcessInstanceRecord {
            bpmn_process_id: process.bpmn_process_id.clone(),
            version: process.version,
            process_definition_key: process.key,
            process_instance_key,
            element_id: process.bpmn_process_id.clone(),
            flow_scope_key: NO_KEY,
            bpmn_element_type: BpmnElementType::Process,
            bpmn_event_type: BpmnEventType::None,
            parent_process_instance_key: NO_KEY,
            parent_element_instance_key: NO_KEY,
        };
        let start_key = self.next_key();
        let start_record = root.for_element(
            start_event_id,
            BpmnElementType::StartEvent,
            BpmnEventType::Message,
            process_instance_key,
        );
        self.activate_element_command(process_instance_key, root);
        self.defer_activation(process_instance_key, start_key, start_record);

        self.state
            .variables
            .set_temporary_variables(start_key, message.variables.clone());
        self.append_event(
            event_key,
            Intent::ProcessEvent(ProcessEventIntent::Triggered),
            RecordValue::ProcessEvent(trigger),
        )?;

        info!(
            process_instance_key,
            message_key,
            correlation_key = %message.correlation_key,
            "Process instance started by message"
        );
        Ok(process_instance_key)
    }
}
