//! Event appliers: the only place follow-up events mutate state.
//!
//! Each event is applied at the moment it is appended, so later behavior calls in
//! the same processing step already observe it.

use super::EngineState;
use crate::error::{ProcessingError, ProcessingResult};
use crate::records::*;
use crate::types::*;
use std::sync::Arc;

impl EngineState {
    pub fn apply_event(
        &mut self,
        key: Key,
        intent: Intent,
        value: &RecordValue,
    ) -> ProcessingResult<()> {
        match (intent, value) {
            (Intent::ProcessInstance(intent), RecordValue::ProcessInstance(value)) => {
                self.apply_process_instance(key, intent, value)
            }
            (Intent::ProcessEvent(intent), RecordValue::ProcessEvent(value)) => {
                self.apply_process_event(key, intent, value);
                Ok(())
            }
            (Intent::Job(intent), RecordValue::Job(value)) => self.apply_job(key, intent, value),
            (Intent::JobBatch(JobBatchIntent::Activated), RecordValue::JobBatch(batch)) => {
                for (job_key, job) in batch.job_keys.iter().zip(&batch.jobs) {
                    self.jobs.activate(*job_key, &batch.worker, job.deadline)?;
                }
                Ok(())
            }
            (Intent::Incident(intent), RecordValue::Incident(value)) => {
                self.apply_incident(key, intent, value)
            }
            (Intent::Timer(TimerIntent::Created), RecordValue::Timer(value)) => {
                self.timers.put(key, value);
                Ok(())
            }
            (
                Intent::Timer(TimerIntent::Triggered | TimerIntent::Canceled),
                RecordValue::Timer(_),
            ) => {
                self.timers.remove(key);
                Ok(())
            }
            (Intent::Message(MessageIntent::Published), RecordValue::Message(value)) => {
                if value.time_to_live_ms > 0 {
                    self.messages.put(key, value);
                }
                Ok(())
            }
            (Intent::Message(MessageIntent::Expired), RecordValue::Message(_)) => {
                self.messages.remove(key);
                Ok(())
            }
            (Intent::MessageSubscription(intent), RecordValue::MessageSubscription(value)) => {
                match intent {
                    MessageSubscriptionIntent::Created => self.message_subscriptions.put(value),
                    MessageSubscriptionIntent::Deleted => {
                        self.message_subscriptions
                            .remove(value.element_instance_key, &value.element_id);
                    }
                    MessageSubscriptionIntent::Correlated => {
                        if self.messages.get(value.message_key).is_some() {
                            self.messages
                                .put_message_correlation(value.message_key, &value.bpmn_process_id);
                        }
                    }
                }
                Ok(())
            }
            (
                Intent::MessageStartEventSubscription(
                    MessageStartEventSubscriptionIntent::Correlated,
                ),
                RecordValue::MessageStartEventSubscription(value),
            ) => {
                // Messages without a time to live are never buffered.
                if self.messages.get(value.message_key).is_some() {
                    self.messages
                        .put_message_correlation(value.message_key, &value.bpmn_process_id);
                }
                if !value.correlation_key.is_empty() {
                    self.messages.put_active_process_instance(
                        &value.bpmn_process_id,
                        &value.correlation_key,
                        value.process_instance_key,
                    );
                }
                Ok(())
            }
            (Intent::Variable(_), RecordValue::Variable(value)) => {
                self.variables
                    .set_variable_local(key, value.scope_key, &value.name, value.value.clone());
                Ok(())
            }
            (
                Intent::ProcessInstanceCreation(_)
                | Intent::ProcessInstanceBatch(_)
                | Intent::VariableDocument(_)
                | Intent::Timer(_)
                | Intent::Message(_)
                | Intent::JobBatch(_)
                | Intent::MessageStartEventSubscription(_),
                _,
            ) => Ok(()),
            (intent, value) => Err(ProcessingError::UnexpectedRecord {
                expected: "event value matching its intent",
                actual: format!("{intent:?} with {}", value_name(value)),
            }),
        }
    }

    fn apply_process_instance(
        &mut self,
        key: Key,
        intent: ProcessInstanceIntent,
        value: &ProcessInstanceRecord,
    ) -> ProcessingResult<()> {
        use ProcessInstanceIntent::*;
        match intent {
            ElementActivating => self.element_activating(key, value),
            ElementActivated | ElementCompleting => self.element_instances.set_state(key, intent),
            ElementTerminating => {
                self.element_instances.set_state(key, intent)?;
                self.event_scopes.shutdown_instance(key);
                Ok(())
            }
            ElementCompleted | ElementTerminated => self.element_removed(key, value),
            SequenceFlowTaken => {
                let process = self.processes.process(value.process_definition_key)?;
                let graph = Arc::clone(&process.graph);
                let flow = graph.flow(&value.element_id)?;
                if graph.element(&flow.target)?.element_type == BpmnElementType::ParallelGateway {
                    self.element_instances.increment_taken_flow(
                        value.flow_scope_key,
                        &flow.target,
                        &flow.id,
                    );
                }
                Ok(())
            }
            ActivateElement | CompleteElement | TerminateElement => {
                Err(ProcessingError::UnexpectedRecord {
                    expected: "process instance event",
                    actual: format!("{intent:?}"),
                })
            }
        }
    }

    fn element_activating(
        &mut self,
        key: Key,
        value: &ProcessInstanceRecord,
    ) -> ProcessingResult<()> {
        self.element_instances.new_instance(
            value.flow_scope_key,
            key,
            value.clone(),
            ProcessInstanceIntent::ElementActivating,
        )?;
        self.variables.create_scope(key, value.flow_scope_key);

        if value.bpmn_element_type.has_event_scope() {
            let process = self.processes.process(value.process_definition_key)?;
            let graph = Arc::clone(&process.graph);
            let element = graph.element(&value.element_id)?;
            self.event_scopes
                .create_instance(key, graph.interrupting_event_ids(element));
        }

        if value.bpmn_element_type == BpmnElementType::Process
            && value.parent_element_instance_key != NO_KEY
        {
            if let Some(mut call_activity) = self
                .element_instances
                .get_instance(value.parent_element_instance_key)
            {
                call_activity.called_child_instance_key = key;
                self.element_instances.update_instance(call_activity)?;
            }
        }
        Ok(())
    }

    fn element_removed(&mut self, key: Key, value: &ProcessInstanceRecord) -> ProcessingResult<()> {
        let removal = self.element_instances.remove_instance(key)?;
        for removed in removal.instances {
            self.event_scopes.delete_instance(removed);
            self.variables.remove_scope(removed);
            self.variables.remove_temporary_variables(removed);
        }
        for dropped in removal.deferred {
            self.variables.remove_temporary_variables(dropped);
        }

        if value.bpmn_element_type == BpmnElementType::Process {
            self.messages
                .remove_active_process_instance(&value.bpmn_process_id, key);
            if let Some(mut call_activity) = self
                .element_instances
                .get_instance(value.parent_element_instance_key)
            {
                call_activity.called_child_instance_key = NO_KEY;
                self.element_instances.update_instance(call_activity)?;
            }
        }
        Ok(())
    }

    fn apply_process_event(
        &mut self,
        key: Key,
        intent: ProcessEventIntent,
        value: &ProcessEventRecord,
    ) {
        match intent {
            ProcessEventIntent::Triggering if value.scope_key == value.process_definition_key => {
                self.event_scopes.trigger_start_event(
                    value.scope_key,
                    key,
                    &value.target_element_id,
                    value.variables.clone(),
                    value.process_instance_key,
                );
            }
            ProcessEventIntent::Triggering => {
                self.event_scopes.trigger_event(
                    value.scope_key,
                    key,
                    &value.target_element_id,
                    value.variables.clone(),
                    value.process_instance_key,
                );
            }
            ProcessEventIntent::Triggered => self.event_scopes.delete_trigger(value.scope_key, key),
        }
    }

    fn apply_job(
        &mut self,
        key: Key,
        intent: JobIntent,
        value: &JobRecord,
    ) -> ProcessingResult<()> {
        match intent {
            JobIntent::Created => {
                self.jobs.create(key, value);
                self.set_job_key(value.element_instance_key, key)
            }
            JobIntent::Completed | JobIntent::Canceled => {
                self.jobs.delete(key);
                self.set_job_key(value.element_instance_key, NO_KEY)
            }
            JobIntent::Failed => self
                .jobs
                .fail(key, value.retries, &value.error_message)
                .map(|_| ()),
            JobIntent::TimedOut => self.jobs.time_out(key),
            JobIntent::RetriesUpdated => self.jobs.update_retries(key, value.retries),
            JobIntent::Complete
            | JobIntent::Fail
            | JobIntent::UpdateRetries
            | JobIntent::TimeOut => Ok(()),
        }
    }

    fn set_job_key(&mut self, element_instance_key: Key, job_key: Key) -> ProcessingResult<()> {
        if let Some(mut instance) = self.element_instances.get_instance(element_instance_key) {
            instance.job_key = job_key;
            self.element_instances.update_instance(instance)?;
        }
        Ok(())
    }

    fn apply_incident(
        &mut self,
        key: Key,
        intent: IncidentIntent,
        value: &IncidentRecord,
    ) -> ProcessingResult<()> {
        match intent {
            IncidentIntent::Created => self.incidents.create_incident(key, value),
            IncidentIntent::Resolved => {
                if let Some(incident) = self.incidents.delete_incident(key) {
                    let retries_left = self
                        .jobs
                        .get_job(incident.job_key)
                        .map(|job| job.retries > 0)
                        .unwrap_or(false);
                    if incident.is_job_incident() && retries_left {
                        self.jobs.resolve(incident.job_key)?;
                    }
                }
            }
            IncidentIntent::Create | IncidentIntent::Resolve => {}
        }
        Ok(())
    }
}

fn value_name(value: &RecordValue) -> &'static str {
    match value {
        RecordValue::ProcessInstance(_) => "PROCESS_INSTANCE",
        RecordValue::ProcessInstanceCreation(_) => "PROCESS_INSTANCE_CREATION",
        RecordValue::ProcessInstanceBatch(_) => "PROCESS_INSTANCE_BATCH",
        RecordValue::ProcessEvent(_) => "PROCESS_EVENT",
        RecordValue::Job(_) => "JOB",
        RecordValue::JobBatch(_) => "JOB_BATCH",
        RecordValue::Incident(_) => "INCIDENT",
        RecordValue::Timer(_) => "TIMER",
        RecordValue::Message(_) => "MESSAGE",
        RecordValue::MessageSubscription(_) => "MESSAGE_SUBSCRIPTION",
        RecordValue::MessageStartEventSubscription(_) => "MESSAGE_START_EVENT_SUBSCRIPTION",
        RecordValue::Variable(_) => "VARIABLE",
        RecordValue::VariableDocument(_) => "VARIABLE_DOCUMENT",
    }
}
