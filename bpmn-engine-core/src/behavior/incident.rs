use super::{BpmnBehaviors, BpmnElementContext};
use crate::error::{ErrorType, Failure, ProcessingResult};
use crate::records::{IncidentRecord, JobRecord, RecordValue};
use crate::state::MISSING_INCIDENT;
use crate::types::*;
use tracing::{info, warn};

impl BpmnBehaviors<'_> {
    /// Request an incident for a failure at `context`. The failure's variable scope
    /// defaults to the element instance itself.
    pub fn create_incident(
        &mut self,
        failure: Failure,
        context: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        let variable_scope_key = if failure.variable_scope_key == NO_KEY {
            context.key()
        } else {
            failure.variable_scope_key
        };
        warn!(
            key = context.key(),
            element_id = context.element_id(),
            error_type = ?failure.error_type,
            reason = %failure.message,
            "Raising incident"
        );
        let record = IncidentRecord {
            error_type: failure.error_type,
            error_message: failure.message,
            bpmn_process_id: context.record.bpmn_process_id.clone(),
            process_definition_key: context.process_definition_key(),
            process_instance_key: context.process_instance_key(),
            element_id: context.element_id().to_string(),
            element_instance_key: context.key(),
            job_key: NO_KEY,
            variable_scope_key,
        };
        self.append_new_command(
            Intent::Incident(IncidentIntent::Create),
            RecordValue::Incident(record),
        );
        Ok(())
    }

    pub fn create_job_incident(&mut self, job_key: Key, job: &JobRecord) {
        warn!(job_key, element_id = %job.element_id, "Job has no retries left");
        let message = if job.error_message.is_empty() {
            "No more retries left.".to_string()
        } else {
            job.error_message.clone()
        };
        let record = IncidentRecord {
            error_type: ErrorType::JobNoRetries,
            error_message: message,
            bpmn_process_id: job.bpmn_process_id.clone(),
            process_definition_key: job.process_definition_key,
            process_instance_key: job.process_instance_key,
            element_id: job.element_id.clone(),
            element_instance_key: job.element_instance_key,
            job_key,
            variable_scope_key: job.element_instance_key,
        };
        self.append_new_command(
            Intent::Incident(IncidentIntent::Create),
            RecordValue::Incident(record),
        );
    }

    /// Resolve the incident pinned to a job, if there is one.
    pub fn resolve_job_incident(&mut self, job_key: Key) -> ProcessingResult<()> {
        let incident_key = self.state.incidents.get_job_incident_key(job_key);
        if incident_key == MISSING_INCIDENT {
            return Ok(());
        }
        self.resolve_incident(incident_key)
    }

    /// Resolve every incident pinned to an element instance.
    pub fn resolve_incidents(&mut self, element_instance_key: Key) -> ProcessingResult<()> {
        for incident_key in self
            .state
            .incidents
            .get_element_incident_keys(element_instance_key)
        {
            self.resolve_incident(incident_key)?;
        }
        Ok(())
    }

    fn resolve_incident(&mut self, incident_key: Key) -> ProcessingResult<()> {
        let Some(incident) = self.state.incidents.get_incident(incident_key).cloned() else {
            return Ok(());
        };
        info!(incident_key, element_id = %incident.element_id, "Incident resolved");
        self.append_event(
            incident_key,
            Intent::Incident(IncidentIntent::Resolved),
            RecordValue::Incident(incident),
        )
    }
}
