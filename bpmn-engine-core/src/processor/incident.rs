use super::bpmn::ElementProcessor;
use crate::behavior::{BpmnBehaviors, BpmnElementContext};
use crate::error::ProcessingResult;
use crate::records::{IncidentRecord, Record, RecordValue};
use crate::types::*;
use tracing::info;

pub(super) fn create_incident(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
    record: &IncidentRecord,
) -> ProcessingResult<()> {
    if record.is_job_incident() {
        if b.state.jobs.get_job(record.job_key).is_none() {
            b.reject(
                command,
                &format!(
                    "Expected to create incident for job '{}', but no such job was found",
                    record.job_key,
                ),
            );
            return Ok(());
        }
    } else if !b.state.element_instances.contains(record.element_instance_key) {
        b.reject(
            command,
            &format!(
                "Expected to create incident for element instance '{}', but no such instance was found",
                record.element_instance_key
            ),
        );
        return Ok(());
    }
    let key = b.next_key();
    b.append_event(
        key,
        Intent::Incident(IncidentIntent::Created),
        RecordValue::Incident(record.clone()),
    )?;
    info!(
        incident_key = key,
        error_type = ?record.error_type,
        element_id = %record.element_id,
        "Incident created"
    );
    Ok(())
}

/// Resolve an incident. An element incident re-runs the transition that failed;
/// a job incident makes the job activatable again once it has retries.
pub(super) fn resolve_incident(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
) -> ProcessingResult<()> {
    let key = command.key;
    let Some(incident) = b.state.incidents.get_incident(key).cloned() else {
        b.reject(
            command,
            &format!("Expected to resolve incident with key '{key}', but no such incident was found"),
        );
        return Ok(());
    };

    if incident.is_job_incident() {
        let retries = b.state.jobs.get_job(incident.job_key).map(|job| job.retries).unwrap_or(0);
        if retries == 0 {
            b.reject(
                command,
                &format!(
                    "Expected to resolve incident '{key}' of job '{}', but the job has no retries left",
                    incident.job_key
                ),
            );
            return Ok(());
        }
        return b.append_event(
            key,
            Intent::Incident(IncidentIntent::Resolved),
            RecordValue::Incident(incident),
        );
    }

    b.append_event(
        key,
        Intent::Incident(IncidentIntent::Resolved),
        RecordValue::Incident(incident.clone()),
    )?;
    info!(incident_key = key, element_id = %incident.element_id, "Retrying failed transition");

    let Some(instance) = b.get_element_instance(incident.element_instance_key) else {
        return Ok(());
    };
    let graph = b.graph(instance.value.process_definition_key)?;
    let element = graph.element(&instance.value.element_id)?;
    let processor = ElementProcessor::for_type(instance.value.bpmn_element_type)?;
    let context = BpmnElementContext::new(instance.key, instance.value.clone(), instance.state);

    b.resolving_incident = true;
    let result = match instance.state {
        ProcessInstanceIntent::ElementActivating => processor.on_activate(b, element, &context),
        ProcessInstanceIntent::ElementCompleting => processor.on_complete(b, element, &context),
        _ => Ok(()),
    };
    b.resolving_incident = false;
    result
}
