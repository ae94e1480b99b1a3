use crate::behavior::BpmnBehaviors;
use crate::error::ProcessingResult;
use crate::records::{ProcessInstanceCreationRecord, ProcessInstanceRecord, Record, RecordValue};
use crate::types::*;
use tracing::info;

/// Create a root process instance of the given definition, or of the latest
/// version of the process id.
pub(super) fn create_process_instance(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
    request: &ProcessInstanceCreationRecord,
) -> ProcessingResult<()> {
    let process = if request.process_definition_key > 0 {
        b.state.processes.get_by_key(request.process_definition_key).cloned()
    } else {
        b.state.processes.get_latest(&request.bpmn_process_id).cloned()
    };
    let Some(process) = process else {
        let reason = if request.process_definition_key > 0 {
            format!(
                "Expected to find process definition with key '{}', but none found",
                request.process_definition_key,
            )
        } else {
            format!(
                "Expected to find process definition with process ID '{}', but none found",
                request.bpmn_process_id,
            )
        };
        b.reject(command, &reason);
        return Ok(());
    };
    let graph = b.graph(process.key)?;
    if graph.none_start_event(&process.bpmn_process_id).is_none() {
        b.reject(
            command,
            &format!("Expected process '{}' to have a none start event", process.bpmn_process_id),
        );
        return Ok(());
    }

    let process_instance_key = b.next_key();
    let record = ProcessInstanceRecord {
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
    if !request.variables.is_empty() {
        b.state
            .variables
            .set_temporary_variables(process_instance_key, request.variables.clone());
    }
    b.activate_element_command(process_instance_key, record);

    let created = ProcessInstanceCreationRecord {
        bpmn_process_id: process.bpmn_process_id.clone(),
        process_definition_key: process.key,
        version: process.version,
        variables: request.variables.clone(),
        process_instance_key,
    };
    b.append_event(
        process_instance_key,
        Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Created),
        RecordValue::ProcessInstanceCreation(created),
    )?;
    info!(
        process_instance_key,
        bpmn_process_id = %process.bpmn_process_id,
        version = process.version,
        "Process instance created",
    );
    Ok(())
}
