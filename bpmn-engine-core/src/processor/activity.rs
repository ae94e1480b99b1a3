//! Processes, sub-processes, call activities and service tasks.

use super::StepResult;
use crate::behavior::{BpmnBehaviors, BpmnElementContext};
use crate::error::{ErrorType, Failure};
use crate::model::FlowElement;
use crate::records::{JobRecord, ProcessInstanceRecord, RecordValue};
use crate::types::*;
use tracing::{debug, info};

// ─── Process ──────────────────────────────────────────────────

pub(super) fn activate_process(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    b.apply_temporary_variables(&activating)?;
    b.subscribe_to_events(element, &activating)??;
    let activated = b.transition_to_activated(&activating)?;
    b.correlate_buffered_messages(&activated)?;

    // Started by a message: the triggered start event waits as a deferred record.
    let deferred = b.deferred_records(activated.key());
    if !deferred.is_empty() {
        b.publish_deferred_records(deferred)?;
        return Ok(());
    }
    activate_none_start_event(b, element, &activated)
}

/// The process completes once its last token is gone. A called process hands
/// its variables to the call activity and asks it to complete.
pub(super) fn complete_process(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let completing = b.transition_to_completing(context)?;
    b.apply_output_mappings(element, &completing)??;
    b.unsubscribe_from_events(&completing)?;
    let correlation_key = b.message_start_correlation_key(&completing);

    let call_activity_key = completing.record.parent_element_instance_key;
    let child_variables = b.state.variables.get_variables_local_as_document(completing.key());

    let completed = b.transition_to_completed(&completing)?;
    info!(
        process_instance_key = completed.process_instance_key(),
        bpmn_process_id = %completed.record.bpmn_process_id,
        "Process instance completed"
    );

    if call_activity_key != NO_KEY {
        if let Some(call_activity) = b.get_element_instance(call_activity_key) {
            let graph = b.graph(call_activity.value.process_definition_key)?;
            let call_activity_element = graph.element(&call_activity.value.element_id)?;
            if call_activity_element.propagate_all_child_variables {
                b.state
                    .variables
                    .set_temporary_variables(call_activity_key, child_variables);
            }
            let call_activity_context =
                BpmnElementContext::new(
                    call_activity_key,
                    call_activity.value,
                    call_activity.state,
                );
            b.complete_element(&call_activity_context);
        }
    }

    if let Some(correlation_key) = correlation_key {
        b.correlate_next_buffered_message(&completed, &correlation_key)?;
    }
    Ok(())
}

fn activate_none_start_event(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    scope: &BpmnElementContext,
) -> StepResult<()> {
    let graph = b.graph(scope.process_definition_key())?;
    match graph.none_start_event(&element.id) {
        Some(start_event) => {
            b.activate_child_instance(scope, start_event)?;
            Ok(())
        }
        None => Err(Failure::new(
            format!("Expected '{}' to have a none start event", element.id),
            ErrorType::UnknownError,
        )
        .into()),
    }
}

// ─── Sub-processes ────────────────────────────────────────────

pub(super) fn activate_sub_process(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    b.apply_input_mappings(element, &activating)??;
    b.subscribe_to_events(element, &activating)??;
    let activated = b.transition_to_activated(&activating)?;
    b.correlate_buffered_messages(&activated)?;
    activate_none_start_event(b, element, &activated)
}

/// The start event of an event sub-process was already triggered; its variables
/// travel on to the start event instance.
pub(super) fn activate_event_sub_process(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    let activated = b.transition_to_activated(&activating)?;

    let graph = b.graph(activated.process_definition_key())?;
    let Some(start_event) = graph
        .children_of(&element.id)
        .find(|child| child.element_type == BpmnElementType::StartEvent)
    else {
        return Err(Failure::new(
            format!("Expected event sub-process '{}' to have a start event", element.id),
            ErrorType::UnknownError,
        )
        .into());
    };
    let trigger_variables = b.state.variables.remove_temporary_variables(activated.key());
    let start_key = b.activate_child_instance(&activated, start_event)?;
    if let Some(variables) = trigger_variables {
        b.state.variables.set_temporary_variables(start_key, variables);
    }
    Ok(())
}

pub(super) fn complete_event_sub_process(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let completing = b.transition_to_completing(context)?;
    b.complete_and_continue(element, &completing)??;
    Ok(())
}

/// Sub-processes, call activities and service tasks complete the same way.
pub(super) fn complete_activity(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let completing = b.transition_to_completing(context)?;
    b.apply_output_mappings(element, &completing)??;
    b.unsubscribe_from_events(&completing)?;
    b.complete_and_continue(element, &completing)??;
    Ok(())
}

/// Terminate a scope: its children first, in batches, then the scope itself once
/// the last child reported back.
pub(super) fn terminate_container(
    b: &mut BpmnBehaviors<'_>,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let terminating = b.transition_to_terminating(context)?;
    b.unsubscribe_from_events(&terminating)?;
    b.resolve_incidents(terminating.key())?;
    if b.terminate_child_instances(&terminating)? {
        b.finish_termination(&terminating)?;
    }
    Ok(())
}

// ─── Call activity ────────────────────────────────────────────

pub(super) fn activate_call_activity(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    b.apply_input_mappings(element, &activating)??;

    let called_process_id = element.called_process_id.clone().unwrap_or_default();
    let Some(called) = b.state.processes.get_latest(&called_process_id).cloned() else {
        return Err(Failure::new(
            format!("Expected process with BPMN process id '{called_process_id}' to be deployed, but not found."),
            ErrorType::CalledElementError,
        )
        .with_scope(activating.key())
        .into());
    };

    b.subscribe_to_events(element, &activating)??;

    let child_key = b.next_key();
    let child = ProcessInstanceRecord {
        bpmn_process_id: called.bpmn_process_id.clone(),
        version: called.version,
        process_definition_key: called.key,
        process_instance_key: child_key,
        element_id: called.bpmn_process_id.clone(),
        flow_scope_key: NO_KEY,
        bpmn_element_type: BpmnElementType::Process,
        bpmn_event_type: BpmnEventType::None,
        parent_process_instance_key: activating.process_instance_key(),
        parent_element_instance_key: activating.key(),
    };
    let variables = b.state.variables.get_variables_as_document(activating.key());
    b.state.variables.set_temporary_variables(child_key, variables);
    b.activate_element_command(child_key, child);
    debug!(
        key = activating.key(),
        child_key,
        called_process = %called.bpmn_process_id,
        "Call activity creates child process instance"
    );

    let activated = b.transition_to_activated(&activating)?;
    b.correlate_buffered_messages(&activated)?;
    Ok(())
}

/// The child process instance goes first; the call activity finishes once it
/// is gone.
pub(super) fn terminate_call_activity(
    b: &mut BpmnBehaviors<'_>,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let terminating = b.transition_to_terminating(context)?;
    b.unsubscribe_from_events(&terminating)?;
    b.resolve_incidents(terminating.key())?;

    let instance = b.element_instance(terminating.key())?;
    match b.get_element_instance(instance.called_child_instance_key) {
        Some(child) if child.can_terminate() => {
            let child_context = BpmnElementContext::new(child.key, child.value, child.state);
            b.terminate_element(&child_context);
        }
        Some(_) => {}
        None => {
            b.finish_termination(&terminating)?;
        }
    }
    Ok(())
}

// ─── Service task ─────────────────────────────────────────────

pub(super) fn activate_service_task(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    b.apply_input_mappings(element, &activating)??;
    b.subscribe_to_events(element, &activating)??;

    let job = JobRecord {
        job_type: element.job_type.clone().unwrap_or_default(),
        retries: element.job_retries,
        custom_headers: element.custom_headers.clone(),
        element_id: element.id.clone(),
        element_instance_key: activating.key(),
        process_instance_key: activating.process_instance_key(),
        process_definition_key: activating.process_definition_key(),
        bpmn_process_id: activating.record.bpmn_process_id.clone(),
        ..JobRecord::default()
    };
    let job_key = b.next_key();
    b.append_event(job_key, Intent::Job(JobIntent::Created), RecordValue::Job(job))?;

    let activated = b.transition_to_activated(&activating)?;
    b.correlate_buffered_messages(&activated)?;
    Ok(())
}

pub(super) fn terminate_service_task(
    b: &mut BpmnBehaviors<'_>,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let terminating = b.transition_to_terminating(context)?;
    let instance = b.element_instance(terminating.key())?;
    if instance.job_key > 0 {
        b.resolve_job_incident(instance.job_key)?;
        if let Some(job) = b.state.jobs.get_job(instance.job_key).cloned() {
            b.append_event(
                instance.job_key,
                Intent::Job(JobIntent::Canceled),
                RecordValue::Job(job),
            )?;
        }
    }
    b.unsubscribe_from_events(&terminating)?;
    b.resolve_incidents(terminating.key())?;
    b.finish_termination(&terminating)?;
    Ok(())
}
