//! Start, end, boundary and intermediate catch events.

use super::StepResult;
use crate::behavior::{BpmnBehaviors, BpmnElementContext};
use crate::model::FlowElement;
use crate::records::{ProcessEventRecord, RecordValue};
use crate::types::*;

/// Events that do nothing while active: activate and ask to be completed.
pub(super) fn activate_pass_through(
    b: &mut BpmnBehaviors<'_>,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    let activated = b.transition_to_activated(&activating)?;
    b.complete_element(&activated);
    Ok(())
}

/// Merge the trigger variables (stashed as temporary variables), apply the
/// output mapping and continue.
pub(super) fn complete_with_output_mappings(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let completing = b.transition_to_completing(context)?;
    b.apply_output_mappings(element, &completing)??;
    b.complete_and_continue(element, &completing)??;
    Ok(())
}

pub(super) fn activate_intermediate_catch_event(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    b.apply_input_mappings(element, &activating)??;

    // Behind an event-based gateway the event already happened.
    let graph = b.graph(activating.process_definition_key())?;
    if graph.follows_event_based_gateway(element) {
        let activated = b.transition_to_activated(&activating)?;
        b.complete_element(&activated);
        return Ok(());
    }

    b.subscribe_to_events(element, &activating)??;
    let activated = b.transition_to_activated(&activating)?;
    b.correlate_buffered_messages(&activated)?;
    Ok(())
}

/// The pending trigger carries the variables of the message or timer that
/// completed the event.
pub(super) fn complete_intermediate_catch_event(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let completing = b.transition_to_completing(context)?;
    if let Some(trigger) = b.state.event_scopes.peek_event_trigger(completing.key()) {
        b.state
            .variables
            .set_temporary_variables(completing.key(), trigger.variables.clone());
        let record = ProcessEventRecord {
            scope_key: completing.key(),
            target_element_id: trigger.element_id,
            variables: trigger.variables,
            process_definition_key: completing.process_definition_key(),
            process_instance_key: completing.process_instance_key(),
        };
        b.append_event(
            trigger.event_key,
            Intent::ProcessEvent(ProcessEventIntent::Triggered),
            RecordValue::ProcessEvent(record),
        )?;
    }
    b.apply_output_mappings(element, &completing)??;
    b.unsubscribe_from_events(&completing)?;
    b.complete_and_continue(element, &completing)??;
    Ok(())
}

/// Termination of an element without children, subscriptions of its own or jobs.
pub(super) fn terminate_element(
    b: &mut BpmnBehaviors<'_>,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let terminating = b.transition_to_terminating(context)?;
    b.unsubscribe_from_events(&terminating)?;
    b.resolve_incidents(terminating.key())?;
    b.finish_termination(&terminating)?;
    Ok(())
}
