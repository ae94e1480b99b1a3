//! Exclusive, parallel and event-based gateways.

use super::StepResult;
use crate::behavior::{BpmnBehaviors, BpmnElementContext};
use crate::error::{ErrorType, Failure};
use crate::model::{FlowElement, ProcessGraph, SequenceFlow};
use tracing::debug;

// ─── Exclusive ────────────────────────────────────────────────

/// Picks one outgoing flow and passes through in a single step.
pub(super) fn activate_exclusive_gateway(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    let graph = b.graph(activating.process_definition_key())?;
    let chosen = choose_outgoing_flow(b, &graph, element, &activating)?;

    let activated = b.transition_to_activated(&activating)?;
    let completing = b.transition_to_completing(&activated)?;
    match chosen {
        Some(flow) => {
            debug!(key = completing.key(), flow_id = %flow.id, "Exclusive gateway took flow");
            let completed = b.transition_to_completed(&completing)?;
            b.take_sequence_flow(&completed, flow)?;
        }
        None => {
            b.complete_and_continue(element, &completing)??;
        }
    }
    Ok(())
}

/// A single unconditional flow is always taken. Otherwise the first non-default
/// flow whose condition holds wins, then the default flow.
fn choose_outgoing_flow<'g>(
    b: &BpmnBehaviors<'_>,
    graph: &'g ProcessGraph,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<Option<&'g SequenceFlow>> {
    let outgoing = graph.outgoing(element)?;
    match outgoing.as_slice() {
        [] => return Ok(None),
        [only] if only.condition.is_none() => return Ok(Some(*only)),
        _ => {}
    }

    let variables = b.state.variables.get_variables_as_document(context.key());
    for flow in &outgoing {
        if element.default_flow.as_deref() == Some(flow.id.as_str()) {
            continue;
        }
        let holds = match &flow.condition {
            None => true,
            Some(condition) => b
                .evaluator
                .evaluate_bool(condition, &variables)
                .map_err(|failure| failure.with_scope(context.key()))?,
        };
        if holds {
            return Ok(Some(*flow));
        }
    }

    match &element.default_flow {
        Some(default_flow) => Ok(Some(graph.flow(default_flow)?)),
        None => Err(Failure::new(
            format!(
                "Expected at least one condition of gateway '{}' to evaluate to true, or to have a default flow",
                element.id
            ),
            ErrorType::ConditionError,
        )
        .with_scope(context.key())
        .into()),
    }
}

// ─── Parallel ─────────────────────────────────────────────────

/// Forks on every outgoing flow. Joining happens when the flows are taken.
pub(super) fn activate_parallel_gateway(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    let activated = b.transition_to_activated(&activating)?;
    let completing = b.transition_to_completing(&activated)?;
    b.complete_and_continue(element, &completing)??;
    Ok(())
}

// ─── Event-based ──────────────────────────────────────────────

pub(super) fn activate_event_based_gateway(
    b: &mut BpmnBehaviors<'_>,
    element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let activating = b.transition_to_activating(context)?;
    b.subscribe_to_events(element, &activating)??;
    let activated = b.transition_to_activated(&activating)?;
    b.correlate_buffered_messages(&activated)?;
    Ok(())
}

/// The first trigger decides: its catch event is activated after the gateway
/// completed, and every other subscription is closed.
pub(super) fn complete_event_based_gateway(
    b: &mut BpmnBehaviors<'_>,
    _element: &FlowElement,
    context: &BpmnElementContext,
) -> StepResult<()> {
    let completing = b.transition_to_completing(context)?;
    b.unsubscribe_from_events(&completing)?;

    if let Some(trigger) = b.state.event_scopes.peek_event_trigger(completing.key()) {
        let graph = b.graph(completing.process_definition_key())?;
        let target = graph.element(&trigger.element_id)?;
        let key = b.next_key();
        let record = completing.record.for_element(
            &target.id,
            target.element_type,
            target.event_type,
            completing.flow_scope_key(),
        );
        b.consume_event_trigger(&completing, &trigger, key)?;
        b.defer_activation(completing.key(), key, record);
    }

    let deferred = b.deferred_records(completing.key());
    b.transition_to_completed(&completing)?;
    b.publish_deferred_records(deferred)?;
    Ok(())
}
