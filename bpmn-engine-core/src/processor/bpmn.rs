//! Element lifecycle commands: preflight checks, then dispatch to the processor
//! of the element's type.

use super::{activity, event, gateway, StepError, StepResult};
use crate::behavior::{BpmnBehaviors, BpmnElementContext};
use crate::error::{ProcessingError, ProcessingResult};
use crate::model::FlowElement;
use crate::records::{ProcessInstanceBatchRecord, ProcessInstanceRecord, Record, RecordValue};
use crate::types::*;
use tracing::debug;

/// Closed set of element processors, one per executable element type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementProcessor {
    Process,
    SubProcess,
    EventSubProcess,
    CallActivity,
    ServiceTask,
    StartEvent,
    EndEvent,
    IntermediateCatchEvent,
    BoundaryEvent,
    ExclusiveGateway,
    ParallelGateway,
    EventBasedGateway,
}

impl ElementProcessor {
    pub fn for_type(element_type: BpmnElementType) -> ProcessingResult<Self> {
        Ok(match element_type {
            BpmnElementType::Process => Self::Process,
            BpmnElementType::SubProcess => Self::SubProcess,
            BpmnElementType::EventSubProcess => Self::EventSubProcess,
            BpmnElementType::CallActivity => Self::CallActivity,
            BpmnElementType::ServiceTask => Self::ServiceTask,
            BpmnElementType::StartEvent => Self::StartEvent,
            BpmnElementType::EndEvent => Self::EndEvent,
            BpmnElementType::IntermediateCatchEvent => Self::IntermediateCatchEvent,
            BpmnElementType::BoundaryEvent => Self::BoundaryEvent,
            BpmnElementType::ExclusiveGateway => Self::ExclusiveGateway,
            BpmnElementType::ParallelGateway => Self::ParallelGateway,
            BpmnElementType::EventBasedGateway => Self::EventBasedGateway,
            BpmnElementType::SequenceFlow => {
                return Err(ProcessingError::UnexpectedRecord {
                    expected: "executable element",
                    actual: "SequenceFlow".to_string(),
                })
            }
        })
    }

    pub fn on_activate(
        self,
        b: &mut BpmnBehaviors<'_>,
        element: &FlowElement,
        context: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        let result = match self {
            Self::Process => activity::activate_process(b, element, context),
            Self::SubProcess => activity::activate_sub_process(b, element, context),
            Self::EventSubProcess => activity::activate_event_sub_process(b, element, context),
            Self::CallActivity => activity::activate_call_activity(b, element, context),
            Self::ServiceTask => activity::activate_service_task(b, element, context),
            Self::StartEvent | Self::EndEvent | Self::BoundaryEvent => {
                event::activate_pass_through(b, context)
            }
            Self::IntermediateCatchEvent => {
                event::activate_intermediate_catch_event(b, element, context)
            }
            Self::ExclusiveGateway => gateway::activate_exclusive_gateway(b, element, context),
            Self::ParallelGateway => gateway::activate_parallel_gateway(b, element, context),
            Self::EventBasedGateway => gateway::activate_event_based_gateway(b, element, context),
        };
        raise_incident_on_failure(b, context, result)
    }

    pub fn on_complete(
        self,
        b: &mut BpmnBehaviors<'_>,
        element: &FlowElement,
        context: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        let result = match self {
            Self::Process => activity::complete_process(b, element, context),
            Self::SubProcess | Self::CallActivity | Self::ServiceTask => {
                activity::complete_activity(b, element, context)
            }
            Self::EventSubProcess => activity::complete_event_sub_process(b, element, context),
            Self::StartEvent | Self::EndEvent | Self::BoundaryEvent => {
                event::complete_with_output_mappings(b, element, context)
            }
            Self::IntermediateCatchEvent => {
                event::complete_intermediate_catch_event(b, element, context)
            }
            // Gateways pass through within their activation.
            Self::ExclusiveGateway | Self::ParallelGateway => Ok(()),
            Self::EventBasedGateway => gateway::complete_event_based_gateway(b, element, context),
        };
        raise_incident_on_failure(b, context, result)
    }

    pub fn on_terminate(
        self,
        b: &mut BpmnBehaviors<'_>,
        context: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        let result = match self {
            Self::Process | Self::SubProcess | Self::EventSubProcess => {
                activity::terminate_container(b, context)
            }
            Self::CallActivity => activity::terminate_call_activity(b, context),
            Self::ServiceTask => activity::terminate_service_task(b, context),
            _ => event::terminate_element(b, context),
        };
        raise_incident_on_failure(b, context, result)
    }
}

fn raise_incident_on_failure(
    b: &mut BpmnBehaviors<'_>,
    context: &BpmnElementContext,
    result: StepResult<()>,
) -> ProcessingResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(StepError::Failure(failure)) => b.create_incident(failure, context),
        Err(StepError::Fatal(err)) => Err(err),
    }
}

// ─── Preflight and dispatch ───────────────────────────────────

pub fn process_element_command(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
    intent: ProcessInstanceIntent,
    record: &ProcessInstanceRecord,
) -> ProcessingResult<()> {
    let processor = ElementProcessor::for_type(record.bpmn_element_type)?;
    let graph = b.graph(record.process_definition_key)?;
    let element = graph.element(&record.element_id)?;
    let context = BpmnElementContext::new(command.key, record.clone(), intent);

    match intent {
        ProcessInstanceIntent::ActivateElement => {
            if b.state.element_instances.contains(command.key) {
                b.reject(command, &format!("element instance {} already exists", command.key));
                return Ok(());
            }
            if record.flow_scope_key != NO_KEY {
                let Some(scope) = b.get_element_instance(record.flow_scope_key) else {
                    b.reject(
                        command,
                        &format!(
                            "flow scope instance {} of '{}' no longer exists",
                            record.flow_scope_key,
                            record.element_id,
                        ),
                    );
                    return Ok(());
                };
                let interrupted_by_other =
                    scope.is_interrupted() && scope.interrupting_event_key != command.key;
                if !scope.is_active() || interrupted_by_other {
                    return drop_activation(b, &context, scope.is_interrupted());
                }
                let scope_context = BpmnElementContext::new(scope.key, scope.value, scope.state);
                let container = b.containers.lookup(scope_context.element_type())?;
                if let Err(failure) = container.on_child_activating(b, &scope_context, &context)? {
                    return b.create_incident(failure, &scope_context);
                }
            }
            processor.on_activate(b, element, &context)
        }
        ProcessInstanceIntent::CompleteElement => {
            let Some(instance) = b.get_element_instance(command.key) else {
                b.reject(command, &format!("element instance {} does not exist", command.key));
                return Ok(());
            };
            if instance.state != ProcessInstanceIntent::ElementActivated {
                b.reject(
                    command,
                    &format!(
                        "element instance {} is in state {:?}, not ACTIVATED",
                        command.key,
                        instance.state,
                    ),
                );
                return Ok(());
            }
            if record.bpmn_element_type.is_container()
                && (instance.active_tokens > 0 || instance.active_element_instances > 0)
            {
                b.reject(
                    command,
                    &format!("element instance {} still has active children", command.key),
                );
                return Ok(());
            }
            let context = BpmnElementContext::new(command.key, instance.value, instance.state);
            processor.on_complete(b, element, &context)
        }
        ProcessInstanceIntent::TerminateElement => {
            let Some(instance) = b.get_element_instance(command.key) else {
                b.reject(command, &format!("element instance {} does not exist", command.key));
                return Ok(());
            };
            if !instance.can_terminate() {
                b.reject(
                    command,
                    &format!(
                        "element instance {} is in state {:?} and can't be terminated",
                        command.key,
                        instance.state,
                    ),
                );
                return Ok(());
            }
            let context = BpmnElementContext::new(command.key, instance.value, instance.state);
            processor.on_terminate(b, &context)
        }
        other => Err(ProcessingError::UnexpectedRecord {
            expected: "process instance command",
            actual: format!("{other:?}"),
        }),
    }
}

/// The flow scope no longer takes new children. The branch ends here and gives
/// its token back.
fn drop_activation(
    b: &mut BpmnBehaviors<'_>,
    context: &BpmnElementContext,
    scope_interrupted: bool,
) -> ProcessingResult<()> {
    debug!(
        key = context.key(),
        element_id = context.element_id(),
        scope_key = context.flow_scope_key(),
        "Activation dropped, flow scope is not active"
    );
    b.consume_token(context.flow_scope_key())?;
    b.state.variables.remove_temporary_variables(context.key());
    if scope_interrupted {
        let scope = b.flow_scope_context(context)?;
        let container = b.containers.lookup(scope.element_type())?;
        container.publish_if_idle(b, &scope)?;
    }
    Ok(())
}

/// Terminate the children of a scope, at most `max_commands_in_batch` per step.
pub fn process_batch_terminate(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
    batch: &ProcessInstanceBatchRecord,
) -> ProcessingResult<()> {
    let scope_key = batch.batch_element_instance_key;
    if !b.state.element_instances.contains(scope_key) {
        b.reject(command, &format!("element instance {scope_key} does not exist"));
        return Ok(());
    }
    let children: Vec<_> = b
        .state
        .element_instances
        .children(scope_key)
        .into_iter()
        .filter(|child| child.key > batch.index)
        .collect();
    let limit = b.config.max_commands_in_batch.max(1);

    for child in children.iter().take(limit) {
        if child.can_terminate() {
            let context = BpmnElementContext::new(child.key, child.value.clone(), child.state);
            b.terminate_element(&context);
        }
    }
    if children.len() > limit {
        let next = ProcessInstanceBatchRecord {
            index: children[limit - 1].key,
            ..batch.clone()
        };
        b.append_command(
            scope_key,
            Intent::ProcessInstanceBatch(ProcessInstanceBatchIntent::Terminate),
            RecordValue::ProcessInstanceBatch(next),
        );
    }
    b.append_event(
        command.key,
        Intent::ProcessInstanceBatch(ProcessInstanceBatchIntent::Terminated),
        RecordValue::ProcessInstanceBatch(batch.clone()),
    )
}
