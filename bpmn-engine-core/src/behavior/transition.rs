//! Element lifecycle transitions, sequence flows and scope propagation.
//!
//! Every transition is checked against the lifecycle graph before its event is
//! appended. A leaving element consumes its token from the flow scope before any
//! "last execution path" check runs.

use super::{BpmnBehaviors, BpmnElementContext};
use crate::error::{FailureResult, ProcessingError, ProcessingResult};
use crate::model::{FlowElement, SequenceFlow};
use crate::records::{ProcessInstanceBatchRecord, RecordValue};
use crate::types::*;
use tracing::debug;

use ProcessInstanceIntent::*;

impl BpmnBehaviors<'_> {
    fn verify_transition(
        &self,
        key: Key,
        from: ProcessInstanceIntent,
        to: ProcessInstanceIntent,
    ) -> ProcessingResult<()> {
        if from.can_transition(to) {
            Ok(())
        } else {
            Err(ProcessingError::IllegalTransition { key, from, to })
        }
    }

    fn transition_to(
        &mut self,
        context: &BpmnElementContext,
        to: ProcessInstanceIntent,
    ) -> ProcessingResult<BpmnElementContext> {
        let from = match self.get_element_instance(context.key()) {
            Some(instance) => instance.state,
            None => context.intent,
        };
        self.verify_transition(context.key(), from, to)?;
        self.append_event(
            context.key(),
            Intent::ProcessInstance(to),
            RecordValue::ProcessInstance(context.record.clone()),
        )?;
        debug!(
            key = context.key(),
            element_id = context.element_id(),
            intent = ?to,
            "Element transitioned"
        );
        Ok(context.with_intent(to))
    }

    /// Re-entering a state the instance is already in is only legal while an
    /// incident resolution retries the transition.
    fn reentry(
        &self,
        context: &BpmnElementContext,
        state: ProcessInstanceIntent,
    ) -> ProcessingResult<BpmnElementContext> {
        if self.resolving_incident {
            Ok(context.with_intent(state))
        } else {
            Err(ProcessingError::UnexpectedReentry {
                key: context.key(),
                intent: state,
            })
        }
    }

    pub fn transition_to_activating(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<BpmnElementContext> {
        match self.get_element_instance(context.key()) {
            Some(instance) if instance.state == ElementActivating => {
                self.reentry(context, ElementActivating)
            }
            Some(instance) => Err(ProcessingError::IllegalTransition {
                key: context.key(),
                from: instance.state,
                to: ElementActivating,
            }),
            None => self.transition_to(&context.with_intent(ActivateElement), ElementActivating),
        }
    }

    pub fn transition_to_activated(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<BpmnElementContext> {
        self.transition_to(context, ElementActivated)
    }

    pub fn transition_to_completing(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<BpmnElementContext> {
        let instance = self.element_instance(context.key())?;
        if instance.state == ElementCompleting {
            return self.reentry(context, ElementCompleting);
        }
        self.transition_to(context, ElementCompleting)
    }

    pub fn transition_to_completed(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<BpmnElementContext> {
        let completed = self.transition_to(context, ElementCompleted)?;
        if completed.flow_scope_key() != NO_KEY {
            self.consume_token(completed.flow_scope_key())?;
        }
        Ok(completed)
    }

    pub fn transition_to_terminating(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<BpmnElementContext> {
        self.transition_to(context, ElementTerminating)
    }

    pub fn transition_to_terminated(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<BpmnElementContext> {
        let terminated = self.transition_to(context, ElementTerminated)?;
        if terminated.flow_scope_key() != NO_KEY {
            self.consume_token(terminated.flow_scope_key())?;
        }
        Ok(terminated)
    }

    // ── Continuing after completion ──

    /// Complete the element, then take its outgoing flows or, at the end of an
    /// execution path, let the flow scope's container react.
    pub fn complete_and_continue(
        &mut self,
        element: &FlowElement,
        context: &BpmnElementContext,
    ) -> ProcessingResult<FailureResult<BpmnElementContext>> {
        let end_of_path = element.outgoing.is_empty() && context.flow_scope_key() != NO_KEY;
        if !end_of_path {
            let completed = self.transition_to_completed(context)?;
            self.take_outgoing_sequence_flows(element, &completed)?;
            return Ok(Ok(completed));
        }

        let scope = self.flow_scope_context(context)?;
        let container = self.containers.lookup(scope.element_type())?;
        if let Err(failure) = container.before_execution_path_completed(self, &scope, context)? {
            return Ok(Err(failure));
        }
        let completed = self.transition_to_completed(context)?;
        container.after_execution_path_completed(self, &scope, &completed)?;
        Ok(Ok(completed))
    }

    pub fn take_outgoing_sequence_flows(
        &mut self,
        element: &FlowElement,
        context: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        let graph = self.graph(context.process_definition_key())?;
        for flow in graph.outgoing(element)? {
            self.take_sequence_flow(context, flow)?;
        }
        Ok(())
    }

    /// Take one flow: one token per flow. A parallel gateway target is activated
    /// only once every incoming flow was taken; the join keeps one of the tokens.
    pub fn take_sequence_flow(
        &mut self,
        context: &BpmnElementContext,
        flow: &SequenceFlow,
    ) -> ProcessingResult<()> {
        let scope_key = context.flow_scope_key();
        let graph = self.graph(context.process_definition_key())?;
        let target = graph.element(&flow.target)?;

        let flow_record = context.record.for_element(
            &flow.id,
            BpmnElementType::SequenceFlow,
            BpmnEventType::None,
            scope_key,
        );
        let flow_key = self.next_key();
        self.append_event(
            flow_key,
            Intent::ProcessInstance(SequenceFlowTaken),
            RecordValue::ProcessInstance(flow_record),
        )?;
        self.spawn_token(scope_key)?;

        if target.element_type == BpmnElementType::ParallelGateway {
            let incoming = graph.incoming_count(&target.id);
            let taken = self
                .state
                .element_instances
                .distinct_taken_flows(scope_key, &target.id);
            if taken < incoming {
                return Ok(());
            }
            self.state
                .element_instances
                .decrement_taken_flows(scope_key, &target.id);
            for _ in 1..incoming {
                self.consume_token(scope_key)?;
            }
        }

        let target_record =
            context
                .record
                .for_element(&target.id, target.element_type, target.event_type, scope_key);
        let target_key = self.next_key();
        self.activate_element_command(target_key, target_record);
        Ok(())
    }

    /// Activate a child of a scope that is not reached through a sequence flow
    /// (a start event). Spawns the child's token.
    pub fn activate_child_instance(
        &mut self,
        scope: &BpmnElementContext,
        child: &FlowElement,
    ) -> ProcessingResult<Key> {
        let record = scope
            .record
            .for_element(&child.id, child.element_type, child.event_type, scope.key());
        self.spawn_token(scope.key())?;
        let key = self.next_key();
        self.activate_element_command(key, record);
        Ok(key)
    }

    // ── Termination ──

    /// Move a terminating element to TERMINATED, publish what it deferred (an
    /// interrupting boundary event) and notify its container.
    pub fn finish_termination(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<BpmnElementContext> {
        let deferred = self.deferred_records(context.key());
        let correlation_key = self.message_start_correlation_key(context);

        let terminated = self.transition_to_terminated(context)?;

        if let Some(scope) = self.flow_scope_instance(&terminated) {
            if scope.is_active() && !scope.is_interrupted() {
                self.publish_deferred_records(deferred)?;
            }
        }
        self.on_child_terminated(&terminated)?;

        if let Some(correlation_key) = correlation_key {
            self.correlate_next_buffered_message(&terminated, &correlation_key)?;
        }
        Ok(terminated)
    }

    /// Start terminating the children of a scope in batches. Returns true when
    /// the scope has no children left to wait for.
    pub fn terminate_child_instances(
        &mut self,
        scope: &BpmnElementContext,
    ) -> ProcessingResult<bool> {
        let children = self.state.element_instances.children(scope.key());
        if children.is_empty() {
            return Ok(true);
        }
        if children.iter().any(|child| child.can_terminate()) {
            let batch = ProcessInstanceBatchRecord {
                process_instance_key: scope.process_instance_key(),
                batch_element_instance_key: scope.key(),
                index: NO_KEY,
            };
            self.append_command(
                scope.key(),
                Intent::ProcessInstanceBatch(ProcessInstanceBatchIntent::Terminate),
                RecordValue::ProcessInstanceBatch(batch),
            );
        }
        Ok(false)
    }

    fn on_child_terminated(&mut self, terminated: &BpmnElementContext) -> ProcessingResult<()> {
        if terminated.flow_scope_key() != NO_KEY {
            let scope = self.flow_scope_context(terminated)?;
            let container = self.containers.lookup(scope.element_type())?;
            return container.on_child_terminated(self, &scope, terminated);
        }
        let call_activity_key = terminated.record.parent_element_instance_key;
        if call_activity_key == NO_KEY {
            return Ok(());
        }
        match self.get_element_instance(call_activity_key) {
            Some(call_activity) => {
                let scope = BpmnElementContext::new(
                    call_activity_key,
                    call_activity.value,
                    call_activity.state,
                );
                let container = self.containers.lookup(scope.element_type())?;
                container.on_child_terminated(self, &scope, terminated)
            }
            None => Ok(()),
        }
    }
}
