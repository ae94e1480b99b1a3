//! Catch-event subscriptions and trigger handling.
//!
//! An element instance opens a subscription (message or timer) for each catch
//! event it waits on: its own, its boundary events, the targets of an
//! event-based gateway, or the start events of the event sub-processes it
//! contains. A trigger is queued on the instance's event scope and then
//! handled according to the catch event's kind.

use super::{BpmnBehaviors, BpmnElementContext};
use crate::error::{FailureResult, ProcessingError, ProcessingResult};
use crate::model::FlowElement;
use crate::records::*;
use crate::state::EventTrigger;
use crate::types::*;
use tracing::{debug, info};

enum PreparedSubscription {
    Message {
        element_id: String,
        message_name: String,
        correlation_key: String,
        interrupting: bool,
    },
    Timer {
        element_id: String,
        due_date: Timestamp,
    },
}

impl BpmnBehaviors<'_> {
    /// Open a subscription for every catch event of `element`. Expressions are
    /// evaluated first so a failure opens none of them.
    pub fn subscribe_to_events(
        &mut self,
        element: &FlowElement,
        context: &BpmnElementContext,
    ) -> ProcessingResult<FailureResult<()>> {
        let graph = self.graph(context.process_definition_key())?;
        let events = graph.catch_events_for(element)?;
        if events.is_empty() {
            return Ok(Ok(()));
        }
        let variables = self.state.variables.get_variables_as_document(context.key());

        let mut prepared = Vec::with_capacity(events.len());
        for event in events {
            match self.prepare_subscription(event, &variables) {
                Ok(Some(subscription)) => prepared.push(subscription),
                Ok(None) => {}
                Err(failure) => return Ok(Err(failure.with_scope(context.key()))),
            }
        }

        for subscription in prepared {
            match subscription {
                PreparedSubscription::Message {
                    element_id,
                    message_name,
                    correlation_key,
                    interrupting,
                } => {
                    let record = MessageSubscriptionRecord {
                        element_instance_key: context.key(),
                        process_instance_key: context.process_instance_key(),
                        bpmn_process_id: context.record.bpmn_process_id.clone(),
                        element_id,
                        message_name,
                        correlation_key,
                        interrupting,
                        message_key: NO_KEY,
                        variables: Document::new(),
                    };
                    self.append_event(
                        context.key(),
                        Intent::MessageSubscription(MessageSubscriptionIntent::Created),
                        RecordValue::MessageSubscription(record),
                    )?;
                }
                PreparedSubscription::Timer {
                    element_id,
                    due_date,
                } => {
                    let record = TimerRecord {
                        element_instance_key: context.key(),
                        process_instance_key: context.process_instance_key(),
                        process_definition_key: context.process_definition_key(),
                        due_date,
                        target_element_id: element_id,
                    };
                    let timer_key = self.next_key();
                    self.append_event(
                        timer_key,
                        Intent::Timer(TimerIntent::Created),
                        RecordValue::Timer(record),
                    )?;
                }
            }
        }
        Ok(Ok(()))
    }

    fn prepare_subscription(
        &self,
        event: &FlowElement,
        variables: &Document,
    ) -> FailureResult<Option<PreparedSubscription>> {
        if let Some(message) = &event.message {
            let correlation_key = match &message.correlation_key {
                Some(expression) => self.evaluator.evaluate_string(expression, variables)?,
                None => String::new(),
            };
            return Ok(Some(PreparedSubscription::Message {
                element_id: event.id.clone(),
                message_name: message.name.clone(),
                correlation_key,
                interrupting: event.interrupting,
            }));
        }
        if let Some(timer) = &event.timer {
            let duration = self.evaluator.evaluate_duration_ms(timer, variables)?;
            return Ok(Some(PreparedSubscription::Timer {
                element_id: event.id.clone(),
                due_date: self.timestamp + duration,
            }));
        }
        Ok(None)
    }

    /// Cancel the timers and close the message subscriptions of an instance.
    pub fn unsubscribe_from_events(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        for timer in self.state.timers.timers_for_element_instance(context.key()) {
            self.append_event(
                timer.key,
                Intent::Timer(TimerIntent::Canceled),
                RecordValue::Timer(timer.record),
            )?;
        }
        for subscription in self
            .state
            .message_subscriptions
            .subscriptions_for_element_instance(context.key())
        {
            self.append_event(
                context.key(),
                Intent::MessageSubscription(MessageSubscriptionIntent::Deleted),
                RecordValue::MessageSubscription(subscription),
            )?;
        }
        Ok(())
    }

    // ── Correlation ──

    /// Correlate buffered messages to the subscriptions an instance just opened.
    /// Each subscription takes the oldest live message not yet correlated to its process.
    pub fn correlate_buffered_messages(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        for subscription in self
            .state
            .message_subscriptions
            .subscriptions_for_element_instance(context.key())
        {
            let candidate = self
                .state
                .messages
                .messages_for(&subscription.message_name, &subscription.correlation_key)
                .into_iter()
                .find(|(message_key, message)| {
                    message.deadline >= self.timestamp
                        && !self
                            .state
                            .messages
                            .exists_message_correlation(*message_key, &subscription.bpmn_process_id)
                })
                .map(|(message_key, message)| (message_key, message.variables.clone()));
            if let Some((message_key, variables)) = candidate {
                self.correlate_subscription(&subscription, message_key, variables)?;
            }
        }
        Ok(())
    }

    /// Correlate one message to an open subscription. Returns false when the
    /// subscription's event scope refuses the trigger.
    pub fn correlate_subscription(
        &mut self,
        subscription: &MessageSubscriptionRecord,
        message_key: Key,
        variables: Document,
    ) -> ProcessingResult<bool> {
        if !self
            .state
            .event_scopes
            .can_trigger_event(subscription.element_instance_key, &subscription.element_id)
        {
            return Ok(false);
        }
        info!(
            message_key,
            element_id = %subscription.element_id,
            key = subscription.element_instance_key,
            "Message correlated"
        );
        let mut correlated = subscription.clone();
        correlated.message_key = message_key;
        correlated.variables = variables.clone();
        self.append_event(
            subscription.element_instance_key,
            Intent::MessageSubscription(MessageSubscriptionIntent::Correlated),
            RecordValue::MessageSubscription(correlated),
        )?;
        self.trigger_catch_event(
            subscription.element_instance_key,
            &subscription.element_id,
            variables,
        )
    }

    // ── Triggers ──

    /// Queue a trigger for `catch_event_id` on the event scope of `scope_key` and
    /// hand it to whatever the catch event does.
    pub fn trigger_catch_event(
        &mut self,
        scope_key: Key,
        catch_event_id: &str,
        variables: Document,
    ) -> ProcessingResult<bool> {
        let Some(scope) = self.get_element_instance(scope_key) else {
            return Ok(false);
        };
        if !self.state.event_scopes.can_trigger_event(scope_key, catch_event_id) {
            debug!(scope_key, catch_event_id, "Event scope refused trigger");
            return Ok(false);
        }
        let event_key = self.next_key();
        let record = ProcessEventRecord {
            scope_key,
            target_element_id: catch_event_id.to_string(),
            variables,
            process_definition_key: scope.value.process_definition_key,
            process_instance_key: scope.value.process_instance_key,
        };
        self.append_event(
            event_key,
            Intent::ProcessEvent(ProcessEventIntent::Triggering),
            RecordValue::ProcessEvent(record),
        )?;

        let context = BpmnElementContext::new(scope_key, scope.value, scope.state);
        match context.element_type() {
            // The trigger waits in the queue until the element completes.
            BpmnElementType::IntermediateCatchEvent | BpmnElementType::EventBasedGateway => {
                self.complete_element(&context)
            }
            _ => self.activate_triggered_event(&context)?,
        }
        Ok(true)
    }

    /// Handle the oldest pending trigger of a scope: a boundary event or an event
    /// sub-process start event. No pending trigger means the scope already ended.
    pub fn activate_triggered_event(&mut self, scope: &BpmnElementContext) -> ProcessingResult<()> {
        let Some(trigger) = self.state.event_scopes.peek_event_trigger(scope.key()) else {
            return Ok(());
        };
        let graph = self.graph(scope.process_definition_key())?;
        let event = graph.element(&trigger.element_id)?;
        match event.element_type {
            BpmnElementType::BoundaryEvent => self.activate_boundary_event(scope, event, &trigger),
            BpmnElementType::StartEvent => {
                let esp_id = event.flow_scope.as_deref().unwrap_or_default();
                let event_sub_process = graph.element(esp_id)?;
                self.trigger_event_sub_process(scope, event_sub_process, event, &trigger)
            }
            other => Err(ProcessingError::InvalidState(format!(
                "trigger for '{}' of type {other:?} can't be activated on scope {}",
                event.id,
                scope.key()
            ))),
        }
    }

    /// Stash the trigger's variables for the new instance and drop the trigger.
    pub fn consume_event_trigger(
        &mut self,
        scope: &BpmnElementContext,
        trigger: &EventTrigger,
        target_key: Key,
    ) -> ProcessingResult<()> {
        self.state
            .variables
            .set_temporary_variables(target_key, trigger.variables.clone());
        let record = ProcessEventRecord {
            scope_key: scope.key(),
            target_element_id: trigger.element_id.clone(),
            variables: trigger.variables.clone(),
            process_definition_key: scope.process_definition_key(),
            process_instance_key: trigger.process_instance_key,
        };
        self.append_event(
            trigger.event_key,
            Intent::ProcessEvent(ProcessEventIntent::Triggered),
            RecordValue::ProcessEvent(record),
        )
    }

    fn activate_boundary_event(
        &mut self,
        activity: &BpmnElementContext,
        boundary: &FlowElement,
        trigger: &EventTrigger,
    ) -> ProcessingResult<()> {
        let key = self.next_key();
        let record = activity.record.for_element(
            &boundary.id,
            BpmnElementType::BoundaryEvent,
            boundary.event_type,
            activity.flow_scope_key(),
        );
        self.consume_event_trigger(activity, trigger, key)?;

        if boundary.interrupting {
            self.defer_activation(activity.key(), key, record);
            let instance = self.element_instance(activity.key())?;
            if instance.can_terminate() {
                self.terminate_element(activity);
            }
        } else {
            self.spawn_token(activity.flow_scope_key())?;
            self.activate_element_command(key, record);
        }
        Ok(())
    }

    fn trigger_event_sub_process(
        &mut self,
        scope: &BpmnElementContext,
        event_sub_process: &FlowElement,
        start_event: &FlowElement,
        trigger: &EventTrigger,
    ) -> ProcessingResult<()> {
        let scope_instance = self.element_instance(scope.key())?;
        if start_event.interrupting && scope_instance.is_interrupted() {
            debug!(scope_key = scope.key(), "Scope already interrupted, trigger discarded");
            self.state
                .event_scopes
                .delete_trigger(scope.key(), trigger.event_key);
            return Ok(());
        }

        let key = self.next_key();
        let record = scope.record.for_element(
            &event_sub_process.id,
            BpmnElementType::EventSubProcess,
            BpmnEventType::None,
            scope.key(),
        );
        self.consume_event_trigger(scope, trigger, key)?;
        self.spawn_token(scope.key())?;

        if !start_event.interrupting {
            self.activate_element_command(key, record);
            return Ok(());
        }

        info!(scope_key = scope.key(), element_id = %event_sub_process.id, "Scope interrupted");
        self.unsubscribe_from_events(scope)?;
        self.set_interrupting_event_key(scope.key(), key)?;
        if self.terminate_child_instances(scope)? {
            self.activate_element_command(key, record);
        } else {
            self.defer_activation(scope.key(), key, record);
        }
        Ok(())
    }
}
