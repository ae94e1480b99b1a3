//! Message publication, correlation and expiry.

use crate::behavior::BpmnBehaviors;
use crate::error::ProcessingResult;
use crate::records::{MessageRecord, Record, RecordValue};
use crate::types::*;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Publish a message: buffer it for its time to live, correlate it to open
/// subscriptions (once per process) and start instances at message start events.
pub(super) fn publish_message(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
    request: &MessageRecord,
) -> ProcessingResult<()> {
    if let Some(message_id) = &request.message_id {
        if b.state
            .messages
            .exists_message_id(&request.name, &request.correlation_key, message_id)
        {
            b.reject(
                command,
                &format!(
                    "Expected to publish a new message with id '{message_id}', but a message with that id was already published"
                ),
            );
            return Ok(());
        }
    }

    let time_to_live_ms = if request.time_to_live_ms >= 0 {
        request.time_to_live_ms
    } else {
        b.config.default_message_ttl_ms
    };
    let message = MessageRecord {
        time_to_live_ms,
        deadline: b.timestamp + time_to_live_ms,
        ..request.clone()
    };
    let message_key = b.next_key();
    b.append_event(
        message_key,
        Intent::Message(MessageIntent::Published),
        RecordValue::Message(message.clone()),
    )?;
    info!(
        message_key,
        name = %message.name,
        correlation_key = %message.correlation_key,
        "Message published",
    );

    let mut correlated_processes = BTreeSet::new();
    for subscription in b
        .state
        .message_subscriptions
        .subscriptions_for(&message.name, &message.correlation_key)
    {
        if correlated_processes.contains(&subscription.bpmn_process_id) {
            continue;
        }
        if b.correlate_subscription(&subscription, message_key, message.variables.clone())? {
            correlated_processes.insert(subscription.bpmn_process_id.clone());
        }
    }

    for start_event in b.state.message_subscriptions.start_event_subscriptions(&message.name) {
        if correlated_processes.contains(&start_event.bpmn_process_id) {
            continue;
        }
        let locked = !message.correlation_key.is_empty()
            && b.state
                .messages
                .exists_active_process_instance(
                    &start_event.bpmn_process_id,
                    &message.correlation_key,
                );
        if locked
            || b.state
                .messages
                .exists_message_correlation(message_key, &start_event.bpmn_process_id)
        {
            debug!(
                message_key,
                bpmn_process_id = %start_event.bpmn_process_id,
                "Message buffered, correlation key is locked"
            );
            continue;
        }
        let Some(process) = b
            .state
            .processes
            .get_by_key(start_event.process_definition_key)
            .cloned()
        else {
            continue;
        };
        b.start_instance_from_message(
            &process,
            &start_event.start_event_id,
            message_key,
            &message,
        )?;
        correlated_processes.insert(start_event.bpmn_process_id.clone());
    }
    Ok(())
}

/// Remove a buffered message once its time to live passed.
pub(super) fn expire_message(b: &mut BpmnBehaviors<'_>, command: &Record) -> ProcessingResult<()> {
    let Some(message) = b.state.messages.get(command.key).cloned() else {
        b.reject(
            command,
            &format!(
                "Expected to expire message with key '{}', but no such message was found",
                command.key,
            ),
        );
        return Ok(());
    };
    debug!(message_key = command.key, name = %message.name, "Message expired");
    b.append_event(
        command.key,
        Intent::Message(MessageIntent::Expired),
        RecordValue::Message(message),
    )
}
