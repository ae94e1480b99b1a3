//! Command processing: one command in, follow-up events and commands out.
//!
//! Element lifecycle commands go through [`bpmn`]; every other family has its
//! own processor module.

mod activity;
pub mod bpmn;
pub mod container;
mod creation;
mod event;
mod gateway;
mod incident;
mod job;
mod message;
mod timer;
mod variable;

use crate::behavior::BpmnBehaviors;
use crate::error::{Failure, ProcessingError, ProcessingResult};
use crate::records::{Record, RecordValue};
use crate::types::*;

/// Why an element step stopped early: a fatal error or a failure that becomes
/// an incident.
#[derive(Debug)]
pub(crate) enum StepError {
    Fatal(ProcessingError),
    Failure(Failure),
}

impl From<ProcessingError> for StepError {
    fn from(err: ProcessingError) -> Self {
        StepError::Fatal(err)
    }
}

impl From<Failure> for StepError {
    fn from(failure: Failure) -> Self {
        StepError::Failure(failure)
    }
}

pub(crate) type StepResult<T> = Result<T, StepError>;

/// Process one command. Rejections are written, not returned; an `Err` means
/// the step must be rolled back.
pub fn process_command(
    behaviors: &mut BpmnBehaviors<'_>,
    command: &Record,
) -> ProcessingResult<()> {
    match (command.intent, &command.value) {
        (Intent::ProcessInstance(intent), RecordValue::ProcessInstance(value)) => {
            bpmn::process_element_command(behaviors, command, intent, value)
        }
        (
            Intent::ProcessInstanceBatch(ProcessInstanceBatchIntent::Terminate),
            RecordValue::ProcessInstanceBatch(value),
        ) => bpmn::process_batch_terminate(behaviors, command, value),
        (
            Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Create),
            RecordValue::ProcessInstanceCreation(value),
        ) => creation::create_process_instance(behaviors, command, value),
        (Intent::JobBatch(JobBatchIntent::Activate), RecordValue::JobBatch(value)) => {
            job::activate_jobs(behaviors, command, value)
        }
        (Intent::Job(intent), RecordValue::Job(value)) => {
            job::process_job_command(behaviors, command, intent, value)
        }
        (Intent::Incident(IncidentIntent::Create), RecordValue::Incident(value)) => {
            incident::create_incident(behaviors, command, value)
        }
        (Intent::Incident(IncidentIntent::Resolve), RecordValue::Incident(_)) => {
            incident::resolve_incident(behaviors, command)
        }
        (Intent::Timer(TimerIntent::Trigger), RecordValue::Timer(_)) => {
            timer::trigger_timer(behaviors, command)
        }
        (Intent::Message(MessageIntent::Publish), RecordValue::Message(value)) => {
            message::publish_message(behaviors, command, value)
        }
        (Intent::Message(MessageIntent::Expire), RecordValue::Message(_)) => {
            message::expire_message(behaviors, command)
        }
        (
            Intent::VariableDocument(VariableDocumentIntent::Update),
            RecordValue::VariableDocument(value),
        ) => variable::update_variable_document(behaviors, command, value),
        (intent, _) => Err(ProcessingError::UnexpectedRecord {
            expected: "a command with a matching value",
            actual: format!("{intent:?}"),
        }),
    }
}
