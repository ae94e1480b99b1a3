use crate::behavior::{BpmnBehaviors, BpmnElementContext};
use crate::error::{ProcessingError, ProcessingResult};
use crate::records::{JobBatchRecord, JobRecord, Record, RecordValue};
use crate::state::JobState;
use crate::types::*;
use tracing::{debug, info};

/// Activate up to `max_jobs_to_activate` jobs of a type, oldest first. Each job
/// carries the variables visible at its element instance.
pub(super) fn activate_jobs(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
    request: &JobBatchRecord,
) -> ProcessingResult<()> {
    if request.max_jobs_to_activate == 0 {
        b.reject(command, "Expected to activate at least one job, but max_jobs_to_activate is 0");
        return Ok(());
    }
    let timeout_ms = if request.timeout_ms > 0 {
        request.timeout_ms
    } else {
        b.config.job_timeout_ms
    };
    let deadline = b.timestamp + timeout_ms;

    let mut batch = JobBatchRecord {
        timeout_ms,
        job_keys: Vec::new(),
        jobs: Vec::new(),
        ..request.clone()
    };
    for key in b.state.jobs.activatable_jobs(&request.job_type, request.max_jobs_to_activate) {
        let Some(stored) = b.state.jobs.get_job(key) else {
            continue;
        };
        let mut job = stored.clone();
        job.worker = request.worker.clone();
        job.deadline = deadline;
        job.variables = b
            .state
            .variables
            .get_variables_as_document(job.element_instance_key);
        batch.job_keys.push(key);
        batch.jobs.push(job);
    }

    debug!(
        job_type = %request.job_type,
        worker = %request.worker,
        activated = batch.jobs.len(),
        "Jobs activated",
    );
    let batch_key = b.next_key();
    b.append_event(
        batch_key,
        Intent::JobBatch(JobBatchIntent::Activated),
        RecordValue::JobBatch(batch),
    )
}

pub(super) fn process_job_command(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
    intent: JobIntent,
    value: &JobRecord,
) -> ProcessingResult<()> {
    let key = command.key;
    let state = b.state.jobs.get_state(key);
    let Some(stored) = b.state.jobs.get_job(key).cloned() else {
        b.reject(
            command,
            &format!("Expected to find job with key '{key}', but no such job was found"),
        );
        return Ok(());
    };

    match intent {
        JobIntent::Complete => {
            if !matches!(state, JobState::Activated | JobState::Activatable) {
                b.reject(
                    command,
                    &format!("Expected to complete job with key '{key}', but it is in state {state:?}"),
                );
                return Ok(());
            }
            complete_job(b, key, stored, value)
        }
        JobIntent::Fail => {
            if state != JobState::Activated {
                b.reject(
                    command,
                    &format!("Expected to fail activated job with key '{key}', but it is in state {state:?}"),
                );
                return Ok(());
            }
            let failed = JobRecord {
                retries: value.retries,
                error_message: value.error_message.clone(),
                ..stored
            };
            b.append_event(key, Intent::Job(JobIntent::Failed), RecordValue::Job(failed.clone()))?;
            if failed.retries == 0 {
                b.create_job_incident(key, &failed);
            }
            Ok(())
        }
        JobIntent::UpdateRetries => {
            if value.retries == 0 {
                b.reject(
                    command,
                    &format!("Expected to update retries of job '{key}' to a positive amount, but was 0"),
                );
                return Ok(());
            }
            let updated = JobRecord {
                retries: value.retries,
                ..stored
            };
            b.append_event(key, Intent::Job(JobIntent::RetriesUpdated), RecordValue::Job(updated))
        }
        JobIntent::TimeOut => {
            if state != JobState::Activated {
                b.reject(
                    command,
                    &format!("Expected to time out activated job with key '{key}', but it is in state {state:?}"),
                );
                return Ok(());
            }
            info!(job_key = key, element_id = %stored.element_id, "Job timed out");
            b.append_event(key, Intent::Job(JobIntent::TimedOut), RecordValue::Job(stored))
        }
        other => Err(ProcessingError::UnexpectedRecord {
            expected: "job command",
            actual: format!("{other:?}"),
        }),
    }
}

/// The job's variables become the element's temporary variables and the element
/// is asked to complete.
fn complete_job(
    b: &mut BpmnBehaviors<'_>,
    key: Key,
    stored: JobRecord,
    value: &JobRecord,
) -> ProcessingResult<()> {
    let element_instance_key = stored.element_instance_key;
    let completed = JobRecord {
        variables: value.variables.clone(),
        ..stored
    };
    b.append_event(key, Intent::Job(JobIntent::Completed), RecordValue::Job(completed))?;

    if let Some(instance) = b.get_element_instance(element_instance_key) {
        if instance.state == ProcessInstanceIntent::ElementActivated {
            if !value.variables.is_empty() {
                b.state
                    .variables
                    .set_temporary_variables(element_instance_key, value.variables.clone());
            }
            let context = BpmnElementContext::new(
                element_instance_key,
                instance.value,
                instance.state,
            );
            b.complete_element(&context);
        }
    }
    Ok(())
}
