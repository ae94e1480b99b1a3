//! The partition engine: one command at a time, processed to completion.
//!
//! Every external call writes a command to the [`RecordLog`] and then drains
//! the command queue. A step either commits all of its records or, on a fatal
//! error, none of them: state is restored from the snapshot taken before the step.

use crate::behavior::BpmnBehaviors;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ErrorType};
use crate::expression::{ExpressionEvaluator, JsonPathEvaluator};
use crate::model::ProcessGraph;
use crate::processor::{self, container::ContainerProcessors};
use crate::records::*;
use crate::state::{DeployedProcess, EngineState, MessageStartEventSubscription};
use crate::types::*;
use crate::writer::{RecordLog, Writers};
use tracing::{debug, error, info};

pub struct Engine {
    config: EngineConfig,
    state: EngineState,
    log: RecordLog,
    evaluator: Box<dyn ExpressionEvaluator>,
    containers: ContainerProcessors,
    /// Timestamp stamped on the next external command.
    now: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_evaluator(config, Box::new(JsonPathEvaluator))
    }

    pub fn with_evaluator(config: EngineConfig, evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        Self {
            state: EngineState::new(config.partition_id),
            config,
            log: RecordLog::default(),
            evaluator,
            containers: ContainerProcessors::default(),
            now: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn log(&self) -> &RecordLog {
        &self.log
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn set_time(&mut self, now: Timestamp) {
        self.now = now;
    }

    pub fn advance_time(&mut self, millis: i64) -> Timestamp {
        self.now += millis;
        self.now
    }

    /// Due date of the earliest pending timer.
    pub fn next_timer_due_date(&self) -> Option<Timestamp> {
        self.state.timers.next_due_date()
    }

    /// Variables visible at an element instance, nearest scope first.
    pub fn variables(&self, scope_key: Key) -> Document {
        self.state.variables.get_variables_as_document(scope_key)
    }

    // ── Deployment ──

    /// Deploy a compiled process as a new version of its process id. Message start
    /// events of the new version replace those of the previous one.
    pub fn deploy(&mut self, graph: ProcessGraph) -> DeployedProcess {
        let key = self.state.keys.next_key();
        let deployed = self.state.processes.deploy(key, graph);
        let subscriptions = deployed
            .graph
            .message_start_events()
            .into_iter()
            .filter_map(|start_event| {
                let message = start_event.message.as_ref()?;
                Some(MessageStartEventSubscription {
                    process_definition_key: deployed.key,
                    bpmn_process_id: deployed.bpmn_process_id.clone(),
                    start_event_id: start_event.id.clone(),
                    message_name: message.name.clone(),
                })
            })
            .collect();
        self.state
            .message_subscriptions
            .replace_start_event_subscriptions(&deployed.bpmn_process_id, subscriptions);
        info!(
            process_definition_key = deployed.key,
            bpmn_process_id = %deployed.bpmn_process_id,
            version = deployed.version,
            "Process deployed"
        );
        deployed
    }

    pub fn deploy_yaml(&mut self, yaml: &str) -> EngineResult<DeployedProcess> {
        let graph = ProcessGraph::from_yaml(yaml)?;
        Ok(self.deploy(graph))
    }

    // ── Processing loop ──

    /// Write an external command at the current time and process the queue until
    /// it is empty. Returns the command's log position.
    pub fn execute_command(
        &mut self,
        key: Key,
        intent: Intent,
        value: RecordValue,
    ) -> EngineResult<u64> {
        let position = self.log.write_command(key, intent, value, self.now);
        self.run_until_idle()?;
        if let Some(rejection) = self.log.rejection_for(position) {
            return Err(EngineError::Rejected {
                position,
                reason: rejection.rejection_reason.clone().unwrap_or_default(),
            });
        }
        Ok(position)
    }

    /// Process queued commands in log order. Returns how many were processed.
    /// A command that fails fatally is rolled back on its own; the rest of the
    /// queue still runs and the first error is returned afterwards.
    pub fn run_until_idle(&mut self) -> EngineResult<usize> {
        let mut processed = 0;
        let mut first_error = None;
        while let Some(command) = self.log.next_command() {
            if let Err(err) = self.process(&command) {
                first_error.get_or_insert(err);
            }
            processed += 1;
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(processed),
        }
    }

    fn process(&mut self, command: &Record) -> EngineResult<()> {
        let snapshot = self.state.clone();
        let mut writers = Writers::default();
        let result = {
            let mut behaviors = BpmnBehaviors::new(
                &mut self.state,
                &mut writers,
                self.evaluator.as_ref(),
                &self.config,
                &self.containers,
                command.timestamp,
            );
            processor::process_command(&mut behaviors, command)
        };
        match result {
            Ok(()) => {
                debug!(
                    position = command.position,
                    key = command.key,
                    intent = ?command.intent,
                    follow_ups = writers.len(),
                    "Command processed"
                );
                self.log.commit(writers.take(), command.timestamp, command.position);
                Ok(())
            }
            Err(source) => {
                self.state = snapshot;
                error!(
                    position = command.position,
                    key = command.key,
                    intent = ?command.intent,
                    error = %source,
                    "Processing aborted, state rolled back"
                );
                Err(EngineError::Processing {
                    position: command.position,
                    source,
                })
            }
        }
    }

    fn follow_up(
        &self,
        position: u64,
        intent: Intent,
        expected: &'static str,
    ) -> EngineResult<&Record> {
        self.log
            .follow_ups(position)
            .find(|record| record.record_type == RecordType::Event && record.intent == intent)
            .ok_or(EngineError::MissingFollowUp { position, expected })
    }

    // ── Process instances ──

    /// Start an instance of the latest version of `bpmn_process_id`.
    pub fn create_process_instance(
        &mut self,
        bpmn_process_id: &str,
        variables: Document,
    ) -> EngineResult<Key> {
        self.create_instance(bpmn_process_id, NO_KEY, variables)
    }

    pub fn create_process_instance_by_key(
        &mut self,
        process_definition_key: Key,
        variables: Document,
    ) -> EngineResult<Key> {
        self.create_instance("", process_definition_key, variables)
    }

    fn create_instance(
        &mut self,
        bpmn_process_id: &str,
        process_definition_key: Key,
        variables: Document,
    ) -> EngineResult<Key> {
        let request = ProcessInstanceCreationRecord {
            bpmn_process_id: bpmn_process_id.to_string(),
            process_definition_key,
            version: 0,
            variables,
            process_instance_key: NO_KEY,
        };
        let position = self.execute_command(
            NO_KEY,
            Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Create),
            RecordValue::ProcessInstanceCreation(request),
        )?;
        let created = self.follow_up(
            position,
            Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Created),
            "process instance created",
        )?;
        Ok(created.key)
    }

    /// Terminate a root process instance with everything inside it.
    pub fn cancel_process_instance(&mut self, process_instance_key: Key) -> EngineResult<()> {
        let record = match self.state.element_instances.get_instance(process_instance_key) {
            Some(instance)
                if instance.value.bpmn_element_type == BpmnElementType::Process
                    && instance.value.parent_process_instance_key == NO_KEY =>
            {
                instance.value
            }
            _ => return Err(EngineError::ProcessInstanceNotFound(process_instance_key)),
        };
        self.execute_command(
            process_instance_key,
            Intent::ProcessInstance(ProcessInstanceIntent::TerminateElement),
            RecordValue::ProcessInstance(record),
        )?;
        Ok(())
    }

    // ── Jobs ──

    /// Activate up to `max_jobs` jobs of a type for a worker.
    pub fn activate_jobs(
        &mut self,
        job_type: &str,
        worker: &str,
        max_jobs: usize,
    ) -> EngineResult<Vec<(Key, JobRecord)>> {
        let request = JobBatchRecord {
            job_type: job_type.to_string(),
            worker: worker.to_string(),
            max_jobs_to_activate: max_jobs,
            ..JobBatchRecord::default()
        };
        let position = self.execute_command(
            NO_KEY,
            Intent::JobBatch(JobBatchIntent::Activate),
            RecordValue::JobBatch(request),
        )?;
        let activated = self.follow_up(
            position,
            Intent::JobBatch(JobBatchIntent::Activated),
            "job batch activated",
        )?;
        let RecordValue::JobBatch(batch) = &activated.value else {
            return Err(EngineError::MissingFollowUp {
                position,
                expected: "job batch activated",
            });
        };
        Ok(batch.job_keys.iter().copied().zip(batch.jobs.iter().cloned()).collect())
    }

    pub fn complete_job(&mut self, job_key: Key, variables: Document) -> EngineResult<()> {
        let value = JobRecord {
            variables,
            ..JobRecord::default()
        };
        self.execute_command(job_key, Intent::Job(JobIntent::Complete), RecordValue::Job(value))?;
        Ok(())
    }

    pub fn fail_job(
        &mut self,
        job_key: Key,
        retries: u32,
        error_message: &str,
    ) -> EngineResult<()> {
        let value = JobRecord {
            retries,
            error_message: error_message.to_string(),
            ..JobRecord::default()
        };
        self.execute_command(job_key, Intent::Job(JobIntent::Fail), RecordValue::Job(value))?;
        Ok(())
    }

    pub fn update_job_retries(&mut self, job_key: Key, retries: u32) -> EngineResult<()> {
        let value = JobRecord {
            retries,
            ..JobRecord::default()
        };
        self.execute_command(
            job_key,
            Intent::Job(JobIntent::UpdateRetries),
            RecordValue::Job(value),
        )?;
        Ok(())
    }

    /// Time out every activated job whose deadline passed. Returns how many timed out.
    pub fn time_out_jobs(&mut self) -> EngineResult<usize> {
        let mut timed_out = 0;
        for job_key in self.state.jobs.timed_out_before(self.now) {
            let Some(job) = self.state.jobs.get_job(job_key).cloned() else {
                continue;
            };
            self.execute_command(job_key, Intent::Job(JobIntent::TimeOut), RecordValue::Job(job))?;
            timed_out += 1;
        }
        Ok(timed_out)
    }

    // ── Messages ──

    /// Publish a message. `time_to_live_ms: None` applies the configured default.
    pub fn publish_message(
        &mut self,
        name: &str,
        correlation_key: &str,
        variables: Document,
        time_to_live_ms: Option<i64>,
        message_id: Option<String>,
    ) -> EngineResult<Key> {
        let request = MessageRecord {
            name: name.to_string(),
            correlation_key: correlation_key.to_string(),
            time_to_live_ms: time_to_live_ms.unwrap_or(-1),
            variables,
            message_id,
            deadline: 0,
        };
        let position = self.execute_command(
            NO_KEY,
            Intent::Message(MessageIntent::Publish),
            RecordValue::Message(request),
        )?;
        let published = self.follow_up(
            position,
            Intent::Message(MessageIntent::Published),
            "message published",
        )?;
        Ok(published.key)
    }

    /// Expire every buffered message whose deadline passed.
    pub fn expire_messages(&mut self) -> EngineResult<usize> {
        let mut expired = 0;
        for message_key in self.state.messages.expired_before(self.now) {
            let Some(message) = self.state.messages.get(message_key).cloned() else {
                continue;
            };
            self.execute_command(
                message_key,
                Intent::Message(MessageIntent::Expire),
                RecordValue::Message(message),
            )?;
            expired += 1;
        }
        Ok(expired)
    }

    // ── Timers ──

    /// Trigger every timer due at or before the current time, earliest first.
    /// Timers canceled by an earlier trigger in the same pass are skipped.
    pub fn trigger_due_timers(&mut self) -> EngineResult<usize> {
        let mut triggered = 0;
        for due in self.state.timers.find_due(self.now) {
            let Some(timer) = self.state.timers.get(due.key) else {
                continue;
            };
            self.execute_command(
                timer.key,
                Intent::Timer(TimerIntent::Trigger),
                RecordValue::Timer(timer.record),
            )?;
            triggered += 1;
        }
        Ok(triggered)
    }

    // ── Incidents and variables ──

    pub fn resolve_incident(&mut self, incident_key: Key) -> EngineResult<()> {
        let value = self
            .state
            .incidents
            .get_incident(incident_key)
            .cloned()
            .unwrap_or_else(|| IncidentRecord {
                error_type: ErrorType::UnknownError,
                error_message: String::new(),
                bpmn_process_id: String::new(),
                process_definition_key: NO_KEY,
                process_instance_key: NO_KEY,
                element_id: String::new(),
                element_instance_key: NO_KEY,
                job_key: NO_KEY,
                variable_scope_key: NO_KEY,
            });
        self.execute_command(
            incident_key,
            Intent::Incident(IncidentIntent::Resolve),
            RecordValue::Incident(value),
        )?;
        Ok(())
    }

    /// Merge a document into a scope. `local` writes every variable on the scope
    /// itself; otherwise existing variables are updated where they are declared.
    pub fn set_variables(
        &mut self,
        scope_key: Key,
        variables: Document,
        local: bool,
    ) -> EngineResult<()> {
        let update_semantics = if local {
            VariableUpdateSemantics::Local
        } else {
            VariableUpdateSemantics::Propagate
        };
        let value = VariableDocumentRecord {
            scope_key,
            update_semantics,
            variables,
        };
        self.execute_command(
            scope_key,
            Intent::VariableDocument(VariableDocumentIntent::Update),
            RecordValue::VariableDocument(value),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ONE_TASK: &str = r#"
id: one_task
nodes:
  - kind: Start
    id: start
  - kind: ServiceTask
    id: task
    task_type: work
    retries: 2
  - kind: End
    id: end
edges:
  - from: start
    to: task
  - from: task
    to: end
"#;

    fn make_engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine.deploy_yaml(ONE_TASK).unwrap();
        engine
    }

    fn make_vars(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_create_instance_waits_at_job_then_completes() {
        let mut engine = make_engine();
        let pik = engine
            .create_process_instance("one_task", make_vars(json!({"order": 7})))
            .unwrap();
        assert!(engine.state().element_instances.contains(pik));

        let jobs = engine.activate_jobs("work", "w1", 10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].1.variables.get("order"), Some(&json!(7)));

        engine.complete_job(jobs[0].0, Document::new()).unwrap();
        assert!(!engine.state().element_instances.contains(pik));
        assert!(engine.state().is_drained());
    }

    #[test]
    fn test_unknown_process_is_rejected() {
        let mut engine = make_engine();
        let err = engine.create_process_instance("missing", Document::new()).unwrap_err();
        assert!(matches!(err, EngineError::Rejected { .. }));
        assert!(!engine.log().has_pending_commands());
    }

    #[test]
    fn test_fatal_error_rolls_back_state_and_drops_follow_ups() {
        let mut engine = make_engine();
        let next_key = engine.state().keys.peek();
        let err = engine
            .execute_command(
                NO_KEY,
                Intent::Timer(TimerIntent::Trigger),
                RecordValue::Message(MessageRecord::default()),
            )
            .unwrap_err();
        let EngineError::Processing { position, .. } = err else {
            panic!("expected a processing error, got {err:?}");
        };
        assert_eq!(engine.log().follow_ups(position).count(), 0);
        assert_eq!(engine.state().keys.peek(), next_key);

        // the engine keeps processing later commands
        assert!(engine.create_process_instance("one_task", Document::new()).is_ok());
    }

    #[test]
    fn test_commands_queued_behind_a_fatal_error_still_run() {
        let mut engine = make_engine();
        let now = engine.now();
        let broken = engine.log.write_command(
            NO_KEY,
            Intent::Timer(TimerIntent::Trigger),
            RecordValue::Message(MessageRecord::default()),
            now,
        );
        let request = ProcessInstanceCreationRecord {
            bpmn_process_id: "one_task".to_string(),
            process_definition_key: NO_KEY,
            version: 0,
            variables: Document::new(),
            process_instance_key: NO_KEY,
        };
        let create = engine.log.write_command(
            NO_KEY,
            Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Create),
            RecordValue::ProcessInstanceCreation(request),
            now,
        );

        let err = engine.run_until_idle().unwrap_err();
        assert!(matches!(err, EngineError::Processing { position, .. } if position == broken));
        assert_eq!(engine.log().follow_ups(broken).count(), 0);
        assert!(engine
            .log()
            .follow_ups(create)
            .any(|record| record.intent
                == Intent::ProcessInstanceCreation(ProcessInstanceCreationIntent::Created)));
        assert_eq!(engine.activate_jobs("work", "worker", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_rejects_unknown_instance() {
        let mut engine = make_engine();
        assert!(matches!(
            engine.cancel_process_instance(12345),
            Err(EngineError::ProcessInstanceNotFound(12345))
        ));
    }

    #[test]
    fn test_cancel_terminates_instance_and_job() {
        let mut engine = make_engine();
        let pik = engine.create_process_instance("one_task", Document::new()).unwrap();
        engine.cancel_process_instance(pik).unwrap();
        assert!(engine.state().is_drained());
        assert!(engine
            .log()
            .records()
            .iter()
            .any(|record| record.intent == Intent::Job(JobIntent::Canceled)));
    }
}
