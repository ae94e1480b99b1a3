//! End-to-end scenarios: deploy YAML processes, drive them through the engine
//! API and inspect the committed log and the state left behind.

use bpmn_engine_core::error::{EngineError, ErrorType};
use bpmn_engine_core::records::{Record, RecordValue};
use bpmn_engine_core::types::*;
use bpmn_engine_core::{Engine, EngineConfig};
use serde_json::{json, Value};

// ── Test Infrastructure ──────────────────────────────────────────────────

struct RecordingHarness {
    engine: Engine,
}

impl RecordingHarness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        Self {
            engine: Engine::new(config),
        }
    }

    fn deploy(&mut self, yaml: &str) -> Key {
        self.engine.deploy_yaml(yaml).unwrap().key
    }

    fn events(&self, intent: Intent) -> Vec<&Record> {
        self.engine
            .log()
            .records()
            .iter()
            .filter(|record| record.record_type == RecordType::Event && record.intent == intent)
            .collect()
    }

    /// Element lifecycle events of one element id, in log order.
    fn lifecycle(&self, element_id: &str) -> Vec<ProcessInstanceIntent> {
        self.engine
            .log()
            .records()
            .iter()
            .filter(|record| record.record_type == RecordType::Event)
            .filter_map(|record| match (record.intent, &record.value) {
                (Intent::ProcessInstance(intent), RecordValue::ProcessInstance(value))
                    if value.element_id == element_id =>
                {
                    Some(intent)
                }
                _ => None,
            })
            .collect()
    }

    fn count(&self, element_id: &str, intent: ProcessInstanceIntent) -> usize {
        self.lifecycle(element_id)
            .into_iter()
            .filter(|candidate| *candidate == intent)
            .count()
    }

    fn element_key(&self, element_id: &str) -> Key {
        self.engine
            .log()
            .records()
            .iter()
            .find(|record| {
                record.intent == Intent::ProcessInstance(ProcessInstanceIntent::ElementActivated)
                    && record
                        .process_instance_value()
                        .is_some_and(|value| value.element_id == element_id)
            })
            .map(|record| record.key)
            .unwrap()
    }

    fn only_job(&mut self, job_type: &str) -> (Key, Document) {
        let jobs = self.engine.activate_jobs(job_type, "worker", 10).unwrap();
        assert_eq!(jobs.len(), 1, "expected exactly one '{job_type}' job");
        let (key, job) = jobs.into_iter().next().unwrap();
        (key, job.variables)
    }

    fn assert_drained(&self) {
        assert!(self.engine.state().is_drained(), "instance state left behind");
    }
}

fn vars(value: Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

// ── Processes ────────────────────────────────────────────────────────────

const TWO_TASKS: &str = r#"
id: two_tasks
nodes:
  - kind: Start
    id: start
  - kind: ServiceTask
    id: reserve
    task_type: reserve
  - kind: ServiceTask
    id: ship
    task_type: ship
  - kind: End
    id: end
edges:
  - from: start
    to: reserve
  - from: reserve
    to: ship
  - from: ship
    to: end
"#;

const MESSAGE_START: &str = r#"
id: order_flow
nodes:
  - kind: Start
    id: order_received
    message:
      name: order
  - kind: ServiceTask
    id: handle
    task_type: handle
  - kind: End
    id: end
edges:
  - from: order_received
    to: handle
  - from: handle
    to: end
"#;

const TWO_STARTS: &str = r#"
id: intake
nodes:
  - kind: Start
    id: order_received
    message:
      name: order
  - kind: Start
    id: rush_received
    message:
      name: rush
  - kind: ServiceTask
    id: handle
    task_type: handle
  - kind: End
    id: end
edges:
  - from: order_received
    to: handle
  - from: rush_received
    to: handle
  - from: handle
    to: end
"#;

const STOPPABLE: &str = r#"
id: stoppable
nodes:
  - kind: Start
    id: start
  - kind: ServiceTask
    id: work
    task_type: work
  - kind: Boundary
    id: stop
    host: work
    message:
      name: stop
      correlation_key: "=orderId"
  - kind: ServiceTask
    id: after
    task_type: after
  - kind: End
    id: done
  - kind: End
    id: stopped
edges:
  - from: start
    to: work
  - from: work
    to: done
  - from: stop
    to: after
  - from: after
    to: stopped
"#;

const ROUTING: &str = r#"
id: routing
nodes:
  - kind: Start
    id: start
  - kind: ExclusiveGateway
    id: route
  - kind: End
    id: big
  - kind: End
    id: huge
edges:
  - from: start
    to: route
  - from: route
    to: big
    condition: "=amount > 100"
  - from: route
    to: huge
    condition: "=amount > 1000"
"#;

const ROUTING_WITH_DEFAULT: &str = r#"
id: routing_default
nodes:
  - kind: Start
    id: start
  - kind: ExclusiveGateway
    id: route
    default: route_to_small
  - kind: End
    id: big
  - kind: End
    id: small
edges:
  - from: start
    to: route
  - from: route
    to: big
    condition: "=amount > 100"
  - from: route
    to: small
"#;

const GUARDED_TASK: &str = r#"
id: guarded
nodes:
  - kind: Start
    id: start
  - kind: ServiceTask
    id: work
    task_type: work
  - kind: Boundary
    id: too_late
    host: work
    timer: PT5S
  - kind: Boundary
    id: reminder
    host: work
    interrupting: false
    message:
      name: remind
      correlation_key: "=orderId"
  - kind: ServiceTask
    id: nudge
    task_type: nudge
  - kind: End
    id: done
  - kind: End
    id: timed_out
  - kind: End
    id: nudged
edges:
  - from: start
    to: work
  - from: work
    to: done
  - from: too_late
    to: timed_out
  - from: reminder
    to: nudge
  - from: nudge
    to: nudged
"#;

const CANCELABLE: &str = r#"
id: cancelable
nodes:
  - kind: Start
    id: start
  - kind: ServiceTask
    id: work
    task_type: work
  - kind: End
    id: end
  - kind: EventSubProcess
    id: on_cancel
  - kind: Start
    id: cancel_requested
    scope: on_cancel
    message:
      name: cancel
      correlation_key: "=orderId"
  - kind: ServiceTask
    id: refund
    scope: on_cancel
    task_type: refund
  - kind: End
    id: canceled
    scope: on_cancel
edges:
  - from: start
    to: work
  - from: work
    to: end
  - from: cancel_requested
    to: refund
  - from: refund
    to: canceled
"#;

const FORK_JOIN: &str = r#"
id: fork_join
nodes:
  - kind: Start
    id: start
  - kind: ParallelGateway
    id: fork
  - kind: ServiceTask
    id: a
    task_type: a
  - kind: ServiceTask
    id: b
    task_type: b
  - kind: ServiceTask
    id: c
    task_type: c
  - kind: ParallelGateway
    id: join
  - kind: End
    id: end
edges:
  - from: start
    to: fork
  - from: fork
    to: a
  - from: fork
    to: b
  - from: fork
    to: c
  - from: a
    to: join
  - from: b
    to: join
  - from: c
    to: join
  - from: join
    to: end
"#;

const PARENT: &str = r#"
id: parent
nodes:
  - kind: Start
    id: start
  - kind: CallActivity
    id: call_child
    process_id: child
  - kind: ServiceTask
    id: after
    task_type: after
  - kind: End
    id: end
edges:
  - from: start
    to: call_child
  - from: call_child
    to: after
  - from: after
    to: end
"#;

const CHILD: &str = r#"
id: child
nodes:
  - kind: Start
    id: start
  - kind: ServiceTask
    id: child_work
    task_type: child_work
  - kind: End
    id: end
edges:
  - from: start
    to: child_work
  - from: child_work
    to: end
"#;

const RACE: &str = r#"
id: race
nodes:
  - kind: Start
    id: start
  - kind: EventBasedGateway
    id: wait_for_answer
  - kind: IntermediateCatch
    id: approved
    message:
      name: approved
      correlation_key: "=requestId"
  - kind: IntermediateCatch
    id: expired
    timer: PT1M
  - kind: End
    id: approved_end
  - kind: End
    id: expired_end
edges:
  - from: start
    to: wait_for_answer
  - from: wait_for_answer
    to: approved
  - from: wait_for_answer
    to: expired
  - from: approved
    to: approved_end
  - from: expired
    to: expired_end
"#;

const NESTED: &str = r#"
id: nested
nodes:
  - kind: Start
    id: start
  - kind: SubProcess
    id: sub
  - kind: Start
    id: sub_start
    scope: sub
  - kind: ServiceTask
    id: inner
    scope: sub
    task_type: inner
  - kind: End
    id: sub_end
    scope: sub
  - kind: End
    id: end
edges:
  - from: start
    to: sub
  - from: sub
    to: end
  - from: sub_start
    to: inner
  - from: inner
    to: sub_end
"#;

const WAIT_FOR_PAYMENT: &str = r#"
id: payment
nodes:
  - kind: Start
    id: start
  - kind: IntermediateCatch
    id: paid
    message:
      name: paid
      correlation_key: "=orderId"
  - kind: End
    id: end
edges:
  - from: start
    to: paid
  - from: paid
    to: end
"#;

// ── Service tasks and variables ──────────────────────────────────────────

#[test]
fn test_job_variables_flow_to_the_next_task() {
    let mut h = RecordingHarness::new();
    h.deploy(TWO_TASKS);
    let pik = h
        .engine
        .create_process_instance("two_tasks", vars(json!({"orderId": "o-1"})))
        .unwrap();

    let (reserve, variables) = h.only_job("reserve");
    assert_eq!(variables.get("orderId"), Some(&json!("o-1")));
    h.engine.complete_job(reserve, vars(json!({"reserved": true}))).unwrap();

    let (ship, variables) = h.only_job("ship");
    assert_eq!(variables.get("reserved"), Some(&json!(true)));
    h.engine.complete_job(ship, Document::new()).unwrap();

    use ProcessInstanceIntent::*;
    assert_eq!(
        h.lifecycle("two_tasks"),
        vec![ElementActivating, ElementActivated, ElementCompleting, ElementCompleted]
    );
    assert!(!h.engine.state().element_instances.contains(pik));
    h.assert_drained();
}

#[test]
fn test_completing_an_unknown_job_is_rejected() {
    let mut h = RecordingHarness::new();
    let err = h.engine.complete_job(404, Document::new()).unwrap_err();
    let EngineError::Rejected { position, .. } = err else {
        panic!("expected a rejection, got {err:?}");
    };
    let rejection = h.engine.log().rejection_for(position).unwrap();
    assert_eq!(rejection.key, 404);
}

#[test]
fn test_local_write_shadows_outer_variable() {
    let mut h = RecordingHarness::new();
    h.deploy(NESTED);
    let pik = h
        .engine
        .create_process_instance("nested", vars(json!({"x": "outer"})))
        .unwrap();
    let sub = h.element_key("sub");
    let inner = h.element_key("inner");

    h.engine.set_variables(sub, vars(json!({"x": "inner"})), true).unwrap();
    assert_eq!(h.engine.variables(inner).get("x"), Some(&json!("inner")));
    assert_eq!(h.engine.variables(pik).get("x"), Some(&json!("outer")));

    // propagation stops at the nearest declaring scope
    h.engine.set_variables(inner, vars(json!({"x": "changed"})), false).unwrap();
    assert_eq!(h.engine.variables(sub).get("x"), Some(&json!("changed")));
    assert_eq!(h.engine.variables(pik).get("x"), Some(&json!("outer")));

    let (job, _) = h.only_job("inner");
    h.engine.complete_job(job, Document::new()).unwrap();
    h.assert_drained();
}

#[test]
fn test_unchanged_variable_write_appends_nothing() {
    let mut h = RecordingHarness::new();
    h.deploy(NESTED);
    let pik = h
        .engine
        .create_process_instance("nested", vars(json!({"x": 1})))
        .unwrap();
    let updates = h.events(Intent::Variable(VariableIntent::Updated)).len();
    h.engine.set_variables(pik, vars(json!({"x": 1})), false).unwrap();
    assert_eq!(h.events(Intent::Variable(VariableIntent::Updated)).len(), updates);
    h.engine.set_variables(pik, vars(json!({"x": 2})), false).unwrap();
    assert_eq!(h.events(Intent::Variable(VariableIntent::Updated)).len(), updates + 1);
}

// ── Message start events ─────────────────────────────────────────────────

#[test]
fn test_correlation_key_lock_starts_buffered_messages_in_key_order() {
    let mut h = RecordingHarness::new();
    h.deploy(MESSAGE_START);

    let first = h
        .engine
        .publish_message("order", "c-1", vars(json!({"seq": 1})), None, None)
        .unwrap();
    let second = h
        .engine
        .publish_message("order", "c-1", vars(json!({"seq": 2})), None, None)
        .unwrap();
    h.engine
        .publish_message("order", "c-1", vars(json!({"seq": 3})), None, None)
        .unwrap();
    assert!(first < second);

    // one instance holds the lock for c-1
    assert_eq!(h.count("order_flow", ProcessInstanceIntent::ElementActivated), 1);
    let (job, variables) = h.only_job("handle");
    assert_eq!(variables.get("seq"), Some(&json!(1)));

    h.engine.complete_job(job, Document::new()).unwrap();
    let (job, variables) = h.only_job("handle");
    assert_eq!(variables.get("seq"), Some(&json!(2)));

    h.engine.complete_job(job, Document::new()).unwrap();
    let (job, variables) = h.only_job("handle");
    assert_eq!(variables.get("seq"), Some(&json!(3)));

    h.engine.complete_job(job, Document::new()).unwrap();
    assert_eq!(h.count("order_flow", ProcessInstanceIntent::ElementCompleted), 3);
    h.assert_drained();
}

#[test]
fn test_lowest_message_key_wins_across_start_events() {
    let mut h = RecordingHarness::new();
    h.deploy(TWO_STARTS);

    h.engine
        .publish_message("order", "c-1", vars(json!({"seq": 1})), None, None)
        .unwrap();
    let rush = h
        .engine
        .publish_message("rush", "c-1", vars(json!({"seq": 2})), None, None)
        .unwrap();
    let order = h
        .engine
        .publish_message("order", "c-1", vars(json!({"seq": 3})), None, None)
        .unwrap();
    assert!(rush < order);
    assert_eq!(h.count("intake", ProcessInstanceIntent::ElementActivated), 1);

    let (job, variables) = h.only_job("handle");
    assert_eq!(variables.get("seq"), Some(&json!(1)));
    h.engine.complete_job(job, Document::new()).unwrap();

    // the rush message is older than the second order message
    let (job, variables) = h.only_job("handle");
    assert_eq!(variables.get("seq"), Some(&json!(2)));
    assert_eq!(h.count("rush_received", ProcessInstanceIntent::ElementCompleted), 1);
    h.engine.complete_job(job, Document::new()).unwrap();

    let (job, variables) = h.only_job("handle");
    assert_eq!(variables.get("seq"), Some(&json!(3)));
    h.engine.complete_job(job, Document::new()).unwrap();
    assert_eq!(h.count("intake", ProcessInstanceIntent::ElementCompleted), 3);
    h.assert_drained();
}

#[test]
fn test_other_correlation_key_is_not_blocked() {
    let mut h = RecordingHarness::new();
    h.deploy(MESSAGE_START);
    h.engine
        .publish_message("order", "c-1", Document::new(), None, None)
        .unwrap();
    h.engine
        .publish_message("order", "c-2", Document::new(), None, None)
        .unwrap();
    assert_eq!(h.count("order_flow", ProcessInstanceIntent::ElementActivated), 2);
}

#[test]
fn test_empty_correlation_key_never_locks() {
    let mut h = RecordingHarness::new();
    h.deploy(MESSAGE_START);
    h.engine.publish_message("order", "", Document::new(), None, None).unwrap();
    h.engine.publish_message("order", "", Document::new(), None, None).unwrap();
    assert_eq!(h.count("order_flow", ProcessInstanceIntent::ElementActivated), 2);
}

#[test]
fn test_duplicate_message_id_is_rejected() {
    let mut h = RecordingHarness::new();
    h.engine
        .publish_message("paid", "o-1", Document::new(), None, Some("m-1".into()))
        .unwrap();
    let err = h
        .engine
        .publish_message("paid", "o-1", Document::new(), None, Some("m-1".into()))
        .unwrap_err();
    assert!(matches!(err, EngineError::Rejected { .. }));
}

// ── Buffered messages ────────────────────────────────────────────────────

#[test]
fn test_buffered_message_correlates_when_subscription_opens() {
    let mut h = RecordingHarness::new();
    h.deploy(WAIT_FOR_PAYMENT);
    h.engine
        .publish_message("paid", "o-7", vars(json!({"amount": 30})), Some(60_000), None)
        .unwrap();
    h.engine
        .create_process_instance("payment", vars(json!({"orderId": "o-7"})))
        .unwrap();

    assert_eq!(h.count("end", ProcessInstanceIntent::ElementCompleted), 1);
    assert_eq!(
        h.events(Intent::MessageSubscription(MessageSubscriptionIntent::Correlated)).len(),
        1,
    );
    h.assert_drained();
}

#[test]
fn test_message_without_ttl_is_not_buffered() {
    let mut h = RecordingHarness::new();
    h.deploy(WAIT_FOR_PAYMENT);
    h.engine
        .publish_message("paid", "o-8", Document::new(), Some(0), None)
        .unwrap();
    h.engine
        .create_process_instance("payment", vars(json!({"orderId": "o-8"})))
        .unwrap();
    assert_eq!(h.count("paid", ProcessInstanceIntent::ElementActivated), 1);
    assert_eq!(h.count("end", ProcessInstanceIntent::ElementCompleted), 0);
    assert!(h.engine.state().messages.is_empty());
}

#[test]
fn test_expired_message_no_longer_correlates() {
    let mut h = RecordingHarness::new();
    h.deploy(WAIT_FOR_PAYMENT);
    h.engine
        .publish_message("paid", "o-9", Document::new(), Some(1_000), None)
        .unwrap();
    h.engine.set_time(5_000);
    assert_eq!(h.engine.expire_messages().unwrap(), 1);
    h.engine
        .create_process_instance("payment", vars(json!({"orderId": "o-9"})))
        .unwrap();
    assert_eq!(h.count("end", ProcessInstanceIntent::ElementCompleted), 0);
}

// ── Incidents ────────────────────────────────────────────────────────────

#[test]
fn test_condition_incident_resolves_after_variable_fix() {
    let mut h = RecordingHarness::new();
    h.deploy(ROUTING);
    let pik = h
        .engine
        .create_process_instance("routing", vars(json!({"amount": 50})))
        .unwrap();

    let created = h.events(Intent::Incident(IncidentIntent::Created));
    assert_eq!(created.len(), 1);
    let incident_key = created[0].key;
    let RecordValue::Incident(incident) = &created[0].value else {
        panic!("expected an incident record");
    };
    assert_eq!(incident.error_type, ErrorType::ConditionError);
    assert_eq!(incident.element_id, "route");

    h.engine.set_variables(pik, vars(json!({"amount": 500})), false).unwrap();
    h.engine.resolve_incident(incident_key).unwrap();
    assert_eq!(h.count("big", ProcessInstanceIntent::ElementCompleted), 1);
    assert_eq!(h.count("huge", ProcessInstanceIntent::ElementCompleted), 0);
    assert_eq!(h.count("route", ProcessInstanceIntent::ElementActivating), 1);
    h.assert_drained();

    // the incident is gone, a second resolve has nothing to act on
    assert!(matches!(
        h.engine.resolve_incident(incident_key),
        Err(EngineError::Rejected { .. })
    ));
}

#[test]
fn test_default_flow_is_taken_when_no_condition_holds() {
    let mut h = RecordingHarness::new();
    h.deploy(ROUTING_WITH_DEFAULT);
    h.engine
        .create_process_instance("routing_default", vars(json!({"amount": 5})))
        .unwrap();
    assert_eq!(h.count("small", ProcessInstanceIntent::ElementCompleted), 1);
    assert!(h.events(Intent::Incident(IncidentIntent::Created)).is_empty());
    h.assert_drained();
}

#[test]
fn test_missing_variable_raises_extract_value_incident() {
    let mut h = RecordingHarness::new();
    h.deploy(ROUTING_WITH_DEFAULT);
    h.engine
        .create_process_instance("routing_default", Document::new())
        .unwrap();
    let created = h.events(Intent::Incident(IncidentIntent::Created));
    let RecordValue::Incident(incident) = &created[0].value else {
        panic!("expected an incident record");
    };
    assert_eq!(incident.error_type, ErrorType::ExtractValueError);
}

#[test]
fn test_job_without_retries_raises_incident_until_retries_are_added() {
    let mut h = RecordingHarness::new();
    h.deploy(TWO_TASKS);
    h.engine.create_process_instance("two_tasks", Document::new()).unwrap();

    let (job, _) = h.only_job("reserve");
    h.engine.fail_job(job, 0, "warehouse offline").unwrap();
    let created = h.events(Intent::Incident(IncidentIntent::Created));
    assert_eq!(created.len(), 1);
    let incident_key = created[0].key;

    assert!(matches!(
        h.engine.resolve_incident(incident_key),
        Err(EngineError::Rejected { .. })
    ));
    assert!(h.engine.activate_jobs("reserve", "worker", 10).unwrap().is_empty());

    h.engine.update_job_retries(job, 1).unwrap();
    h.engine.resolve_incident(incident_key).unwrap();
    let (again, _) = h.only_job("reserve");
    assert_eq!(again, job);
}

#[test]
fn test_failed_job_with_retries_is_activatable_again() {
    let mut h = RecordingHarness::new();
    h.deploy(TWO_TASKS);
    h.engine.create_process_instance("two_tasks", Document::new()).unwrap();
    let (job, _) = h.only_job("reserve");
    h.engine.fail_job(job, 2, "try again").unwrap();
    assert!(h.events(Intent::Incident(IncidentIntent::Created)).is_empty());
    let (again, _) = h.only_job("reserve");
    assert_eq!(again, job);
}

#[test]
fn test_activated_job_times_out_after_deadline() {
    let mut h = RecordingHarness::with_config(EngineConfig {
        job_timeout_ms: 1_000,
        ..EngineConfig::default()
    });
    h.deploy(TWO_TASKS);
    h.engine.create_process_instance("two_tasks", Document::new()).unwrap();
    let (job, _) = h.only_job("reserve");

    h.engine.set_time(500);
    assert_eq!(h.engine.time_out_jobs().unwrap(), 0);
    h.engine.set_time(1_001);
    assert_eq!(h.engine.time_out_jobs().unwrap(), 1);
    let (again, _) = h.only_job("reserve");
    assert_eq!(again, job);
}

// ── Boundary events ──────────────────────────────────────────────────────

#[test]
fn test_interrupting_timer_boundary_cancels_the_job() {
    let mut h = RecordingHarness::new();
    h.deploy(GUARDED_TASK);
    h.engine
        .create_process_instance("guarded", vars(json!({"orderId": "o-1"})))
        .unwrap();
    h.only_job("work");

    h.engine.set_time(5_000);
    assert_eq!(h.engine.trigger_due_timers().unwrap(), 1);

    assert_eq!(h.events(Intent::Job(JobIntent::Canceled)).len(), 1);
    assert_eq!(h.count("work", ProcessInstanceIntent::ElementTerminated), 1);
    assert_eq!(h.count("timed_out", ProcessInstanceIntent::ElementCompleted), 1);
    assert_eq!(h.count("done", ProcessInstanceIntent::ElementCompleted), 0);
    h.assert_drained();
}

#[test]
fn test_non_interrupting_message_boundary_keeps_the_task() {
    let mut h = RecordingHarness::new();
    h.deploy(GUARDED_TASK);
    h.engine
        .create_process_instance("guarded", vars(json!({"orderId": "o-2"})))
        .unwrap();
    h.engine
        .publish_message("remind", "o-2", Document::new(), Some(0), None)
        .unwrap();

    let (nudge, _) = h.only_job("nudge");
    let (work, _) = h.only_job("work");
    assert_eq!(h.count("work", ProcessInstanceIntent::ElementTerminated), 0);

    h.engine.complete_job(nudge, Document::new()).unwrap();
    assert_eq!(h.count("guarded", ProcessInstanceIntent::ElementCompleted), 0);
    h.engine.complete_job(work, Document::new()).unwrap();
    assert_eq!(h.count("guarded", ProcessInstanceIntent::ElementCompleted), 1);
    // the boundary timer was canceled with the task
    assert_eq!(h.events(Intent::Timer(TimerIntent::Canceled)).len(), 1);
    h.assert_drained();
}

#[test]
fn test_interrupting_message_boundary_delivers_its_variables() {
    let mut h = RecordingHarness::new();
    h.deploy(STOPPABLE);
    h.engine
        .create_process_instance("stoppable", vars(json!({"orderId": "o-1"})))
        .unwrap();
    h.only_job("work");

    h.engine
        .publish_message("stop", "o-1", vars(json!({"reason": "late"})), Some(0), None)
        .unwrap();
    assert_eq!(h.count("work", ProcessInstanceIntent::ElementTerminated), 1);
    assert_eq!(h.count("stop", ProcessInstanceIntent::ElementCompleted), 1);

    let (after, variables) = h.only_job("after");
    assert_eq!(variables.get("reason"), Some(&json!("late")));
    assert_eq!(variables.get("orderId"), Some(&json!("o-1")));

    h.engine.complete_job(after, Document::new()).unwrap();
    assert_eq!(h.count("stoppable", ProcessInstanceIntent::ElementCompleted), 1);
    h.assert_drained();
}

// ── Event sub-processes ──────────────────────────────────────────────────

#[test]
fn test_interrupting_event_sub_process_replaces_the_main_flow() {
    let mut h = RecordingHarness::new();
    h.deploy(CANCELABLE);
    h.engine
        .create_process_instance("cancelable", vars(json!({"orderId": "o-3"})))
        .unwrap();
    h.only_job("work");

    h.engine
        .publish_message("cancel", "o-3", vars(json!({"reason": "customer"})), Some(0), None)
        .unwrap();
    assert_eq!(h.count("work", ProcessInstanceIntent::ElementTerminated), 1);
    assert_eq!(h.count("on_cancel", ProcessInstanceIntent::ElementActivated), 1);

    let (refund, variables) = h.only_job("refund");
    assert_eq!(variables.get("reason"), Some(&json!("customer")));

    // a second trigger is refused while the scope is interrupted
    h.engine
        .publish_message("cancel", "o-3", Document::new(), Some(0), None)
        .unwrap();
    assert_eq!(h.count("on_cancel", ProcessInstanceIntent::ElementActivating), 1);

    h.engine.complete_job(refund, Document::new()).unwrap();
    assert_eq!(h.count("cancelable", ProcessInstanceIntent::ElementCompleted), 1);
    assert_eq!(h.count("end", ProcessInstanceIntent::ElementCompleted), 0);
    h.assert_drained();
}

// ── Gateways ─────────────────────────────────────────────────────────────

#[test]
fn test_parallel_join_waits_for_every_branch() {
    let mut h = RecordingHarness::new();
    h.deploy(FORK_JOIN);
    h.engine.create_process_instance("fork_join", Document::new()).unwrap();

    for (job_type, joined) in [("b", false), ("a", false), ("c", true)] {
        let (job, _) = h.only_job(job_type);
        h.engine.complete_job(job, Document::new()).unwrap();
        assert_eq!(h.count("join", ProcessInstanceIntent::ElementCompleted) == 1, joined);
    }
    assert_eq!(h.count("end", ProcessInstanceIntent::ElementCompleted), 1);
    assert_eq!(h.count("fork_join", ProcessInstanceIntent::ElementCompleted), 1);
    h.assert_drained();
}

#[test]
fn test_event_based_gateway_takes_the_first_event() {
    let mut h = RecordingHarness::new();
    h.deploy(RACE);
    h.engine
        .create_process_instance("race", vars(json!({"requestId": "r-1"})))
        .unwrap();
    assert_eq!(h.engine.next_timer_due_date(), Some(60_000));

    h.engine
        .publish_message("approved", "r-1", vars(json!({"approver": "ann"})), Some(0), None)
        .unwrap();
    assert_eq!(h.count("approved_end", ProcessInstanceIntent::ElementCompleted), 1);
    assert_eq!(h.count("expired", ProcessInstanceIntent::ElementActivating), 0);

    let approver: Vec<_> = h
        .events(Intent::Variable(VariableIntent::Created))
        .into_iter()
        .filter_map(|record| match &record.value {
            RecordValue::Variable(variable) if variable.name == "approver" => Some(variable),
            _ => None,
        })
        .collect();
    assert_eq!(approver.len(), 1);
    assert_eq!(approver[0].value, json!("ann"));
    assert_eq!(h.events(Intent::Timer(TimerIntent::Canceled)).len(), 1);

    h.engine.set_time(120_000);
    assert_eq!(h.engine.trigger_due_timers().unwrap(), 0);
    h.assert_drained();
}

#[test]
fn test_event_based_gateway_timer_wins_without_message() {
    let mut h = RecordingHarness::new();
    h.deploy(RACE);
    h.engine
        .create_process_instance("race", vars(json!({"requestId": "r-2"})))
        .unwrap();
    h.engine.set_time(60_000);
    assert_eq!(h.engine.trigger_due_timers().unwrap(), 1);
    assert_eq!(h.count("expired_end", ProcessInstanceIntent::ElementCompleted), 1);
    assert_eq!(
        h.events(Intent::MessageSubscription(MessageSubscriptionIntent::Deleted)).len(),
        1
    );
    h.assert_drained();
}

// ── Call activities ──────────────────────────────────────────────────────

#[test]
fn test_call_activity_passes_variables_both_ways() {
    let mut h = RecordingHarness::new();
    h.deploy(CHILD);
    h.deploy(PARENT);
    h.engine
        .create_process_instance("parent", vars(json!({"x": 1})))
        .unwrap();

    let (child_job, variables) = h.only_job("child_work");
    assert_eq!(variables.get("x"), Some(&json!(1)));
    h.engine.complete_job(child_job, vars(json!({"y": 2}))).unwrap();

    assert_eq!(h.count("child", ProcessInstanceIntent::ElementCompleted), 1);
    let (after, variables) = h.only_job("after");
    assert_eq!(variables.get("y"), Some(&json!(2)));
    h.engine.complete_job(after, Document::new()).unwrap();
    h.assert_drained();
}

#[test]
fn test_missing_called_process_raises_incident() {
    let mut h = RecordingHarness::new();
    h.deploy(PARENT);
    h.engine.create_process_instance("parent", Document::new()).unwrap();
    let created = h.events(Intent::Incident(IncidentIntent::Created));
    let RecordValue::Incident(incident) = &created[0].value else {
        panic!("expected an incident record");
    };
    assert_eq!(incident.error_type, ErrorType::CalledElementError);
    let incident_key = created[0].key;

    h.deploy(CHILD);
    h.engine.resolve_incident(incident_key).unwrap();
    assert_eq!(h.count("child", ProcessInstanceIntent::ElementActivated), 1);
}

#[test]
fn test_canceling_parent_terminates_called_instance() {
    let mut h = RecordingHarness::new();
    h.deploy(CHILD);
    h.deploy(PARENT);
    let pik = h.engine.create_process_instance("parent", Document::new()).unwrap();
    h.engine.cancel_process_instance(pik).unwrap();

    assert_eq!(h.count("child", ProcessInstanceIntent::ElementTerminated), 1);
    assert_eq!(h.count("call_child", ProcessInstanceIntent::ElementTerminated), 1);
    assert_eq!(h.count("parent", ProcessInstanceIntent::ElementTerminated), 1);
    h.assert_drained();
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[test]
fn test_cancellation_terminates_children_in_batches() {
    let mut h = RecordingHarness::with_config(EngineConfig {
        max_commands_in_batch: 1,
        ..EngineConfig::default()
    });
    h.deploy(FORK_JOIN);
    let pik = h.engine.create_process_instance("fork_join", Document::new()).unwrap();
    h.engine.cancel_process_instance(pik).unwrap();

    let batches = h.events(Intent::ProcessInstanceBatch(ProcessInstanceBatchIntent::Terminated));
    assert_eq!(batches.len(), 3);
    assert_eq!(h.events(Intent::Job(JobIntent::Canceled)).len(), 3);
    assert_eq!(h.count("fork_join", ProcessInstanceIntent::ElementTerminated), 1);
    h.assert_drained();

    assert!(matches!(
        h.engine.cancel_process_instance(pik),
        Err(EngineError::ProcessInstanceNotFound(_))
    ));
}
