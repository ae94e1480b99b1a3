//! Partition runner: owns an [`Engine`] inside a tokio task.
//!
//! Callers talk to the partition through a cloneable [`PartitionHandle`]. Requests
//! are queued on an mpsc channel and answered on a oneshot, so the engine itself
//! stays single threaded.

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::records::{JobRecord, Record};
use crate::state::DeployedProcess;
use crate::types::{Document, Key, Timestamp};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const REQUEST_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<EngineResult<T>>;

/// Work scheduled by a clock tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub timers_triggered: usize,
    pub messages_expired: usize,
    pub jobs_timed_out: usize,
}

pub enum PartitionRequest {
    Deploy {
        yaml: String,
        reply: Reply<DeployedProcess>,
    },
    CreateInstance {
        bpmn_process_id: String,
        variables: Document,
        reply: Reply<Key>,
    },
    CancelInstance {
        process_instance_key: Key,
        reply: Reply<()>,
    },
    ActivateJobs {
        job_type: String,
        worker: String,
        max_jobs: usize,
        reply: Reply<Vec<(Key, JobRecord)>>,
    },
    CompleteJob {
        job_key: Key,
        variables: Document,
        reply: Reply<()>,
    },
    FailJob {
        job_key: Key,
        retries: u32,
        error_message: String,
        reply: Reply<()>,
    },
    PublishMessage {
        name: String,
        correlation_key: String,
        variables: Document,
        time_to_live_ms: Option<i64>,
        message_id: Option<String>,
        reply: Reply<Key>,
    },
    ResolveIncident {
        incident_key: Key,
        reply: Reply<()>,
    },
    SetVariables {
        scope_key: Key,
        variables: Document,
        local: bool,
        reply: Reply<()>,
    },
    /// Move the partition clock to `now` and run everything that became due.
    Tick {
        now: Timestamp,
        reply: Reply<TickReport>,
    },
    /// Committed records from `from_position` (inclusive) on.
    Records {
        from_position: u64,
        reply: oneshot::Sender<Vec<Record>>,
    },
}

pub struct PartitionRunner {
    engine: Engine,
    requests: mpsc::Receiver<PartitionRequest>,
}

impl PartitionRunner {
    /// Spawn the partition task. It stops once every handle is dropped.
    pub fn spawn(engine: Engine) -> (PartitionHandle, JoinHandle<Engine>) {
        let partition_id = engine.config().partition_id;
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let runner = PartitionRunner { engine, requests: rx };
        let join = tokio::spawn(runner.run());
        (PartitionHandle { tx, partition_id }, join)
    }

    async fn run(mut self) -> Engine {
        let partition_id = self.engine.config().partition_id;
        info!(partition_id, "Partition started");
        while let Some(request) = self.requests.recv().await {
            self.handle(request);
        }
        info!(partition_id, "Partition stopped (all handles dropped)");
        self.engine
    }

    fn handle(&mut self, request: PartitionRequest) {
        let engine = &mut self.engine;
        // A dropped reply receiver only means the caller stopped waiting.
        match request {
            PartitionRequest::Deploy { yaml, reply } => {
                let _ = reply.send(engine.deploy_yaml(&yaml));
            }
            PartitionRequest::CreateInstance {
                bpmn_process_id,
                variables,
                reply,
            } => {
                let _ = reply.send(engine.create_process_instance(&bpmn_process_id, variables));
            }
            PartitionRequest::CancelInstance {
                process_instance_key,
                reply,
            } => {
                let _ = reply.send(engine.cancel_process_instance(process_instance_key));
            }
            PartitionRequest::ActivateJobs {
                job_type,
                worker,
                max_jobs,
                reply,
            } => {
                let _ = reply.send(engine.activate_jobs(&job_type, &worker, max_jobs));
            }
            PartitionRequest::CompleteJob {
                job_key,
                variables,
                reply,
            } => {
                let _ = reply.send(engine.complete_job(job_key, variables));
            }
            PartitionRequest::FailJob {
                job_key,
                retries,
                error_message,
                reply,
            } => {
                let _ = reply.send(engine.fail_job(job_key, retries, &error_message));
            }
            PartitionRequest::PublishMessage {
                name,
                correlation_key,
                variables,
                time_to_live_ms,
                message_id,
                reply,
            } => {
                let _ = reply.send(engine.publish_message(
                    &name,
                    &correlation_key,
                    variables,
                    time_to_live_ms,
                    message_id,
                ));
            }
            PartitionRequest::ResolveIncident { incident_key, reply } => {
                let _ = reply.send(engine.resolve_incident(incident_key));
            }
            PartitionRequest::SetVariables {
                scope_key,
                variables,
                local,
                reply,
            } => {
                let _ = reply.send(engine.set_variables(scope_key, variables, local));
            }
            PartitionRequest::Tick { now, reply } => {
                let _ = reply.send(tick(engine, now));
            }
            PartitionRequest::Records { from_position, reply } => {
                let start = from_position.saturating_sub(1) as usize;
                let records = engine.log().records().get(start..).unwrap_or_default().to_vec();
                let _ = reply.send(records);
            }
        }
    }
}

fn tick(engine: &mut Engine, now: Timestamp) -> EngineResult<TickReport> {
    if now > engine.now() {
        engine.set_time(now);
    }
    let report = TickReport {
        timers_triggered: engine.trigger_due_timers()?,
        messages_expired: engine.expire_messages()?,
        jobs_timed_out: engine.time_out_jobs()?,
    };
    if report != TickReport::default() {
        debug!(now = engine.now(), ?report, "Tick");
    }
    Ok(report)
}

/// Cloneable client of a running partition.
#[derive(Clone)]
pub struct PartitionHandle {
    tx: mpsc::Sender<PartitionRequest>,
    partition_id: u16,
}

impl PartitionHandle {
    pub fn partition_id(&self) -> u16 {
        self.partition_id
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> PartitionRequest) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| EngineError::PartitionClosed(self.partition_id))?;
        rx.await.map_err(|_| EngineError::PartitionClosed(self.partition_id))?
    }

    pub async fn deploy(&self, yaml: &str) -> EngineResult<DeployedProcess> {
        let yaml = yaml.to_string();
        self.call(|reply| PartitionRequest::Deploy { yaml, reply }).await
    }

    pub async fn create_process_instance(
        &self,
        bpmn_process_id: &str,
        variables: Document,
    ) -> EngineResult<Key> {
        let bpmn_process_id = bpmn_process_id.to_string();
        self.call(|reply| PartitionRequest::CreateInstance {
            bpmn_process_id,
            variables,
            reply,
        })
        .await
    }

    pub async fn cancel_process_instance(&self, process_instance_key: Key) -> EngineResult<()> {
        self.call(|reply| PartitionRequest::CancelInstance {
            process_instance_key,
            reply,
        })
        .await
    }

    pub async fn activate_jobs(
        &self,
        job_type: &str,
        worker: &str,
        max_jobs: usize,
    ) -> EngineResult<Vec<(Key, JobRecord)>> {
        let (job_type, worker) = (job_type.to_string(), worker.to_string());
        self.call(|reply| PartitionRequest::ActivateJobs {
            job_type,
            worker,
            max_jobs,
            reply,
        })
        .await
    }

    pub async fn complete_job(&self, job_key: Key, variables: Document) -> EngineResult<()> {
        self.call(|reply| PartitionRequest::CompleteJob {
            job_key,
            variables,
            reply,
        })
        .await
    }

    pub async fn fail_job(
        &self,
        job_key: Key,
        retries: u32,
        error_message: &str,
    ) -> EngineResult<()> {
        let error_message = error_message.to_string();
        self.call(|reply| PartitionRequest::FailJob {
            job_key,
            retries,
            error_message,
            reply,
        })
        .await
    }

    pub async fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
        variables: Document,
        time_to_live_ms: Option<i64>,
    ) -> EngineResult<Key> {
        let (name, correlation_key) = (name.to_string(), correlation_key.to_string());
        self.call(|reply| PartitionRequest::PublishMessage {
            name,
            correlation_key,
            variables,
            time_to_live_ms,
            message_id: None,
            reply,
        })
        .await
    }

    pub async fn resolve_incident(&self, incident_key: Key) -> EngineResult<()> {
        self.call(|reply| PartitionRequest::ResolveIncident { incident_key, reply })
            .await
    }

    pub async fn set_variables(
        &self,
        scope_key: Key,
        variables: Document,
        local: bool,
    ) -> EngineResult<()> {
        self.call(|reply| PartitionRequest::SetVariables {
            scope_key,
            variables,
            local,
            reply,
        })
        .await
    }

    pub async fn tick(&self, now: Timestamp) -> EngineResult<TickReport> {
        self.call(|reply| PartitionRequest::Tick { now, reply }).await
    }

    pub async fn records(&self, from_position: u64) -> EngineResult<Vec<Record>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PartitionRequest::Records { from_position, reply })
            .await
            .map_err(|_| EngineError::PartitionClosed(self.partition_id))?;
        rx.await.map_err(|_| EngineError::PartitionClosed(self.partition_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{Intent, TimerIntent};

    const TIMER_FLOW: &str = r#"
id: wait
nodes:
  - kind: Start
    id: start
  - kind: IntermediateCatch
    id: pause
    timer: PT10S
  - kind: End
    id: end
edges:
  - from: start
    to: pause
  - from: pause
    to: end
"#;

    #[tokio::test]
    async fn test_tick_triggers_due_timer() {
        let (handle, join) = PartitionRunner::spawn(Engine::new(EngineConfig::default()));
        handle.deploy(TIMER_FLOW).await.unwrap();
        handle.create_process_instance("wait", Document::new()).await.unwrap();

        let early = handle.tick(5_000).await.unwrap();
        assert_eq!(early.timers_triggered, 0);
        let due = handle.tick(10_000).await.unwrap();
        assert_eq!(due.timers_triggered, 1);

        let records = handle.records(1).await.unwrap();
        assert!(records
            .iter()
            .any(|record| record.intent == Intent::Timer(TimerIntent::Triggered)));

        drop(handle);
        let engine = join.await.unwrap();
        assert!(engine.state().is_drained());
    }

    #[tokio::test]
    async fn test_rejection_travels_back_to_caller() {
        let (handle, _join) = PartitionRunner::spawn(Engine::new(EngineConfig::default()));
        let err = handle.complete_job(42, Document::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_closed_partition_reports_error() {
        let (handle, join) = PartitionRunner::spawn(Engine::new(EngineConfig::default()));
        join.abort();
        let _ = join.await;
        let err = handle.tick(1).await.unwrap_err();
        assert!(matches!(err, EngineError::PartitionClosed(1)));
    }
}
