//! BPMN engine runner
//!
//! Starts one partition, deploys a process definition and drives a single
//! instance to the end with an in-process job worker. Committed records are
//! printed as JSON lines.
//!
//! Usage: `bpmn-engine-runner [config.yaml] [process.yaml]`

use anyhow::{bail, Context, Result};
use bpmn_engine_core::records::Record;
use bpmn_engine_core::types::{Document, Key};
use bpmn_engine_core::{Engine, EngineConfig, PartitionHandle, PartitionRunner};
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Config path used when none is given on the command line.
const CONFIG_ENV: &str = "BPMN_ENGINE_CONFIG";

/// Upper bound on worker rounds before the scenario gives up.
const MAX_ROUNDS: usize = 100;

/// Pause between rounds in which no job was ready.
const IDLE_WAIT: Duration = Duration::from_millis(200);

const DEMO_PROCESS: &str = r#"
id: fulfilment
nodes:
  - kind: Start
    id: order_placed
  - kind: ServiceTask
    id: reserve_stock
    task_type: reserve-stock
  - kind: ExclusiveGateway
    id: in_stock
    default: in_stock_to_backorder
  - kind: ServiceTask
    id: ship
    task_type: ship
  - kind: ServiceTask
    id: backorder
    task_type: backorder
  - kind: End
    id: shipped
  - kind: End
    id: backordered
edges:
  - from: order_placed
    to: reserve_stock
  - from: reserve_stock
    to: in_stock
  - from: in_stock
    to: ship
    condition: "=reserved == true"
  - from: in_stock
    to: backorder
  - from: ship
    to: shipped
  - from: backorder
    to: backordered
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().or_else(|| std::env::var(CONFIG_ENV).ok());
    let process_path = args.next();

    let config = match &config_path {
        Some(path) => EngineConfig::load_from_file(Path::new(path))?,
        None => EngineConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let process_yaml = match &process_path {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Reading {path}"))?,
        None => DEMO_PROCESS.to_string(),
    };

    tracing::info!(
        partition_id = config.partition_id,
        config = config_path.as_deref().unwrap_or("<default>"),
        "Starting partition"
    );
    let (handle, join) = PartitionRunner::spawn(Engine::new(config));

    let records = run_scenario(&handle, &process_yaml).await?;
    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }

    drop(handle);
    let engine = join.await.context("Partition task failed")?;
    tracing::info!(
        records = engine.log().len(),
        drained = engine.state().is_drained(),
        "Partition stopped"
    );
    Ok(())
}

/// Deploy, start one instance and complete every job it creates until it ends.
async fn run_scenario(handle: &PartitionHandle, process_yaml: &str) -> Result<Vec<Record>> {
    let process = handle.deploy(process_yaml).await?;
    tracing::info!(
        bpmn_process_id = %process.bpmn_process_id,
        version = process.version,
        "Deployed"
    );

    let variables = document(json!({"orderId": "order-1", "startedAt": Utc::now().to_rfc3339()}));
    let process_instance_key = handle
        .create_process_instance(&process.bpmn_process_id, variables)
        .await?;
    tracing::info!(process_instance_key, "Instance created");

    let job_types = job_types(process_yaml)?;
    for _ in 0..MAX_ROUNDS {
        handle.tick(Utc::now().timestamp_millis()).await?;
        let completed = work_once(handle, &job_types).await?;
        if completed == 0 {
            if instance_ended(handle, process_instance_key).await? {
                return Ok(handle.records(1).await?);
            }
            tokio::time::sleep(IDLE_WAIT).await;
        }
    }
    bail!("instance {process_instance_key} did not finish within {MAX_ROUNDS} rounds")
}

/// Complete one round of jobs. `reserve-stock` reports stock as reserved.
async fn work_once(handle: &PartitionHandle, job_types: &[String]) -> Result<usize> {
    let mut completed = 0;
    for job_type in job_types {
        for (job_key, job) in handle.activate_jobs(job_type, "runner", 10).await? {
            tracing::info!(
                job_key,
                job_type = %job.job_type,
                element_id = %job.element_id,
                "Working",
            );
            let result = match job_type.as_str() {
                "reserve-stock" => document(json!({"reserved": true})),
                _ => Document::new(),
            };
            handle.complete_job(job_key, result).await?;
            completed += 1;
        }
    }
    Ok(completed)
}

async fn instance_ended(handle: &PartitionHandle, process_instance_key: Key) -> Result<bool> {
    use bpmn_engine_core::types::{Intent, ProcessInstanceIntent, RecordType};
    let records = handle.records(1).await?;
    Ok(records.iter().any(|record| {
        record.key == process_instance_key
            && record.record_type == RecordType::Event
            && matches!(
                record.intent,
                Intent::ProcessInstance(
                    ProcessInstanceIntent::ElementCompleted
                        | ProcessInstanceIntent::ElementTerminated
                )
            )
    }))
}

/// Job types of every service task in the definition.
fn job_types(process_yaml: &str) -> Result<Vec<String>> {
    let dto = bpmn_engine_core::model::parse_process_yaml(process_yaml)?;
    let mut types: Vec<String> = dto
        .nodes
        .iter()
        .filter_map(|node| match node {
            bpmn_engine_core::model::dto::NodeDto::ServiceTask { task_type, .. } => {
                Some(task_type.clone())
            }
            _ => None,
        })
        .collect();
    types.sort();
    types.dedup();
    Ok(types)
}

fn document(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmn_engine_core::types::{Intent, JobIntent};

    #[test]
    fn test_job_types_of_demo() {
        let types = job_types(DEMO_PROCESS).unwrap();
        assert_eq!(types, vec!["backorder", "reserve-stock", "ship"]);
    }

    #[tokio::test]
    async fn test_demo_scenario_ships_the_order() {
        let (handle, join) = PartitionRunner::spawn(Engine::new(EngineConfig::default()));
        let records = run_scenario(&handle, DEMO_PROCESS).await.unwrap();

        let completed_jobs: Vec<_> = records
            .iter()
            .filter(|record| record.intent == Intent::Job(JobIntent::Completed))
            .collect();
        assert_eq!(completed_jobs.len(), 2);
        assert!(serde_json::to_string(&records).unwrap().contains("\"shipped\""));

        drop(handle);
        let engine = join.await.unwrap();
        assert!(engine.state().is_drained());
    }
}
