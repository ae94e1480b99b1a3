use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Helper defaults for serde ──

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    3
}

fn is_false(v: &bool) -> bool {
    !v
}

// ── Top-level DTO ──

/// Authoring form of a process: flat node list plus sequence-flow edges.
/// Nodes inside a sub-process name it in `scope`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDto {
    pub id: String,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub edges: Vec<EdgeDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDto {
    /// Defaults to `<from>_to_<to>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl EdgeDto {
    pub fn flow_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}_to_{}", self.from, self.to))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDto {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDto {
    pub name: String,
    /// Expression for the correlation key. Start events have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
}

/// Trigger of an event node: a message or a timer duration expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<String>,
}

// ── Nodes ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeDto {
    Start {
        id: String,
        #[serde(default)]
        scope: Option<String>,
        #[serde(flatten)]
        event: EventDto,
        #[serde(default = "default_true")]
        interrupting: bool,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    End {
        id: String,
        #[serde(default)]
        scope: Option<String>,
    },
    ServiceTask {
        id: String,
        #[serde(default)]
        scope: Option<String>,
        task_type: String,
        #[serde(default = "default_retries")]
        retries: u32,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        inputs: Vec<MappingDto>,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    SubProcess {
        id: String,
        #[serde(default)]
        scope: Option<String>,
        #[serde(default)]
        inputs: Vec<MappingDto>,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    EventSubProcess {
        id: String,
        #[serde(default)]
        scope: Option<String>,
    },
    CallActivity {
        id: String,
        #[serde(default)]
        scope: Option<String>,
        process_id: String,
        #[serde(default = "default_true", skip_serializing_if = "is_false")]
        propagate_all_child_variables: bool,
        #[serde(default)]
        inputs: Vec<MappingDto>,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    IntermediateCatch {
        id: String,
        #[serde(default)]
        scope: Option<String>,
        #[serde(flatten)]
        event: EventDto,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    Boundary {
        id: String,
        host: String,
        #[serde(flatten)]
        event: EventDto,
        #[serde(default = "default_true")]
        interrupting: bool,
        #[serde(default)]
        outputs: Vec<MappingDto>,
    },
    ExclusiveGateway {
        id: String,
        #[serde(default)]
        scope: Option<String>,
        #[serde(default)]
        default: Option<String>,
    },
    ParallelGateway {
        id: String,
        #[serde(default)]
        scope: Option<String>,
    },
    EventBasedGateway {
        id: String,
        #[serde(default)]
        scope: Option<String>,
    },
}

impl NodeDto {
    pub fn id(&self) -> &str {
        match self {
            NodeDto::Start { id, .. }
            | NodeDto::End { id, .. }
            | NodeDto::ServiceTask { id, .. }
            | NodeDto::SubProcess { id, .. }
            | NodeDto::EventSubProcess { id, .. }
            | NodeDto::CallActivity { id, .. }
            | NodeDto::IntermediateCatch { id, .. }
            | NodeDto::Boundary { id, .. }
            | NodeDto::ExclusiveGateway { id, .. }
            | NodeDto::ParallelGateway { id, .. }
            | NodeDto::EventBasedGateway { id, .. } => id,
        }
    }
}

/// Parse a YAML string into a ProcessDto. Validation happens on compile.
pub fn parse_process_yaml(yaml_str: &str) -> Result<ProcessDto> {
    let dto: ProcessDto = serde_yaml::from_str(yaml_str).context("Parsing process YAML")?;
    Ok(dto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_yaml_parse() {
        let yaml = r#"
id: order
nodes:
  - kind: Start
    id: start
  - kind: ServiceTask
    id: ship
    task_type: ship-parcel
  - kind: Boundary
    id: late
    host: ship
    timer: PT1H
    interrupting: false
  - kind: End
    id: end
edges:
  - from: start
    to: ship
  - from: ship
    to: end
"#;
        let dto = parse_process_yaml(yaml).unwrap();
        assert_eq!(dto.id, "order");
        assert_eq!(dto.nodes.len(), 4);
        assert_eq!(dto.edges[0].flow_id(), "start_to_ship");
        match &dto.nodes[1] {
            NodeDto::ServiceTask { retries, .. } => assert_eq!(*retries, 3),
            other => panic!("unexpected node {other:?}"),
        }
        match &dto.nodes[2] {
            NodeDto::Boundary {
                event,
                interrupting,
                ..
            } => {
                assert_eq!(event.timer.as_deref(), Some("PT1H"));
                assert!(!interrupting);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_message_start_event_parse() {
        let yaml = r#"
id: onboarding
nodes:
  - kind: Start
    id: start
    message:
      name: applied
"#;
        let dto = parse_process_yaml(yaml).unwrap();
        match &dto.nodes[0] {
            NodeDto::Start { event, .. } => {
                assert_eq!(event.message.as_ref().map(|m| m.name.as_str()), Some("applied"));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }
}
