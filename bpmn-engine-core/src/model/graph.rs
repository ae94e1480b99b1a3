//! Executable process graph compiled from a [`ProcessDto`].

use super::dto::*;
use crate::error::{ProcessingError, ProcessingResult};
use crate::expression::Expression;
use crate::types::{BpmnElementType, BpmnEventType};
use anyhow::{anyhow, bail, Context, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Clone, Debug, PartialEq)]
pub struct MessageDefinition {
    pub name: String,
    pub correlation_key: Option<Expression>,
}

/// One executable element. The process itself is an element of type `Process`
/// whose id is the process id.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowElement {
    pub id: String,
    pub element_type: BpmnElementType,
    pub event_type: BpmnEventType,
    /// Id of the containing element; `None` only for the process element.
    pub flow_scope: Option<String>,
    pub attached_to: Option<String>,
    pub interrupting: bool,
    pub message: Option<MessageDefinition>,
    pub timer: Option<Expression>,
    pub input_mapping: Option<Expression>,
    pub output_mapping: Option<Expression>,
    pub job_type: Option<String>,
    pub job_retries: u32,
    pub custom_headers: BTreeMap<String, String>,
    pub called_process_id: Option<String>,
    pub propagate_all_child_variables: bool,
    pub default_flow: Option<String>,
    pub incoming: Vec<String>,
    pub outgoing: Vec<String>,
    pub boundary_events: Vec<String>,
    pub children: Vec<String>,
}

impl FlowElement {
    fn new(id: &str, element_type: BpmnElementType, flow_scope: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            element_type,
            event_type: BpmnEventType::None,
            flow_scope,
            attached_to: None,
            interrupting: true,
            message: None,
            timer: None,
            input_mapping: None,
            output_mapping: None,
            job_type: None,
            job_retries: 0,
            custom_headers: BTreeMap::new(),
            called_process_id: None,
            propagate_all_child_variables: true,
            default_flow: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            boundary_events: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Catch events that carry a message or timer definition.
    pub fn is_catch_event(&self) -> bool {
        self.message.is_some() || self.timer.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
    pub condition: Option<Expression>,
}

/// Compiled process. Sequence flows live in a petgraph so join and
/// reachability questions are graph queries.
#[derive(Clone, Debug)]
pub struct ProcessGraph {
    id: String,
    graph: DiGraph<String, String>,
    node_index: HashMap<String, NodeIndex>,
    elements: BTreeMap<String, FlowElement>,
    flows: BTreeMap<String, SequenceFlow>,
}

impl ProcessGraph {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let dto = parse_process_yaml(yaml)?;
        Self::compile(&dto).with_context(|| format!("Compiling process '{}'", dto.id))
    }

    /// The process element (root scope).
    pub fn process(&self) -> ProcessingResult<&FlowElement> {
        self.element(&self.id)
    }

    pub fn element(&self, id: &str) -> ProcessingResult<&FlowElement> {
        self.elements
            .get(id)
            .ok_or_else(|| ProcessingError::ElementNotFound {
                process_id: self.id.clone(),
                element_id: id.to_string(),
            })
    }

    pub fn flow(&self, id: &str) -> ProcessingResult<&SequenceFlow> {
        self.flows
            .get(id)
            .ok_or_else(|| ProcessingError::ElementNotFound {
                process_id: self.id.clone(),
                element_id: id.to_string(),
            })
    }

    pub fn outgoing(&self, element: &FlowElement) -> ProcessingResult<Vec<&SequenceFlow>> {
        element.outgoing.iter().map(|id| self.flow(id)).collect()
    }

    /// Number of sequence flows entering `element_id`.
    pub fn incoming_count(&self, element_id: &str) -> usize {
        self.node_index
            .get(element_id)
            .map(|idx| {
                self.graph
                    .edges_directed(*idx, Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }

    /// The none start event of a process or (event) sub-process.
    pub fn none_start_event(&self, scope_id: &str) -> Option<&FlowElement> {
        self.children_of(scope_id).find(|child| {
            child.element_type == BpmnElementType::StartEvent
                && child.event_type == BpmnEventType::None
        })
    }

    /// Start events of the process with a message definition.
    pub fn message_start_events(&self) -> Vec<&FlowElement> {
        self.children_of(&self.id)
            .filter(|child| {
                child.element_type == BpmnElementType::StartEvent && child.message.is_some()
            })
            .collect()
    }

    /// Start events of the event sub-processes directly inside `scope_id`.
    pub fn event_sub_process_start_events(&self, scope_id: &str) -> Vec<&FlowElement> {
        self.children_of(scope_id)
            .filter(|child| child.element_type == BpmnElementType::EventSubProcess)
            .flat_map(|esp| {
                self.children_of(&esp.id).filter(|child| {
                    child.element_type == BpmnElementType::StartEvent && child.is_catch_event()
                })
            })
            .collect()
    }

    pub fn boundary_events(&self, element: &FlowElement) -> ProcessingResult<Vec<&FlowElement>> {
        element
            .boundary_events
            .iter()
            .map(|id| self.element(id))
            .collect()
    }

    /// Catch events an element instance subscribes to while it is active.
    pub fn catch_events_for<'a>(
        &'a self,
        element: &'a FlowElement,
    ) -> ProcessingResult<Vec<&'a FlowElement>> {
        let mut events = Vec::new();
        match element.element_type {
            BpmnElementType::IntermediateCatchEvent => events.push(element),
            BpmnElementType::EventBasedGateway => {
                for flow in self.outgoing(element)? {
                    events.push(self.element(&flow.target)?);
                }
            }
            _ => {}
        }
        events.extend(self.boundary_events(element)?);
        if element.element_type.is_container() {
            events.extend(self.event_sub_process_start_events(&element.id));
        }
        Ok(events)
    }

    /// Whether `element` is a target of an event-based gateway; the gateway holds
    /// its subscription.
    pub fn follows_event_based_gateway(&self, element: &FlowElement) -> bool {
        element
            .incoming
            .iter()
            .filter_map(|id| self.flows.get(id))
            .filter_map(|flow| self.elements.get(&flow.source))
            .any(|source| source.element_type == BpmnElementType::EventBasedGateway)
    }

    /// Ids of the interrupting events that may fire on an instance of `element`.
    /// A catch event and the targets of an event-based gateway fire at most once.
    pub fn interrupting_event_ids(&self, element: &FlowElement) -> BTreeSet<String> {
        let own: Vec<String> = match element.element_type {
            BpmnElementType::IntermediateCatchEvent => vec![element.id.clone()],
            BpmnElementType::EventBasedGateway => element
                .outgoing
                .iter()
                .filter_map(|id| self.flows.get(id))
                .map(|flow| flow.target.clone())
                .collect(),
            _ => Vec::new(),
        };
        let boundary = element
            .boundary_events
            .iter()
            .filter_map(|id| self.elements.get(id))
            .filter(|event| event.interrupting);
        let esp_starts = self
            .event_sub_process_start_events(&element.id)
            .into_iter()
            .filter(|event| event.interrupting);
        boundary
            .chain(esp_starts)
            .map(|e| e.id.clone())
            .chain(own)
            .collect()
    }

    pub fn children_of<'a>(&'a self, scope_id: &str) -> impl Iterator<Item = &'a FlowElement> + 'a {
        let scope_id = scope_id.to_string();
        self.elements
            .values()
            .filter(move |element| element.flow_scope.as_deref() == Some(scope_id.as_str()))
    }

    // ── Compile ──

    pub fn compile(dto: &ProcessDto) -> Result<Self> {
        let mut elements: BTreeMap<String, FlowElement> = BTreeMap::new();
        let process = FlowElement::new(&dto.id, BpmnElementType::Process, None);
        elements.insert(dto.id.clone(), process);

        for node in &dto.nodes {
            let element = element_from_node(&dto.id, node)?;
            if elements.contains_key(&element.id) {
                bail!("duplicate element id '{}'", element.id);
            }
            elements.insert(element.id.clone(), element);
        }

        // Scopes and boundary hosts must exist; boundary events live in the host's scope.
        let ids: Vec<String> = elements.keys().cloned().collect();
        for id in &ids {
            let element = &elements[id];
            if let Some(scope) = element.flow_scope.clone() {
                let scope_type = elements
                    .get(&scope)
                    .map(|s| s.element_type)
                    .ok_or_else(|| anyhow!("element '{id}' refers to unknown scope '{scope}'"))?;
                if !matches!(
                    scope_type,
                    BpmnElementType::Process
                        | BpmnElementType::SubProcess
                        | BpmnElementType::EventSubProcess
                ) {
                    bail!("scope '{scope}' of element '{id}' is not a sub-process");
                }
                if let Some(parent) = elements.get_mut(&scope) {
                    parent.children.push(id.clone());
                }
            }
            if let Some(host) = elements[id].attached_to.clone() {
                let host_scope = elements
                    .get(&host)
                    .map(|h| h.flow_scope.clone())
                    .ok_or_else(|| anyhow!("boundary event '{id}' attached to unknown '{host}'"))?;
                if host_scope.is_none() {
                    bail!("boundary event '{id}' can't be attached to the process");
                }
                if let Some(boundary) = elements.get_mut(id) {
                    boundary.flow_scope = host_scope;
                }
                if let Some(host_element) = elements.get_mut(&host) {
                    host_element.boundary_events.push(id.clone());
                }
            }
        }
        // Second pass: boundary events got their scope only now.
        for id in &ids {
            let is_boundary = elements[id].attached_to.is_some();
            if let (true, Some(scope)) = (is_boundary, elements[id].flow_scope.clone()) {
                if let Some(parent) = elements.get_mut(&scope) {
                    if !parent.children.contains(id) {
                        parent.children.push(id.clone());
                    }
                }
            }
        }

        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();
        for id in elements.keys() {
            node_index.insert(id.clone(), graph.add_node(id.clone()));
        }

        let mut flows = BTreeMap::new();
        for edge in &dto.edges {
            let flow_id = edge.flow_id();
            let (Some(from), Some(to)) = (node_index.get(&edge.from), node_index.get(&edge.to))
            else {
                bail!("sequence flow '{flow_id}' connects unknown elements");
            };
            if elements[&edge.from].flow_scope != elements[&edge.to].flow_scope {
                bail!("sequence flow '{flow_id}' crosses a scope boundary");
            }
            if flows.contains_key(&flow_id) {
                bail!("duplicate sequence flow id '{flow_id}'");
            }
            graph.add_edge(*from, *to, flow_id.clone());
            let condition = edge
                .condition
                .as_deref()
                .map(Expression::parse)
                .transpose()
                .with_context(|| format!("condition of sequence flow '{flow_id}'"))?;
            flows.insert(
                flow_id.clone(),
                SequenceFlow {
                    id: flow_id.clone(),
                    source: edge.from.clone(),
                    target: edge.to.clone(),
                    condition,
                },
            );
            if let Some(source) = elements.get_mut(&edge.from) {
                source.outgoing.push(flow_id.clone());
            }
            if let Some(target) = elements.get_mut(&edge.to) {
                target.incoming.push(flow_id);
            }
        }

        let compiled = Self {
            id: dto.id.clone(),
            graph,
            node_index,
            elements,
            flows,
        };
        compiled.verify()?;
        Ok(compiled)
    }

    fn verify(&self) -> Result<()> {
        for element in self.elements.values() {
            match element.element_type {
                BpmnElementType::Process | BpmnElementType::SubProcess => {
                    if self.none_start_event(&element.id).is_none() {
                        let has_message_start = element.element_type == BpmnElementType::Process
                            && !self.message_start_events().is_empty();
                        if !has_message_start {
                            bail!("'{}' has no none start event", element.id);
                        }
                    }
                }
                BpmnElementType::EventSubProcess => {
                    let starts: Vec<_> = self
                        .children_of(&element.id)
                        .filter(|c| c.element_type == BpmnElementType::StartEvent)
                        .collect();
                    if starts.len() != 1 || !starts[0].is_catch_event() {
                        bail!(
                            "event sub-process '{}' needs exactly one message or timer start event",
                            element.id
                        );
                    }
                }
                BpmnElementType::EventBasedGateway => {
                    for flow in self.outgoing(element)? {
                        let target = self.element(&flow.target)?;
                        if target.element_type != BpmnElementType::IntermediateCatchEvent {
                            bail!(
                                "event-based gateway '{}' must lead to catch events, not '{}'",
                                element.id,
                                target.id
                            );
                        }
                    }
                }
                BpmnElementType::ExclusiveGateway => {
                    if let Some(default) = &element.default_flow {
                        if !element.outgoing.contains(default) {
                            bail!(
                                "default flow '{default}' is not outgoing from '{}'",
                                element.id
                            );
                        }
                    }
                }
                BpmnElementType::StartEvent => {
                    let scope_is_sub_process = element.flow_scope.as_deref().is_some_and(|scope| {
                        self.elements
                            .get(scope)
                            .is_some_and(|s| s.element_type == BpmnElementType::SubProcess)
                    });
                    if element.timer.is_some() && element.flow_scope.as_deref() == Some(&self.id) {
                        bail!(
                            "timer start event '{}' is only supported in event sub-processes",
                            element.id,
                        );
                    }
                    if scope_is_sub_process && element.is_catch_event() {
                        bail!(
                            "start event '{}' of a sub-process can't wait for an event",
                            element.id,
                        );
                    }
                }
                BpmnElementType::IntermediateCatchEvent | BpmnElementType::BoundaryEvent => {
                    if !element.is_catch_event() {
                        bail!("catch event '{}' has neither message nor timer", element.id);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn mapping(pairs: &[MappingDto]) -> Result<Option<Expression>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let expression =
        Expression::mappings(pairs.iter().map(|m| (m.source.as_str(), m.target.as_str())))?;
    Ok(Some(expression))
}

fn apply_event(element: &mut FlowElement, event: &EventDto) -> Result<()> {
    if let Some(message) = &event.message {
        element.event_type = BpmnEventType::Message;
        let correlation_key = message
            .correlation_key
            .as_deref()
            .map(Expression::parse)
            .transpose()?;
        element.message = Some(MessageDefinition {
            name: message.name.clone(),
            correlation_key,
        });
    }
    if let Some(timer) = &event.timer {
        if element.message.is_some() {
            bail!("'{}' declares both a message and a timer", element.id);
        }
        element.event_type = BpmnEventType::Timer;
        element.timer = Some(Expression::parse(timer)?);
    }
    Ok(())
}

fn element_from_node(process_id: &str, node: &NodeDto) -> Result<FlowElement> {
    let scoped = |scope: &Option<String>| Some(
        scope.clone().unwrap_or_else(|| process_id.to_string()),
    );
    let element = match node {
        NodeDto::Start {
            id,
            scope,
            event,
            interrupting,
            outputs,
        } => {
            let mut e = FlowElement::new(id, BpmnElementType::StartEvent, scoped(scope));
            apply_event(&mut e, event)?;
            e.interrupting = *interrupting;
            e.output_mapping = mapping(outputs)?;
            e
        }
        NodeDto::End { id, scope } => {
            FlowElement::new(id, BpmnElementType::EndEvent, scoped(scope))
        }
        NodeDto::ServiceTask {
            id,
            scope,
            task_type,
            retries,
            headers,
            inputs,
            outputs,
        } => {
            let mut e = FlowElement::new(id, BpmnElementType::ServiceTask, scoped(scope));
            e.job_type = Some(task_type.clone());
            e.job_retries = *retries;
            e.custom_headers = headers.clone();
            e.input_mapping = mapping(inputs)?;
            e.output_mapping = mapping(outputs)?;
            e
        }
        NodeDto::SubProcess {
            id,
            scope,
            inputs,
            outputs,
        } => {
            let mut e = FlowElement::new(id, BpmnElementType::SubProcess, scoped(scope));
            e.input_mapping = mapping(inputs)?;
            e.output_mapping = mapping(outputs)?;
            e
        }
        NodeDto::EventSubProcess { id, scope } => {
            FlowElement::new(id, BpmnElementType::EventSubProcess, scoped(scope))
        }
        NodeDto::CallActivity {
            id,
            scope,
            process_id: called,
            propagate_all_child_variables,
            inputs,
            outputs,
        } => {
            let mut e = FlowElement::new(id, BpmnElementType::CallActivity, scoped(scope));
            e.called_process_id = Some(called.clone());
            e.propagate_all_child_variables = *propagate_all_child_variables;
            e.input_mapping = mapping(inputs)?;
            e.output_mapping = mapping(outputs)?;
            e
        }
        NodeDto::IntermediateCatch {
            id,
            scope,
            event,
            outputs,
        } => {
            let mut e =
                FlowElement::new(id, BpmnElementType::IntermediateCatchEvent, scoped(scope));
            apply_event(&mut e, event)?;
            e.output_mapping = mapping(outputs)?;
            e
        }
        NodeDto::Boundary {
            id,
            host,
            event,
            interrupting,
            outputs,
        } => {
            // Scope is resolved from the host once all nodes are known.
            let mut e = FlowElement::new(id, BpmnElementType::BoundaryEvent, None);
            e.attached_to = Some(host.clone());
            apply_event(&mut e, event)?;
            e.interrupting = *interrupting;
            e.output_mapping = mapping(outputs)?;
            e
        }
        NodeDto::ExclusiveGateway { id, scope, default } => {
            let mut e = FlowElement::new(id, BpmnElementType::ExclusiveGateway, scoped(scope));
            e.default_flow = default.clone();
            e
        }
        NodeDto::ParallelGateway { id, scope } => {
            FlowElement::new(id, BpmnElementType::ParallelGateway, scoped(scope))
        }
        NodeDto::EventBasedGateway { id, scope } => {
            FlowElement::new(id, BpmnElementType::EventBasedGateway, scoped(scope))
        }
    };
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = r#"
id: order
nodes:
  - kind: Start
    id: start
  - kind: ParallelGateway
    id: fork
  - kind: ServiceTask
    id: pack
    task_type: pack
  - kind: ServiceTask
    id: bill
    task_type: bill
  - kind: Boundary
    id: bill_timeout
    host: bill
    timer: PT10M
  - kind: ParallelGateway
    id: join
  - kind: End
    id: end
  - kind: EventSubProcess
    id: cancel
  - kind: Start
    id: cancel_start
    scope: cancel
    message:
      name: cancel
      correlation_key: =order_id
  - kind: End
    id: cancel_end
    scope: cancel
edges:
  - from: start
    to: fork
  - from: fork
    to: pack
  - from: fork
    to: bill
  - from: pack
    to: join
  - from: bill
    to: join
  - from: join
    to: end
  - from: cancel_start
    to: cancel_end
"#;

    #[test]
    fn test_compile_indexes_flows_and_scopes() {
        let graph = ProcessGraph::from_yaml(ORDER).unwrap();
        assert_eq!(graph.incoming_count("join"), 2);
        assert_eq!(graph.none_start_event("order").unwrap().id, "start");
        let bill = graph.element("bill").unwrap();
        assert_eq!(bill.boundary_events, vec!["bill_timeout".to_string()]);
        assert_eq!(
            graph.element("bill_timeout").unwrap().flow_scope.as_deref(),
            Some("order")
        );
        let process = graph.process().unwrap();
        let interrupting = graph.interrupting_event_ids(process);
        assert!(interrupting.contains("cancel_start"));
        assert_eq!(graph.interrupting_event_ids(bill).len(), 1);
    }

    #[test]
    fn test_catch_events_for_container_include_event_sub_process_starts() {
        let graph = ProcessGraph::from_yaml(ORDER).unwrap();
        let process = graph.process().unwrap();
        let ids: Vec<_> = graph
            .catch_events_for(process)
            .unwrap()
            .into_iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(ids, vec!["cancel_start".to_string()]);
    }

    #[test]
    fn test_unknown_flow_target_rejected() {
        let yaml = r#"
id: broken
nodes:
  - kind: Start
    id: start
edges:
  - from: start
    to: nowhere
"#;
        assert!(ProcessGraph::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_missing_element_is_fatal_lookup() {
        let graph = ProcessGraph::from_yaml(ORDER).unwrap();
        assert!(matches!(
            graph.element("ghost"),
            Err(ProcessingError::ElementNotFound { .. })
        ));
    }
}
