use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Scalar aliases ───────────────────────────────────────────

/// Partition-unique key of a record, element instance, job, incident, timer or message.
pub type Key = i64;

/// Sentinel for an absent key (e.g. the parent of a root element instance).
pub const NO_KEY: Key = -1;

/// Epoch milliseconds (UTC). Always taken from the record being processed.
pub type Timestamp = i64;

/// A variable document: variable name → JSON value.
pub type Document = Map<String, Value>;

// ─── Element types ────────────────────────────────────────────

/// Closed set of executable element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BpmnElementType {
    Process,
    SubProcess,
    EventSubProcess,
    CallActivity,
    ServiceTask,
    StartEvent,
    EndEvent,
    IntermediateCatchEvent,
    BoundaryEvent,
    ExclusiveGateway,
    ParallelGateway,
    EventBasedGateway,
    SequenceFlow,
}

impl BpmnElementType {
    /// Elements that own child element instances.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::Process | Self::SubProcess | Self::EventSubProcess | Self::CallActivity
        )
    }

    /// Elements that get an event scope on activation (they can be the target of triggers).
    pub fn has_event_scope(self) -> bool {
        matches!(
            self,
            Self::Process
                | Self::SubProcess
                | Self::EventSubProcess
                | Self::CallActivity
                | Self::ServiceTask
                | Self::IntermediateCatchEvent
                | Self::EventBasedGateway
        )
    }
}

/// Event definition carried by an event element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BpmnEventType {
    #[default]
    None,
    Message,
    Timer,
}

// ─── Process instance intents / element lifecycle ─────────────

/// Commands and events of the element lifecycle.
///
/// The `Element*` variants double as the persisted lifecycle state of an element
/// instance. Legal forward moves are
/// `ACTIVATING → ACTIVATED → COMPLETING → COMPLETED`, and any non-terminal state
/// may move to `TERMINATING → TERMINATED`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceIntent {
    ActivateElement,
    CompleteElement,
    TerminateElement,
    ElementActivating,
    ElementActivated,
    ElementCompleting,
    ElementCompleted,
    ElementTerminating,
    ElementTerminated,
    SequenceFlowTaken,
}

impl ProcessInstanceIntent {
    pub fn is_command(self) -> bool {
        matches!(
            self,
            Self::ActivateElement | Self::CompleteElement | Self::TerminateElement
        )
    }

    pub fn is_final_state(self) -> bool {
        matches!(self, Self::ElementCompleted | Self::ElementTerminated)
    }

    /// ACTIVATING, ACTIVATED or COMPLETING.
    pub fn is_active_state(self) -> bool {
        matches!(
            self,
            Self::ElementActivating | Self::ElementActivated | Self::ElementCompleting
        )
    }

    /// Whether the lifecycle graph contains an edge `self → to`.
    ///
    /// `ActivateElement` stands for "no instance yet": the only way out of it is
    /// `ElementActivating`. Sequence flows are taken from a completed element.
    pub fn can_transition(self, to: Self) -> bool {
        use ProcessInstanceIntent::*;
        match (self, to) {
            (ActivateElement, ElementActivating) => true,
            (ElementActivating, ElementActivated) => true,
            (ElementActivated, ElementCompleting) => true,
            (CompleteElement, ElementCompleting) => true,
            (ElementCompleting, ElementCompleted) => true,
            (ElementActivating | ElementActivated | ElementCompleting, ElementTerminating) => {
                true
            }
            (TerminateElement, ElementTerminating) => true,
            (ElementTerminating, ElementTerminated) => true,
            (ElementCompleted, SequenceFlowTaken) => true,
            _ => false,
        }
    }
}

// ─── Other intents ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceCreationIntent {
    Create,
    Created,
}

/// Batched termination of the children of one scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceBatchIntent {
    Terminate,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessEventIntent {
    Triggering,
    Triggered,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobIntent {
    Complete,
    Fail,
    UpdateRetries,
    TimeOut,
    Created,
    Completed,
    Failed,
    RetriesUpdated,
    TimedOut,
    Canceled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobBatchIntent {
    Activate,
    Activated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentIntent {
    Create,
    Created,
    Resolve,
    Resolved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerIntent {
    Created,
    Trigger,
    Triggered,
    Canceled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageIntent {
    Publish,
    Published,
    Expire,
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageSubscriptionIntent {
    Created,
    Correlated,
    Deleted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStartEventSubscriptionIntent {
    Correlated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableIntent {
    Created,
    Updated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableDocumentIntent {
    Update,
    Updated,
}

// ─── Intent family ────────────────────────────────────────────

/// The intent of a record, tagged by its value family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    ProcessInstance(ProcessInstanceIntent),
    ProcessInstanceCreation(ProcessInstanceCreationIntent),
    ProcessInstanceBatch(ProcessInstanceBatchIntent),
    ProcessEvent(ProcessEventIntent),
    Job(JobIntent),
    JobBatch(JobBatchIntent),
    Incident(IncidentIntent),
    Timer(TimerIntent),
    Message(MessageIntent),
    MessageSubscription(MessageSubscriptionIntent),
    MessageStartEventSubscription(MessageStartEventSubscriptionIntent),
    Variable(VariableIntent),
    VariableDocument(VariableDocumentIntent),
}

/// Command, event, or a rejected command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Command,
    Event,
    CommandRejection,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessInstanceIntent::*;

    const STATES: [ProcessInstanceIntent; 7] = [
        ActivateElement,
        ElementActivating,
        ElementActivated,
        ElementCompleting,
        ElementCompleted,
        ElementTerminating,
        ElementTerminated,
    ];

    #[test]
    fn test_forward_path_is_legal() {
        assert!(ActivateElement.can_transition(ElementActivating));
        assert!(ElementActivating.can_transition(ElementActivated));
        assert!(ElementActivated.can_transition(ElementCompleting));
        assert!(ElementCompleting.can_transition(ElementCompleted));
        assert!(ElementCompleted.can_transition(SequenceFlowTaken));
    }

    #[test]
    fn test_terminating_only_from_non_terminal_states() {
        for state in STATES {
            let expected = matches!(
                state,
                ElementActivating | ElementActivated | ElementCompleting
            );
            assert_eq!(
                state.can_transition(ElementTerminating),
                expected,
                "{state:?} → TERMINATING"
            );
        }
        assert!(ElementTerminating.can_transition(ElementTerminated));
    }

    #[test]
    fn test_no_backward_or_skipping_edges() {
        assert!(!ElementActivated.can_transition(ElementActivating));
        assert!(!ElementActivating.can_transition(ElementCompleted));
        assert!(!ElementCompleted.can_transition(ElementActivated));
        assert!(!ElementTerminated.can_transition(ElementActivating));
        assert!(!ElementTerminating.can_transition(ElementTerminating));
        assert!(!ElementTerminating.can_transition(ElementCompleted));
    }

    #[test]
    fn test_container_and_event_scope_classification() {
        assert!(BpmnElementType::CallActivity.is_container());
        assert!(!BpmnElementType::ServiceTask.is_container());
        assert!(BpmnElementType::ServiceTask.has_event_scope());
        assert!(!BpmnElementType::EndEvent.has_event_scope());
    }
}
