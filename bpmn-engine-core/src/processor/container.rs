//! Container processors: how a scope reacts when one of its children ends.
//!
//! Lookup is by element type. Asking for a type that cannot own children is an
//! invariant violation.

use crate::behavior::{BpmnBehaviors, BpmnElementContext};
use crate::error::{FailureResult, ProcessingError, ProcessingResult};
use crate::types::*;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerProcessor {
    Process,
    SubProcess,
    EventSubProcess,
    CallActivity,
}

/// Registry keyed by element type.
#[derive(Clone, Debug)]
pub struct ContainerProcessors {
    processors: BTreeMap<BpmnElementType, ContainerProcessor>,
}

impl Default for ContainerProcessors {
    fn default() -> Self {
        let processors = BTreeMap::from([
            (BpmnElementType::Process, ContainerProcessor::Process),
            (BpmnElementType::SubProcess, ContainerProcessor::SubProcess),
            (BpmnElementType::EventSubProcess, ContainerProcessor::EventSubProcess),
            (BpmnElementType::CallActivity, ContainerProcessor::CallActivity),
        ]);
        Self { processors }
    }
}

impl ContainerProcessors {
    pub fn lookup(&self, element_type: BpmnElementType) -> ProcessingResult<ContainerProcessor> {
        self.processors
            .get(&element_type)
            .copied()
            .ok_or_else(|| ProcessingError::NoContainerProcessor(format!("{element_type:?}")))
    }
}

impl ContainerProcessor {
    /// A child is about to be activated inside `scope`.
    pub fn on_child_activating(
        self,
        _behaviors: &mut BpmnBehaviors<'_>,
        _scope: &BpmnElementContext,
        _child: &BpmnElementContext,
    ) -> ProcessingResult<FailureResult<()>> {
        Ok(Ok(()))
    }

    /// A child without outgoing flows is about to complete. A failure keeps the
    /// child in COMPLETING.
    pub fn before_execution_path_completed(
        self,
        _behaviors: &mut BpmnBehaviors<'_>,
        _scope: &BpmnElementContext,
        _child: &BpmnElementContext,
    ) -> ProcessingResult<FailureResult<()>> {
        Ok(Ok(()))
    }

    /// A child without outgoing flows completed and consumed its token. The scope
    /// completes once no token is left.
    pub fn after_execution_path_completed(
        self,
        behaviors: &mut BpmnBehaviors<'_>,
        scope: &BpmnElementContext,
        completed: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        if behaviors.is_last_active_execution_path(scope.key())? {
            debug!(
                scope_key = scope.key(),
                element_id = completed.element_id(),
                "Last execution path completed"
            );
            behaviors.complete_element(scope);
            return Ok(());
        }
        let instance = behaviors.element_instance(scope.key())?;
        if instance.is_interrupted() {
            self.publish_if_idle(behaviors, scope)?;
        }
        Ok(())
    }

    /// A child reached TERMINATED.
    pub fn on_child_terminated(
        self,
        behaviors: &mut BpmnBehaviors<'_>,
        scope: &BpmnElementContext,
        _child: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        let Some(instance) = behaviors.get_element_instance(scope.key()) else {
            return Ok(());
        };
        let scope = BpmnElementContext::new(scope.key(), instance.value.clone(), instance.state);

        if self == ContainerProcessor::CallActivity {
            if instance.is_terminating() {
                behaviors.finish_termination(&scope)?;
            }
            return Ok(());
        }

        if instance.is_terminating() {
            if instance.active_element_instances == 0 {
                behaviors.finish_termination(&scope)?;
            }
        } else if instance.is_interrupted() {
            self.publish_if_idle(behaviors, &scope)?;
        } else if instance.is_active() && instance.active_tokens == 0 {
            behaviors.complete_element(&scope);
        }
        Ok(())
    }

    /// Activate the interrupting event sub-process once the last child of an
    /// interrupted scope is gone. Its token was spawned when it was triggered.
    pub fn publish_if_idle(
        self,
        behaviors: &mut BpmnBehaviors<'_>,
        scope: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        let instance = behaviors.element_instance(scope.key())?;
        if instance.active_element_instances > 0 {
            return Ok(());
        }
        if let Some(record) =
            behaviors.take_deferred_record(scope.key(), instance.interrupting_event_key)
        {
            debug!(
                scope_key = scope.key(),
                key = record.key,
                "Publishing interrupting event sub-process",
            );
            behaviors.append_element_command(record.key, record.intent, record.value);
        }
        Ok(())
    }
}
