//! Direct reads of element instances plus token bookkeeping.

use super::{BpmnBehaviors, BpmnElementContext};
use crate::error::ProcessingResult;
use crate::state::ElementInstance;
use crate::types::*;
use tracing::trace;

impl BpmnBehaviors<'_> {
    pub fn element_instance(&self, key: Key) -> ProcessingResult<ElementInstance> {
        self.state.element_instances.instance(key)
    }

    pub fn get_element_instance(&self, key: Key) -> Option<ElementInstance> {
        self.state.element_instances.get_instance(key)
    }

    pub fn flow_scope_instance(&self, context: &BpmnElementContext) -> Option<ElementInstance> {
        self.get_element_instance(context.flow_scope_key())
    }

    /// Context of an existing instance, in its persisted state.
    pub fn context_of(&self, key: Key) -> ProcessingResult<BpmnElementContext> {
        let instance = self.element_instance(key)?;
        Ok(BpmnElementContext::new(key, instance.value, instance.state))
    }

    pub fn flow_scope_context(
        &self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<BpmnElementContext> {
        self.context_of(context.flow_scope_key())
    }

    pub fn spawn_token(&mut self, scope_key: Key) -> ProcessingResult<()> {
        let tokens = self.state.element_instances.spawn_token(scope_key)?;
        trace!(scope_key, tokens, "Token spawned");
        Ok(())
    }

    pub fn consume_token(&mut self, scope_key: Key) -> ProcessingResult<()> {
        let tokens = self.state.element_instances.consume_token(scope_key)?;
        trace!(scope_key, tokens, "Token consumed");
        Ok(())
    }

    /// True exactly when the scope has no active token left. Callers consume the
    /// leaving branch's token before asking.
    pub fn is_last_active_execution_path(&self, scope_key: Key) -> ProcessingResult<bool> {
        Ok(self.element_instance(scope_key)?.active_tokens == 0)
    }

    /// Mark a scope as interrupted by the event sub-process instance `event_key`.
    pub fn set_interrupting_event_key(
        &mut self,
        scope_key: Key,
        event_key: Key,
    ) -> ProcessingResult<()> {
        let mut scope = self.element_instance(scope_key)?;
        scope.interrupting_event_key = event_key;
        self.state.element_instances.update_instance(scope)
    }
}
