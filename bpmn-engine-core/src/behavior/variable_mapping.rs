//! Variable writes plus input and output mappings.

use super::{BpmnBehaviors, BpmnElementContext};
use crate::error::{FailureResult, ProcessingResult};
use crate::model::FlowElement;
use crate::records::{ProcessInstanceRecord, RecordValue, VariableRecord};
use crate::types::*;
use serde_json::Value;

impl BpmnBehaviors<'_> {
    /// Evaluate the input mapping against the activating instance and store the
    /// result as its local variables.
    pub fn apply_input_mappings(
        &mut self,
        element: &FlowElement,
        context: &BpmnElementContext,
    ) -> ProcessingResult<FailureResult<()>> {
        let Some(mapping) = &element.input_mapping else {
            return Ok(Ok(()));
        };
        let variables = self.state.variables.get_variables_as_document(context.key());
        let document = match self.evaluator.evaluate_document(mapping, &variables) {
            Ok(document) => document,
            Err(failure) => return Ok(Err(failure.with_scope(context.key()))),
        };
        self.merge_local_document(&context.record, context.key(), document)?;
        Ok(Ok(()))
    }

    /// Merge stashed temporary variables, then evaluate the output mapping against
    /// the instance and merge the result into the effective scope.
    pub fn apply_output_mappings(
        &mut self,
        element: &FlowElement,
        context: &BpmnElementContext,
    ) -> ProcessingResult<FailureResult<()>> {
        let key = context.key();
        let instance = self.element_instance(key)?;
        let effective_scope =
            if instance.multi_instance_loop_counter > 0 || context.flow_scope_key() == NO_KEY {
                key
            } else {
                context.flow_scope_key()
            };

        if let Some(temporary) = self.state.variables.remove_temporary_variables(key) {
            if element.output_mapping.is_some() || context.flow_scope_key() == NO_KEY {
                self.merge_local_document(&context.record, key, temporary)?;
            } else {
                self.merge_document(&context.record, context.flow_scope_key(), temporary)?;
            }
        }

        let Some(mapping) = &element.output_mapping else {
            return Ok(Ok(()));
        };
        let variables = self.state.variables.get_variables_as_document(key);
        let document = match self.evaluator.evaluate_document(mapping, &variables) {
            Ok(document) => document,
            Err(failure) => return Ok(Err(failure.with_scope(key))),
        };
        if effective_scope == key {
            self.merge_local_document(&context.record, key, document)?;
        } else {
            self.merge_document(&context.record, effective_scope, document)?;
        }
        Ok(Ok(()))
    }

    /// Move stashed temporary variables into the instance's own scope.
    pub fn apply_temporary_variables(
        &mut self,
        context: &BpmnElementContext,
    ) -> ProcessingResult<()> {
        match self.state.variables.remove_temporary_variables(context.key()) {
            Some(temporary) => self.merge_local_document(&context.record, context.key(), temporary),
            None => Ok(()),
        }
    }

    /// Write every variable into `scope_key` itself.
    pub fn merge_local_document(
        &mut self,
        owner: &ProcessInstanceRecord,
        scope_key: Key,
        document: Document,
    ) -> ProcessingResult<()> {
        for (name, value) in document {
            self.set_variable(owner, scope_key, &name, value)?;
        }
        Ok(())
    }

    /// Write each variable into the nearest scope that declares it, or into
    /// `scope_key` when no scope does.
    pub fn merge_document(
        &mut self,
        owner: &ProcessInstanceRecord,
        scope_key: Key,
        document: Document,
    ) -> ProcessingResult<()> {
        for (name, value) in document {
            let target = self
                .state
                .variables
                .declaring_scope(scope_key, &name)
                .unwrap_or(scope_key);
            self.set_variable(owner, target, &name, value)?;
        }
        Ok(())
    }

    /// Create or update one variable. Writing an unchanged value appends nothing.
    pub fn set_variable(
        &mut self,
        owner: &ProcessInstanceRecord,
        scope_key: Key,
        name: &str,
        value: Value,
    ) -> ProcessingResult<()> {
        let existing = self
            .state
            .variables
            .get_variable_local(scope_key, name)
            .map(|variable| (variable.key, variable.value == value));
        let (key, intent) = match existing {
            Some((_, true)) => return Ok(()),
            Some((key, false)) => (key, VariableIntent::Updated),
            None => (self.next_key(), VariableIntent::Created),
        };
        let record = VariableRecord {
            name: name.to_string(),
            value,
            scope_key,
            process_instance_key: owner.process_instance_key,
            process_definition_key: owner.process_definition_key,
            bpmn_process_id: owner.bpmn_process_id.clone(),
        };
        self.append_event(key, Intent::Variable(intent), RecordValue::Variable(record))
    }
}
