use super::BpmnBehaviors;
use crate::error::ProcessingResult;
use crate::records::ProcessInstanceRecord;
use crate::state::{DeferredRecord, Purpose};
use crate::types::{Document, Key, ProcessInstanceIntent};
use tracing::debug;

/// A deferred activation read for publishing, together with the trigger
/// variables stashed for it. Removing the parent drops the stash, so the
/// variables travel with the record until it is published.
#[derive(Clone, Debug)]
pub struct PendingActivation {
    pub record: DeferredRecord,
    pub variables: Option<Document>,
}

impl BpmnBehaviors<'_> {
    /// Keep an activation back under `parent_key` until the parent publishes it.
    pub fn defer_activation(&mut self, parent_key: Key, key: Key, record: ProcessInstanceRecord) {
        debug!(parent_key, key, element_id = %record.element_id, "Activation deferred");
        self.state.element_instances.store_record(DeferredRecord {
            key,
            parent_key,
            purpose: Purpose::Deferred,
            intent: ProcessInstanceIntent::ActivateElement,
            value: record,
        });
    }

    pub fn deferred_records(&self, parent_key: Key) -> Vec<PendingActivation> {
        self.state
            .element_instances
            .deferred_records(parent_key)
            .into_iter()
            .map(|record| PendingActivation {
                variables: self.state.variables.get_temporary_variables(record.key).cloned(),
                record,
            })
            .collect()
    }

    /// Remove one deferred record without publishing it.
    pub fn take_deferred_record(&mut self, parent_key: Key, key: Key) -> Option<DeferredRecord> {
        self.state
            .element_instances
            .remove_stored_record(parent_key, key, Purpose::Deferred)
    }

    /// Publish deferred activations. Each one starts a new branch in its flow scope.
    /// Records still in the store are removed and dropped trigger variables are
    /// stashed again; the caller may have read them before their parent was removed.
    pub fn publish_deferred_records(
        &mut self,
        pending: Vec<PendingActivation>,
    ) -> ProcessingResult<()> {
        for PendingActivation { record, variables } in pending {
            self.take_deferred_record(record.parent_key, record.key);
            if let Some(variables) = variables {
                if self.state.variables.get_temporary_variables(record.key).is_none() {
                    self.state.variables.set_temporary_variables(record.key, variables);
                }
            }
            self.spawn_token(record.value.flow_scope_key)?;
            self.append_element_command(record.key, record.intent, record.value);
        }
        Ok(())
    }
}
