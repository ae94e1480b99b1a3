use crate::behavior::BpmnBehaviors;
use crate::error::ProcessingResult;
use crate::records::{Record, RecordValue, VariableDocumentRecord, VariableUpdateSemantics};
use crate::types::*;

/// Set variables from outside on an element instance scope.
pub(super) fn update_variable_document(
    b: &mut BpmnBehaviors<'_>,
    command: &Record,
    request: &VariableDocumentRecord,
) -> ProcessingResult<()> {
    let Some(scope) = b.get_element_instance(request.scope_key) else {
        b.reject(
            command,
            &format!(
                "Expected to update variables for element with key '{}', but no such element was found",
                request.scope_key
            ),
        );
        return Ok(());
    };
    match request.update_semantics {
        VariableUpdateSemantics::Local => {
            b.merge_local_document(&scope.value, request.scope_key, request.variables.clone())?
        }
        VariableUpdateSemantics::Propagate => {
            b.merge_document(&scope.value, request.scope_key, request.variables.clone())?
        }
    }
    let key = b.next_key();
    b.append_event(
        key,
        Intent::VariableDocument(VariableDocumentIntent::Updated),
        RecordValue::VariableDocument(request.clone()),
    )
}
