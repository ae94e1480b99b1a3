use crate::types::{Document, Key, NO_KEY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A variable held by one scope. `key` stays the same across updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableInstance {
    pub key: Key,
    pub name: String,
    pub value: Value,
}

/// Scoped variables. Lookups walk from a scope to its ancestors; the closest
/// declaration of a name wins.
#[derive(Clone, Debug, Default)]
pub struct VariableStore {
    parents: BTreeMap<Key, Key>,
    variables: BTreeMap<(Key, String), VariableInstance>,
    temporary: BTreeMap<Key, Document>,
}

impl VariableStore {
    pub fn create_scope(&mut self, key: Key, parent_key: Key) {
        self.parents.insert(key, parent_key);
    }

    pub fn parent_scope(&self, key: Key) -> Key {
        self.parents.get(&key).copied().unwrap_or(NO_KEY)
    }

    /// Drop the scope, its local variables and its temporary variables.
    pub fn remove_scope(&mut self, key: Key) {
        self.parents.remove(&key);
        self.temporary.remove(&key);
        self.variables.retain(|(scope, _), _| *scope != key);
    }

    pub fn set_variable_local(&mut self, key: Key, scope_key: Key, name: &str, value: Value) {
        self.variables.insert(
            (scope_key, name.to_string()),
            VariableInstance {
                key,
                name: name.to_string(),
                value,
            },
        );
    }

    pub fn get_variable_local(&self, scope_key: Key, name: &str) -> Option<&VariableInstance> {
        self.variables.get(&(scope_key, name.to_string()))
    }

    pub fn get_variable(&self, scope_key: Key, name: &str) -> Option<&VariableInstance> {
        self.ancestry(scope_key)
            .find_map(|scope| self.get_variable_local(scope, name))
    }

    /// Nearest scope (starting at `scope_key`) that declares `name`.
    pub fn declaring_scope(&self, scope_key: Key, name: &str) -> Option<Key> {
        self.ancestry(scope_key)
            .find(|scope| self.get_variable_local(*scope, name).is_some())
    }

    pub fn get_variables_local_as_document(&self, scope_key: Key) -> Document {
        self.variables
            .range((scope_key, String::new())..)
            .take_while(|((scope, _), _)| *scope == scope_key)
            .map(|((_, name), var)| (name.clone(), var.value.clone()))
            .collect()
    }

    /// Everything visible at `scope_key`, closest scope winning.
    pub fn get_variables_as_document(&self, scope_key: Key) -> Document {
        let mut document = Document::new();
        for scope in self.ancestry(scope_key) {
            for (name, value) in self.get_variables_local_as_document(scope) {
                document.entry(name).or_insert(value);
            }
        }
        document
    }

    fn ancestry(&self, scope_key: Key) -> impl Iterator<Item = Key> + '_ {
        std::iter::successors(Some(scope_key), move |scope| {
            self.parents.get(scope).copied().filter(|parent| *parent != NO_KEY)
        })
    }

    // ── Temporary variables ──

    pub fn set_temporary_variables(&mut self, scope_key: Key, variables: Document) {
        if variables.is_empty() {
            return;
        }
        self.temporary.entry(scope_key).or_default().extend(variables);
    }

    pub fn get_temporary_variables(&self, scope_key: Key) -> Option<&Document> {
        self.temporary.get(&scope_key)
    }

    pub fn remove_temporary_variables(&mut self, scope_key: Key) -> Option<Document> {
        self.temporary.remove(&scope_key)
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn scope_count(&self) -> usize {
        self.parents.len()
    }

    pub fn temporary_count(&self) -> usize {
        self.temporary.len()
    }
}
