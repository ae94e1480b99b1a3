//! Partition state: keyed stores mutated by event appliers and behaviors.
//!
//! Every store holds plain data addressed by integer keys. The engine snapshots
//! the whole [`EngineState`] before a command and restores it if processing fails.

mod appliers;
pub mod element_instance;
pub mod event_scope;
pub mod incident;
pub mod job;
pub mod message;
pub mod message_subscription;
pub mod process;
pub mod timer;
pub mod variable;

pub use element_instance::{DeferredRecord, ElementInstance, ElementInstanceStore, Purpose, Removal};
pub use event_scope::{EventScopeInstance, EventScopeStore, EventTrigger};
pub use incident::{IncidentStore, MISSING_INCIDENT};
pub use job::{JobState, JobStore};
pub use message::MessageStore;
pub use message_subscription::{MessageStartEventSubscription, MessageSubscriptionStore};
pub use process::{DeployedProcess, ProcessRepository};
pub use timer::{TimerInstance, TimerStore};
pub use variable::{VariableInstance, VariableStore};

use crate::keygen::KeyGenerator;

#[derive(Clone, Debug, Default)]
pub struct EngineState {
    pub keys: KeyGenerator,
    pub processes: ProcessRepository,
    pub element_instances: ElementInstanceStore,
    pub event_scopes: EventScopeStore,
    pub variables: VariableStore,
    pub jobs: JobStore,
    pub incidents: IncidentStore,
    pub timers: TimerStore,
    pub messages: MessageStore,
    pub message_subscriptions: MessageSubscriptionStore,
}

impl EngineState {
    pub fn new(partition_id: u16) -> Self {
        Self {
            keys: KeyGenerator::new(partition_id),
            ..Self::default()
        }
    }

    /// True when no instance-bound data is left behind: no element instances,
    /// event scopes, variables, jobs, timers, subscriptions or deferred records.
    pub fn is_drained(&self) -> bool {
        self.element_instances.is_empty()
            && self.element_instances.deferred_len() == 0
            && self.event_scopes.is_empty()
            && self.event_scopes.trigger_count() == 0
            && self.variables.variable_count() == 0
            && self.variables.scope_count() == 0
            && self.variables.temporary_count() == 0
            && self.jobs.is_empty()
            && self.timers.is_empty()
            && self.message_subscriptions.is_empty()
    }
}
