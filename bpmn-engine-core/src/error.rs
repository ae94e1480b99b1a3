use crate::types::{Key, ProcessInstanceIntent, NO_KEY};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Fatal processing errors ──────────────────────────────────

/// Invariant violations. Processing of the current record is aborted and every
/// state change it made is rolled back.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("expected to take transition to '{to:?}' but element instance {key} is in state '{from:?}'")]
    IllegalTransition {
        key: Key,
        from: ProcessInstanceIntent,
        to: ProcessInstanceIntent,
    },

    #[error("expected to re-enter '{intent:?}' for element instance {key} only while resolving an incident")]
    UnexpectedReentry { key: Key, intent: ProcessInstanceIntent },

    #[error("expected element instance with key {0} to exist")]
    ElementInstanceNotFound(Key),

    #[error("expected process with key {0} to be deployed")]
    ProcessNotFound(Key),

    #[error("expected element '{element_id}' to exist in process '{process_id}'")]
    ElementNotFound {
        process_id: String,
        element_id: String,
    },

    #[error("counter '{counter}' of element instance {key} would become negative")]
    CounterUnderflow { key: Key, counter: &'static str },

    #[error("no container processor registered for {0}")]
    NoContainerProcessor(String),

    #[error("expected {expected} record but got {actual}")]
    UnexpectedRecord {
        expected: &'static str,
        actual: String,
    },

    #[error("job {key}: {reason}")]
    IllegalJobState { key: Key, reason: String },

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;

// ─── Recoverable failures ─────────────────────────────────────

/// Incident taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    ExtractValueError,
    ConditionError,
    IoMappingError,
    CalledElementError,
    UnhandledErrorEvent,
    JobNoRetries,
    UnknownError,
}

/// A recoverable failure. Always ends up as an incident pinned at `variable_scope_key`.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{error_type:?}: {message}")]
pub struct Failure {
    pub message: String,
    pub error_type: ErrorType,
    /// `NO_KEY` means "the element instance the failure happened at".
    pub variable_scope_key: Key,
}

impl Failure {
    pub fn new(message: impl Into<String>, error_type: ErrorType) -> Self {
        Self {
            message: message.into(),
            error_type,
            variable_scope_key: NO_KEY,
        }
    }

    pub fn with_scope(mut self, variable_scope_key: Key) -> Self {
        self.variable_scope_key = variable_scope_key;
        self
    }
}

pub type FailureResult<T> = Result<T, Failure>;

// ─── Engine API errors ────────────────────────────────────────

/// Errors returned by the [`Engine`](crate::engine::Engine) API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The command was written and rejected; the log holds the rejection record.
    #[error("command rejected: {reason}")]
    Rejected { position: u64, reason: String },

    /// A fatal error aborted processing; state was rolled back to before the command.
    #[error("processing aborted at position {position}: {source}")]
    Processing {
        position: u64,
        #[source]
        source: ProcessingError,
    },

    #[error("expected a {expected} follow-up of the command at position {position}")]
    MissingFollowUp { position: u64, expected: &'static str },

    #[error("no process instance with key {0}")]
    ProcessInstanceNotFound(Key),

    #[error("deployment failed: {0}")]
    Deployment(#[from] anyhow::Error),

    /// The partition task is gone.
    #[error("partition {0} is closed")]
    PartitionClosed(u16),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_defaults_to_no_scope() {
        let failure = Failure::new("no variable 'x'", ErrorType::ExtractValueError);
        assert_eq!(failure.variable_scope_key, NO_KEY);
        assert_eq!(failure.with_scope(7).variable_scope_key, 7);
    }

    #[test]
    fn test_illegal_transition_message() {
        let err = ProcessingError::IllegalTransition {
            key: 3,
            from: ProcessInstanceIntent::ElementCompleted,
            to: ProcessInstanceIntent::ElementActivated,
        };
        assert!(err.to_string().contains("element instance 3"));
    }

    #[test]
    fn test_engine_error_keeps_processing_source() {
        let err = EngineError::Processing {
            position: 12,
            source: ProcessingError::ElementInstanceNotFound(4),
        };
        assert!(err.to_string().contains("position 12"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
