//! BPMN execution core for a single partition.
//!
//! Commands are processed one at a time against keyed in-memory state. Element
//! processors drive the lifecycle of every element instance through shared
//! behaviors; follow-up events are applied to state as they are written.
//!
//! ```rust,no_run
//! use bpmn_engine_core::{Engine, EngineConfig};
//! use bpmn_engine_core::types::Document;
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! engine.deploy_yaml(r#"
//! id: hello
//! nodes:
//!   - kind: Start
//!     id: start
//!   - kind: End
//!     id: end
//! edges:
//!   - from: start
//!     to: end
//! "#).unwrap();
//! engine.create_process_instance("hello", Document::new()).unwrap();
//! ```

// Shared vocabulary
pub mod error;
pub mod records;
pub mod types;

// Collaborators
pub mod config;
pub mod expression;
pub mod keygen;
pub mod model;
pub mod writer;

// Keyed stores and event appliers
pub mod state;

// Behaviors and element processors
pub mod behavior;
pub mod processor;

// Processing loop
pub mod engine;
pub mod partition;

pub use behavior::{BpmnBehaviors, BpmnElementContext};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EngineResult, ErrorType, Failure, ProcessingError};
pub use expression::{Expression, ExpressionEvaluator, JsonPathEvaluator};
pub use model::ProcessGraph;
pub use partition::{PartitionHandle, PartitionRunner, TickReport};
pub use state::EngineState;
pub use writer::RecordLog;
