//! Process model: YAML authoring DTOs and the compiled, immutable process graph.

pub mod dto;
pub mod graph;

pub use dto::{parse_process_yaml, ProcessDto};
pub use graph::{FlowElement, MessageDefinition, ProcessGraph, SequenceFlow};
