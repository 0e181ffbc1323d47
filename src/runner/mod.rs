//! Executes a compiled [`crate::graph::Graph`] against a registry of
//! per-node [`behavior::NodeBehavior`] delegates (spec.md §4, §6).

pub mod behavior;
pub mod config;
pub mod executor;
pub mod result;

pub use behavior::{
    erase_ack_sink, erase_sink, erase_source, erase_transform, ErasedItem, ErasedPipe, NodeBehavior,
};
pub use config::RunnerConfig;
pub use executor::Runner;
pub use result::{NodeError, PipelineResult};
