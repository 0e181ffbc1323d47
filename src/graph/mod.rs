//! Typed DAG construction, validation and export (spec.md §4.1, §6).

pub mod builder;
pub mod edge;
pub mod export;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod hash;
pub mod node;
pub(crate) mod validate;

pub use builder::{
    AggregateHandle, Consumes, GraphBuilder, JoinHandle, NodeHandle, Produces, SinkHandle,
    SourceHandle, TransformHandle,
};
pub use edge::{Edge, EdgeBuilder};
pub use graph::Graph;
pub use hash::GraphHash;
pub use node::{NodeDefinition, NodeId, NodeKind};
