//! conduit: a typed, DAG-shaped streaming data-flow pipeline framework.
//!
//! A pipeline is built from five node kinds — [`node_trait::Source`],
//! [`node_trait::Transform`], [`node_trait::Join`], [`node_trait::Aggregate`]
//! and [`node_trait::Sink`] — wired together with [`graph::GraphBuilder`],
//! compiled once via [`plan::compile`], and executed by [`runner::Runner`]
//! against a registry of [`runner::NodeBehavior`] delegates built from
//! [`runner::erase_source`]/[`runner::erase_transform`]/[`runner::erase_sink`].

pub mod ack;
pub mod aggregate;
pub mod cancel;
pub mod context;
pub mod error;
pub mod graph;
pub mod join;
pub mod node_trait;
pub mod pipe;
pub mod plan;
pub mod pool;
pub mod retry;
pub mod runner;
pub mod storage;
pub mod strategy;
pub mod testing;
pub mod window;

pub use cancel::{Cancel, CancelGuard};
pub use context::PipelineContext;
pub use error::{Error, GraphValidationError, Result};
pub use graph::{Graph, GraphBuilder};
pub use node_trait::{Aggregate, Join, Sink, Source, Transform};
pub use plan::{compile, CompiledGraph, NodeExecutionPlan, PlanCache};
pub use runner::{NodeBehavior, PipelineResult, Runner, RunnerConfig};
