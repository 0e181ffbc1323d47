//! Typed, fluent graph construction (spec.md §4.1, §9).
//!
//! Grounded on `nvisy_runtime::definition`'s definition-time builder, which
//! accumulates node/edge definitions and only validates once, at `build()`.
//! Here the builder additionally hands back typed handles so callers get
//! compile-time element-type checking on `connect()` without the built
//! `Graph` itself needing to be generic (spec.md §9's typed-ports design
//! note, also referenced from [`super::node`]).

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};

use super::edge::Edge;
use super::hash::GraphHash;
use super::graph::Graph;
use super::node::{NodeDefinition, NodeId, NodeKind};
use crate::error::{Error, GraphValidationError};
use crate::pipe::branch::BranchOptions;
use crate::retry::handler::NodeErrorHandler;
use crate::strategy::ExecutionStrategy;

/// Implemented by every handle type returned from `GraphBuilder::add_*`, so
/// `connect()` can accept any two handles regardless of their element
/// types.
pub trait NodeHandle {
    /// The id of the underlying node.
    fn id(&self) -> NodeId;
}

/// Marker for a handle whose node produces items of type `T`.
pub trait Produces<T> {}
/// Marker for a handle whose node consumes items of type `T`.
pub trait Consumes<T> {}

macro_rules! handle {
    ($name:ident $(, $param:ident)*) => {
        /// Typed handle to a node registered with a [`GraphBuilder`].
        pub struct $name<$($param = ()),*> {
            id: NodeId,
            _marker: PhantomData<($($param,)*)>,
        }

        impl<$($param),*> $name<$($param),*> {
            fn from_id(id: NodeId) -> Self {
                Self { id, _marker: PhantomData }
            }
        }

        impl<$($param),*> NodeHandle for $name<$($param),*> {
            fn id(&self) -> NodeId {
                self.id
            }
        }
    };
}

handle!(SourceHandle, Out);
handle!(TransformHandle, In, Out);
handle!(JoinHandle, T, Out);
handle!(AggregateHandle, In, Out);
handle!(SinkHandle, In);

impl<Out> Produces<Out> for SourceHandle<Out> {}
impl<In, Out> Consumes<In> for TransformHandle<In, Out> {}
impl<In, Out> Produces<Out> for TransformHandle<In, Out> {}
impl<T, Out> Consumes<T> for JoinHandle<T, Out> {}
impl<T, Out> Produces<Out> for JoinHandle<T, Out> {}
impl<In, Out> Consumes<In> for AggregateHandle<In, Out> {}
impl<In, Out> Produces<Out> for AggregateHandle<In, Out> {}
impl<In> Consumes<In> for SinkHandle<In> {}

/// Accumulates node and edge definitions, validating and freezing them into
/// a [`Graph`] only once, at [`Self::build`] (spec.md §4.1).
pub struct GraphBuilder {
    nodes: HashMap<NodeId, NodeDefinition>,
    node_order: Vec<NodeId>,
    edges: Vec<Edge>,
    preconfigured: HashMap<NodeId, Arc<dyn Any + Send + Sync>>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            node_order: Vec::new(),
            edges: Vec::new(),
            preconfigured: HashMap::new(),
        }
    }

    fn insert(&mut self, def: NodeDefinition) -> NodeId {
        let id = def.id;
        self.node_order.push(id);
        self.nodes.insert(id, def);
        id
    }

    /// Registers a source node producing items of type `Out`.
    pub fn add_source<Out: 'static>(&mut self, name: impl Into<String>) -> SourceHandle<Out> {
        let handle = self.add_source_with_id(NodeId::new(), name, std::any::type_name::<Out>());
        SourceHandle::from_id(handle.id())
    }

    /// Registers a source node with an explicit id and output type name;
    /// used by tests that need deterministic ids.
    pub fn add_source_with_id(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        output_type: &'static str,
    ) -> SourceHandle<()> {
        let def = NodeDefinition {
            id,
            name: name.into(),
            kind: NodeKind::Source,
            input_type: None,
            output_type: Some(output_type),
            execution_strategy: ExecutionStrategy::Sequential,
            error_handler: None,
            retry_policy: None,
            branch_options: BranchOptions::default(),
        };
        self.insert(def);
        SourceHandle::from_id(id)
    }

    /// Registers a transform node mapping `In` items to `Out` items.
    pub fn add_transform<In: 'static, Out: 'static>(
        &mut self,
        name: impl Into<String>,
        strategy: ExecutionStrategy,
    ) -> TransformHandle<In, Out> {
        let handle = self.add_transform_with_id(
            NodeId::new(),
            name,
            std::any::type_name::<In>(),
            std::any::type_name::<Out>(),
            strategy,
        );
        TransformHandle::from_id(handle.id())
    }

    /// Registers a transform node with an explicit id and type names.
    pub fn add_transform_with_id(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        input_type: &'static str,
        output_type: &'static str,
        strategy: ExecutionStrategy,
    ) -> TransformHandle<(), ()> {
        let def = NodeDefinition {
            id,
            name: name.into(),
            kind: NodeKind::Transform,
            input_type: Some(input_type),
            output_type: Some(output_type),
            execution_strategy: strategy,
            error_handler: None,
            retry_policy: None,
            branch_options: BranchOptions::default(),
        };
        self.insert(def);
        TransformHandle::from_id(id)
    }

    /// Registers a join node combining multiple `T`-typed input streams
    /// into a single `Out`-typed stream. All join inputs share one element
    /// type — a deliberate simplification over heterogeneous per-port types
    /// (see `DESIGN.md`).
    pub fn add_join<T: 'static, Out: 'static>(
        &mut self,
        name: impl Into<String>,
    ) -> JoinHandle<T, Out> {
        let def = NodeDefinition {
            id: NodeId::new(),
            name: name.into(),
            kind: NodeKind::Join,
            input_type: Some(std::any::type_name::<T>()),
            output_type: Some(std::any::type_name::<Out>()),
            execution_strategy: ExecutionStrategy::Sequential,
            error_handler: None,
            retry_policy: None,
            branch_options: BranchOptions::default(),
        };
        let id = self.insert(def);
        JoinHandle::from_id(id)
    }

    /// Registers an aggregate node.
    pub fn add_aggregate<In: 'static, Out: 'static>(
        &mut self,
        name: impl Into<String>,
    ) -> AggregateHandle<In, Out> {
        let def = NodeDefinition {
            id: NodeId::new(),
            name: name.into(),
            kind: NodeKind::Aggregate,
            input_type: Some(std::any::type_name::<In>()),
            output_type: Some(std::any::type_name::<Out>()),
            execution_strategy: ExecutionStrategy::Sequential,
            error_handler: None,
            retry_policy: None,
            branch_options: BranchOptions::default(),
        };
        let id = self.insert(def);
        AggregateHandle::from_id(id)
    }

    /// Registers a sink node consuming `In` items.
    pub fn add_sink<In: 'static>(&mut self, name: impl Into<String>) -> SinkHandle<In> {
        let handle = self.add_sink_with_id(NodeId::new(), name, std::any::type_name::<In>());
        SinkHandle::from_id(handle.id())
    }

    /// Registers a sink node with an explicit id and input type name.
    pub fn add_sink_with_id(
        &mut self,
        id: NodeId,
        name: impl Into<String>,
        input_type: &'static str,
    ) -> SinkHandle<()> {
        let def = NodeDefinition {
            id,
            name: name.into(),
            kind: NodeKind::Sink,
            input_type: Some(input_type),
            output_type: None,
            execution_strategy: ExecutionStrategy::Sequential,
            error_handler: None,
            retry_policy: None,
            branch_options: BranchOptions::default(),
        };
        self.insert(def);
        SinkHandle::from_id(id)
    }

    /// Connects `from`'s output to `to`'s input with no named ports.
    pub fn connect(
        &mut self,
        from: &impl NodeHandle,
        to: &impl NodeHandle,
    ) -> Result<(), Error> {
        self.edges.push(Edge::new(from.id(), to.id()));
        Ok(())
    }

    /// Connects `from`'s output to `to`'s input, naming the source and/or
    /// target port (used to disambiguate join inputs, per spec.md §6).
    pub fn connect_ports(
        &mut self,
        from: &impl NodeHandle,
        to: &impl NodeHandle,
        source_port: Option<&str>,
        target_port: Option<&str>,
    ) -> Result<(), Error> {
        let mut builder = Edge::builder().with_source(from.id()).with_target(to.id());
        if let Some(p) = source_port {
            builder = builder.with_source_port(p);
        }
        if let Some(p) = target_port {
            builder = builder.with_target_port(p);
        }
        let edge = builder
            .build()
            .map_err(|message| Error::Configuration(message.to_string()))?;
        self.edges.push(edge);
        Ok(())
    }

    /// Overrides the execution strategy for an already-registered node.
    pub fn set_execution_strategy(&mut self, handle: &impl NodeHandle, strategy: ExecutionStrategy) {
        if let Some(def) = self.nodes.get_mut(&handle.id()) {
            def.execution_strategy = strategy;
        }
    }

    /// Sets the error handler for an already-registered node.
    pub fn set_error_handler(
        &mut self,
        handle: &impl NodeHandle,
        handler: Arc<dyn NodeErrorHandler>,
    ) {
        if let Some(def) = self.nodes.get_mut(&handle.id()) {
            def.error_handler = Some(handler);
        }
    }

    /// Sets the retry policy for an already-registered node, consulted only
    /// when that node's error handler returns `NodeErrorDecision::Retry`.
    pub fn set_retry_policy(&mut self, handle: &impl NodeHandle, policy: crate::retry::policy::RetryPolicy) {
        if let Some(def) = self.nodes.get_mut(&handle.id()) {
            def.retry_policy = Some(policy);
        }
    }

    /// Sets branch (multicast) options for an already-registered node.
    pub fn with_branch_options(&mut self, handle: &impl NodeHandle, options: BranchOptions) {
        if let Some(def) = self.nodes.get_mut(&handle.id()) {
            def.branch_options = options;
        }
    }

    /// Registers a preconfigured concrete node instance (e.g. an
    /// already-constructed connector) to be used instead of re-constructing
    /// one during compilation.
    pub fn add_preconfigured_node_instance(
        &mut self,
        handle: &impl NodeHandle,
        instance: Arc<dyn Any + Send + Sync>,
    ) {
        self.preconfigured.insert(handle.id(), instance);
    }

    /// Validates and freezes the accumulated definitions into a [`Graph`].
    pub fn build(self) -> Result<Graph, Error> {
        for def in self.nodes.values() {
            if !def.check_port_invariant() {
                return Err(GraphValidationError::TypeMismatch {
                    from: def.id,
                    to: def.id,
                    output_type: def.output_type.unwrap_or("<none>").to_string(),
                    input_type: def.input_type.unwrap_or("<none>").to_string(),
                }
                .into());
            }
        }

        super::validate::validate(&self.nodes, &self.node_order, &self.edges)?;

        let mut topology = DiGraph::<NodeId, ()>::new();
        let mut node_index: HashMap<NodeId, NodeIndex> = HashMap::with_capacity(self.nodes.len());
        for id in &self.node_order {
            node_index.insert(*id, topology.add_node(*id));
        }
        for edge in &self.edges {
            topology.add_edge(node_index[&edge.source], node_index[&edge.target], ());
        }

        let hash = GraphHash::compute(self.nodes.values(), self.edges.iter());

        Ok(Graph {
            topology,
            node_index,
            nodes: self.nodes,
            node_order: self.node_order,
            edges: self.edges,
            preconfigured: self.preconfigured,
            hash,
        })
    }
}
