//! Compiles a validated [`crate::graph::Graph`] into a [`CompiledGraph`].
//!
//! Grounded on `nvisy_runtime::engine::compiler::WorkflowCompiler::compile`'s
//! phase ordering: the graph is already validated by the time it reaches
//! here (`GraphBuilder::build` runs the five validation passes), so
//! compilation is purely a resolve step — one [`NodeExecutionPlan`] per
//! node, carrying the defaults and preconfigured instances the runner needs.

use std::collections::HashMap;

use crate::graph::{Graph, GraphHash, NodeId};

use super::node_plan::NodeExecutionPlan;

/// A graph's nodes, resolved into execution plans, plus the hash the plan
/// was compiled from (used as the [`super::cache::PlanCache`] key).
pub struct CompiledGraph {
    /// The graph hash this plan was compiled from.
    pub graph_hash: GraphHash,
    plans: HashMap<NodeId, NodeExecutionPlan>,
}

impl CompiledGraph {
    /// Looks up the execution plan for a node.
    pub fn plan(&self, id: NodeId) -> Option<&NodeExecutionPlan> {
        self.plans.get(&id)
    }

    /// Iterates over all plans.
    pub fn plans(&self) -> impl Iterator<Item = &NodeExecutionPlan> {
        self.plans.values()
    }
}

/// Compiles `graph` into a [`CompiledGraph`]. The graph is assumed already
/// validated (produced via [`crate::graph::GraphBuilder::build`]); this
/// function does not re-run the validation passes.
pub fn compile(graph: &Graph) -> CompiledGraph {
    let plans = graph
        .nodes()
        .map(|def| {
            let instance = graph.preconfigured_instance(def.id).cloned();
            let plan = NodeExecutionPlan::from_definition(def, def.retry_policy.clone(), instance);
            (def.id, plan)
        })
        .collect();

    CompiledGraph {
        graph_hash: graph.hash(),
        plans,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    #[test]
    fn compiles_one_plan_per_node() {
        let mut b = GraphBuilder::new();
        let src = b.add_source::<i64>("source");
        let sink = b.add_sink::<i64>("sink");
        b.connect(&src, &sink).unwrap();
        let graph = b.build().unwrap();

        let compiled = compile(&graph);
        assert_eq!(compiled.plans().count(), 2);
        assert_eq!(compiled.graph_hash, graph.hash());
    }
}
