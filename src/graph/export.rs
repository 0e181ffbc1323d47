//! Diagram export for a built [`super::Graph`] (spec.md §6).
//!
//! Two formats: a Mermaid `graph TD` diagram and a plain-text adjacency
//! listing for logs/diagnostics where a renderer isn't available.

use std::fmt::Write as _;

use super::graph::Graph;

fn mermaid_id(id: impl std::fmt::Display) -> String {
    id.to_string().replace(['-', ':'], "_")
}

fn escape_label(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders `graph` as a Mermaid flowchart (`graph TD`).
///
/// Node labels are `"<name> : <kind>"`; edge labels follow
/// [`super::edge::Edge::port_label`]'s rules, omitted entirely when `None`.
pub fn to_mermaid(graph: &Graph) -> String {
    let mut out = String::from("graph TD\n");
    for node in graph.nodes() {
        let label = escape_label(&format!("{} : {}", node.name, node.kind));
        let _ = writeln!(out, "    {}[\"{}\"]", mermaid_id(node.id), label);
    }
    for edge in graph.edges() {
        let from = mermaid_id(edge.source);
        let to = mermaid_id(edge.target);
        match edge.port_label() {
            Some(label) => {
                let _ = writeln!(out, "    {from} -->|\"{}\"| {to}", escape_label(&label));
            }
            None => {
                let _ = writeln!(out, "    {from} --> {to}");
            }
        }
    }
    out
}

/// Renders `graph` as a plain-text adjacency listing, useful in logs.
pub fn to_text(graph: &Graph) -> String {
    let mut out = String::new();
    for node in graph.nodes() {
        let _ = writeln!(out, "{} ({}: {})", node.name, node.id, node.kind);
        for succ in graph.successors(node.id) {
            if let Some(succ_def) = graph.node(succ) {
                let _ = writeln!(out, "  -> {}", succ_def.name);
            }
        }
    }
    out
}
