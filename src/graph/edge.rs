//! Typed edges connecting nodes in a [`crate::graph::Graph`].
//!
//! Grounded on `nvisy_runtime::definition::edge::Edge` (an owned-pattern
//! `derive_builder` struct with optional port names).

use derive_builder::{Builder, UninitializedFieldError};

use super::node::NodeId;

/// Error returned by [`EdgeBuilder::build`]; derefs to `str` so callers can
/// treat it like the plain `String` error the builder previously used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeBuilderError(String);

impl std::fmt::Display for EdgeBuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for EdgeBuilderError {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<UninitializedFieldError> for EdgeBuilderError {
    fn from(err: UninitializedFieldError) -> Self {
        EdgeBuilderError(err.to_string())
    }
}

impl From<String> for EdgeBuilderError {
    fn from(err: String) -> Self {
        EdgeBuilderError(err)
    }
}

impl From<&str> for EdgeBuilderError {
    fn from(err: &str) -> Self {
        EdgeBuilderError(err.to_string())
    }
}

/// A directed edge from one node's output port to another node's input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Builder)]
#[builder(
    name = "EdgeBuilder",
    pattern = "owned",
    setter(into, strip_option, prefix = "with"),
    build_fn(validate = "Self::validate", error = "EdgeBuilderError")
)]
pub struct Edge {
    /// Source node id.
    pub source: NodeId,
    /// Target node id.
    pub target: NodeId,
    /// Optional named output port on the source node.
    #[builder(default)]
    pub source_port: Option<String>,
    /// Optional named input port on the target node.
    #[builder(default)]
    pub target_port: Option<String>,
}

impl EdgeBuilder {
    fn validate(&self) -> Result<(), EdgeBuilderError> {
        if self.source.is_none() {
            return Err("source is required".into());
        }
        if self.target.is_none() {
            return Err("target is required".into());
        }
        Ok(())
    }
}

impl Edge {
    /// Creates a simple 1-to-1 edge with no named ports.
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            source_port: None,
            target_port: None,
        }
    }

    /// Returns a builder for an edge with named ports.
    pub fn builder() -> EdgeBuilder {
        EdgeBuilder::default()
    }

    /// Formats the edge label per spec.md §6: `sourcePort -> targetPort` if
    /// both are set; whichever is set if only one is; `None` if neither is.
    pub fn port_label(&self) -> Option<String> {
        match (&self.source_port, &self.target_port) {
            (Some(s), Some(t)) => Some(format!("{s} -> {t}")),
            (Some(s), None) => Some(s.clone()),
            (None, Some(t)) => Some(t.clone()),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_source_and_target() {
        let err = Edge::builder().build().unwrap_err();
        assert!(err.contains("source"));
    }

    #[test]
    fn port_label_formats_per_spec() {
        let a = NodeId::from_u128(1);
        let b = NodeId::from_u128(2);
        let e = Edge::new(a, b);
        assert_eq!(e.port_label(), None);

        let e = Edge::builder()
            .with_source(a)
            .with_target(b)
            .with_source_port("out")
            .build()
            .unwrap();
        assert_eq!(e.port_label().as_deref(), Some("out"));

        let e = Edge::builder()
            .with_source(a)
            .with_target(b)
            .with_source_port("out")
            .with_target_port("in")
            .build()
            .unwrap();
        assert_eq!(e.port_label().as_deref(), Some("out -> in"));
    }
}
