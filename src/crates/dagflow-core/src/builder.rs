//! Graph admission API
//!
//! [`GraphBuilder`] is the only way to construct a [`Graph`]. Both invariants
//! the executor relies on are enforced here, synchronously, at the admission
//! call that would break them:
//!
//! - the graph stays acyclic - an edge that closes a cycle is rejected with
//!   [`DagError::CyclicDependency`] and the graph keeps its previous shape;
//! - kwarg names are unique among the in-edges of a node;
//!   [`DagError::DuplicateKwarg`] otherwise.
//!
//! # Example
//!
//! ```rust
//! use dagflow_core::{EdgeOptions, GraphBuilder, Node};
//! use serde_json::json;
//!
//! let items = Node::async_fn("items", |_| async { Ok(json!([1, 2, 3])) });
//! let double = Node::sync_fn("double", |args| {
//!     Ok(json!(args["x"].as_i64().unwrap() * 2))
//! });
//!
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_edge_with(&items, &double, "x", EdgeOptions::looped())
//!     .unwrap();
//! let graph = builder.build();
//! assert_eq!(graph.len(), 2);
//! ```

use crate::error::{DagError, Result};
use crate::graph::{EdgeMeta, Extractor, Graph};
use crate::node::{Node, NodeId};
use petgraph::algo::is_cyclic_directed;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Options for [`GraphBuilder::add_edge_with`].
#[derive(Clone, Default)]
pub struct EdgeOptions {
    /// Mark the edge as a loop edge: the downstream node fans out across the
    /// elements of the upstream value.
    pub looped: bool,
    /// Projection applied to the upstream value before binding.
    pub extractor: Option<Extractor>,
}

impl EdgeOptions {
    /// A plain direct edge.
    pub fn direct() -> Self {
        Self::default()
    }

    /// A loop edge.
    pub fn looped() -> Self {
        EdgeOptions {
            looped: true,
            extractor: None,
        }
    }

    /// Attach an extractor.
    pub fn with_extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(f));
        self
    }
}

/// Mutable builder producing immutable [`Graph`] values.
pub struct GraphBuilder {
    dag: StableDiGraph<Node, EdgeMeta>,
    index: HashMap<NodeId, NodeIndex>,
    next_seq: usize,
}

impl GraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        GraphBuilder {
            dag: StableDiGraph::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Register a node. Re-registering the same node is a no-op; edges
    /// register their endpoints automatically, so this is only needed for
    /// nodes with no edges at all.
    pub fn add_node(&mut self, node: &Node) {
        self.ensure_node(node);
    }

    /// Add a direct edge: `to` receives `from`'s value as kwarg `kwarg`.
    pub fn add_edge(&mut self, from: &Node, to: &Node, kwarg: &str) -> Result<()> {
        self.add_edge_with(from, to, kwarg, EdgeOptions::direct())
    }

    /// Add an edge with explicit options (loop flag, extractor).
    pub fn add_edge_with(
        &mut self,
        from: &Node,
        to: &Node,
        kwarg: &str,
        options: EdgeOptions,
    ) -> Result<()> {
        let from_ix = self.ensure_node(from);
        let to_ix = self.ensure_node(to);

        let duplicate = self
            .dag
            .edges_directed(to_ix, Direction::Incoming)
            .any(|e| e.weight().kwarg == kwarg);
        if duplicate {
            return Err(DagError::DuplicateKwarg {
                node: to.name().to_string(),
                kwarg: kwarg.to_string(),
            });
        }

        let edge = self.dag.add_edge(
            from_ix,
            to_ix,
            EdgeMeta {
                kwarg: kwarg.to_string(),
                looped: options.looped,
                extractor: options.extractor,
                seq: self.next_seq,
            },
        );
        if is_cyclic_directed(&self.dag) {
            let _ = self.dag.remove_edge(edge);
            return Err(DagError::CyclicDependency {
                from: from.name().to_string(),
                to: to.name().to_string(),
            });
        }
        self.next_seq += 1;
        Ok(())
    }

    /// Finish construction.
    pub fn build(self) -> Graph {
        Graph::from_parts(self.dag, self.index)
    }

    fn ensure_node(&mut self, node: &Node) -> NodeIndex {
        if let Some(ix) = self.index.get(&node.id()) {
            return *ix;
        }
        let ix = self.dag.add_node(node.clone());
        self.index.insert(node.id(), ix);
        ix
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
