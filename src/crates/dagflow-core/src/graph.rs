//! Immutable dependency graph consumed by the executor
//!
//! A [`Graph`] is the finished, validated DAG produced by
//! [`GraphBuilder`](crate::GraphBuilder). It is a cheap-clone handle over
//! shared storage; all mutation happens in the builder, so a graph can be
//! executed concurrently from as many runs as the caller likes.
//!
//! Edges are multi-edges: one node pair may carry several edges as long as
//! their kwarg names differ. The executor's scheduling works on *distinct*
//! neighbors - [`Graph::in_degree`] counts distinct predecessors and
//! completion decrements once per distinct successor - while argument
//! resolution walks every parallel edge so each kwarg binds.
//!
//! [`Graph::backward_reachable`] derives the per-run flow graph: the subgraph
//! induced by walking predecessors from a target set.

use crate::error::{DagError, Result};
use crate::node::{Node, NodeId};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Pure function applied to an upstream value before it is bound to the
/// downstream kwarg.
pub type Extractor = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Edge payload stored in the graph.
#[derive(Clone)]
pub(crate) struct EdgeMeta {
    pub(crate) kwarg: String,
    pub(crate) looped: bool,
    pub(crate) extractor: Option<Extractor>,
    /// Admission order, used to keep edge-derived iteration deterministic.
    pub(crate) seq: usize,
}

/// One in-edge of a node, as seen by argument resolution.
#[derive(Clone)]
pub struct InEdge {
    /// Upstream node supplying the value
    pub pred: Node,
    /// Keyword name the downstream callable receives
    pub kwarg: String,
    /// Whether the downstream fans out across this value
    pub looped: bool,
    /// Optional projection applied before binding
    pub extractor: Option<Extractor>,
}

impl fmt::Debug for InEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InEdge")
            .field("pred", &self.pred.name())
            .field("kwarg", &self.kwarg)
            .field("looped", &self.looped)
            .field("extractor", &self.extractor.as_ref().map(|_| "<function>"))
            .finish()
    }
}

pub(crate) struct GraphInner {
    pub(crate) dag: StableDiGraph<Node, EdgeMeta>,
    pub(crate) index: HashMap<NodeId, NodeIndex>,
}

/// Immutable multi-edge DAG handle.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    pub(crate) fn from_parts(dag: StableDiGraph<Node, EdgeMeta>, index: HashMap<NodeId, NodeIndex>) -> Self {
        Graph {
            inner: Arc::new(GraphInner { dag, index }),
        }
    }

    fn idx(&self, node: &Node) -> Option<NodeIndex> {
        self.inner.index.get(&node.id()).copied()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    /// True when the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    /// True when the node is part of this graph.
    pub fn contains(&self, node: &Node) -> bool {
        self.inner.index.contains_key(&node.id())
    }

    /// All nodes, in admission order.
    pub fn nodes(&self) -> Vec<Node> {
        let mut indices: Vec<NodeIndex> = self.inner.index.values().copied().collect();
        indices.sort();
        indices
            .into_iter()
            .map(|ix| self.inner.dag[ix].clone())
            .collect()
    }

    /// First node with the given display name, if any.
    pub fn node_by_name(&self, name: &str) -> Option<Node> {
        self.nodes().into_iter().find(|n| n.name() == name)
    }

    /// Every in-edge of `node`, in admission order. Parallel edges from the
    /// same predecessor appear once per kwarg.
    pub fn in_edges(&self, node: &Node) -> Vec<InEdge> {
        let Some(ix) = self.idx(node) else {
            return Vec::new();
        };
        let mut edges: Vec<(usize, InEdge)> = self
            .inner
            .dag
            .edges_directed(ix, Direction::Incoming)
            .map(|e| {
                let meta = e.weight();
                (
                    meta.seq,
                    InEdge {
                        pred: self.inner.dag[e.source()].clone(),
                        kwarg: meta.kwarg.clone(),
                        looped: meta.looped,
                        extractor: meta.extractor.clone(),
                    },
                )
            })
            .collect();
        edges.sort_by_key(|(seq, _)| *seq);
        edges.into_iter().map(|(_, e)| e).collect()
    }

    /// Distinct predecessors of `node`, ordered by first in-edge admission.
    pub fn predecessors(&self, node: &Node) -> Vec<Node> {
        let mut seen = HashSet::new();
        self.in_edges(node)
            .into_iter()
            .filter(|e| seen.insert(e.pred.id()))
            .map(|e| e.pred)
            .collect()
    }

    /// Distinct successors of `node`, ordered by first out-edge admission.
    pub fn successors(&self, node: &Node) -> Vec<Node> {
        let Some(ix) = self.idx(node) else {
            return Vec::new();
        };
        let mut edges: Vec<(usize, Node)> = self
            .inner
            .dag
            .edges_directed(ix, Direction::Outgoing)
            .map(|e| (e.weight().seq, self.inner.dag[e.target()].clone()))
            .collect();
        edges.sort_by_key(|(seq, _)| *seq);
        let mut seen = HashSet::new();
        edges
            .into_iter()
            .filter(|(_, n)| seen.insert(n.id()))
            .map(|(_, n)| n)
            .collect()
    }

    /// Number of distinct predecessors.
    pub fn in_degree(&self, node: &Node) -> usize {
        self.predecessors(node).len()
    }

    /// Loop variables of `node`: the `(kwarg, predecessor)` pairs of its loop
    /// edges, in admission order. This order is the order the node's loop
    /// strategy receives the sequences in.
    pub fn loop_vars(&self, node: &Node) -> Vec<(String, Node)> {
        self.in_edges(node)
            .into_iter()
            .filter(|e| e.looped)
            .map(|e| (e.kwarg, e.pred))
            .collect()
    }

    /// Derive the flow graph for a run: the subgraph induced by walking
    /// predecessors from `targets`. An empty target set selects the whole
    /// graph (and returns this very handle). Unknown targets fail with
    /// [`DagError::MissingTarget`].
    pub fn backward_reachable(&self, targets: &[Node]) -> Result<Graph> {
        if targets.is_empty() {
            return Ok(self.clone());
        }

        let mut keep: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        for target in targets {
            let ix = self.idx(target).ok_or_else(|| DagError::MissingTarget {
                name: target.name().to_string(),
            })?;
            if keep.insert(ix) {
                queue.push_back(ix);
            }
        }
        while let Some(ix) = queue.pop_front() {
            for pred in self.inner.dag.neighbors_directed(ix, Direction::Incoming) {
                if keep.insert(pred) {
                    queue.push_back(pred);
                }
            }
        }

        let mut dag = self.inner.dag.clone();
        dag.retain_nodes(|_, ix| keep.contains(&ix));
        let index = self
            .inner
            .index
            .iter()
            .filter(|(_, ix)| keep.contains(ix))
            .map(|(id, ix)| (*id, *ix))
            .collect();
        Ok(Graph::from_parts(dag, index))
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.len())
            .field("edges", &self.inner.dag.edge_count())
            .finish()
    }
}
