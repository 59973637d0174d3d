//! # dagflow-core - concurrent dataflow execution for dependency graphs
//!
//! Build a directed acyclic graph whose nodes wrap your computations and
//! whose edges name the keyword argument each downstream node receives from
//! its upstream's result, then hand it to the [`Executor`]: it dispatches
//! nodes in topological order with maximum concurrency and returns a tree of
//! [`Scope`]s you can query by node identity.
//!
//! ## Core concepts
//!
//! - **[`Node`]** - a user callable (async, inline sync, or blocking-offloaded)
//!   plus per-node policy: loop strategy, team-vs-solo race, secrecy.
//! - **[`Graph`] / [`GraphBuilder`]** - immutable multi-edge DAG; acyclicity
//!   and kwarg uniqueness are enforced at admission, never at run time.
//! - **Loop edges** - an edge flagged with [`EdgeOptions::looped`] makes the
//!   downstream node *fan out* across the elements of the upstream sequence,
//!   one call and one child scope per element (Cartesian product across
//!   several loop edges by default, [`LoopStrategy::Zip`] or a custom
//!   strategy otherwise).
//! - **[`Scope`]** - the hierarchical result store. Children inherit their
//!   ancestors' bindings; [`Scope::collect`] gathers every value a node
//!   produced across a fan-out, in emission order.
//! - **[`IgnoreResult`]** - a sentinel return value that prunes all work
//!   downstream of the scope it was produced in, without being an error.
//!
//! ## Quick start
//!
//! ```rust
//! use dagflow_core::{EdgeOptions, Executor, GraphBuilder, Node};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> dagflow_core::error::Result<()> {
//! // items -> double (fanned out per element) -> collected at the root
//! let items = Node::async_fn("items", |_| async { Ok(json!([1, 2, 3])) });
//! let double = Node::sync_fn("double", |args| {
//!     Ok(json!(args["x"].as_i64().unwrap() * 2))
//! });
//!
//! let mut builder = GraphBuilder::new();
//! builder.add_edge_with(&items, &double, "x", EdgeOptions::looped())?;
//!
//! let root = Executor::new(builder.build()).execute().await?;
//! assert_eq!(root.collect_values(&double), vec![json!(2), json!(4), json!(6)]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution model
//!
//! A run derives its *flow graph* (the backward-reachable sub-DAG of the
//! target set), seeds a fresh root scope, and launches every zero-in-degree
//! node concurrently. When a node finishes, its results are written into the
//! scope tree and each successor whose in-degree reached zero is scheduled
//! under scopes reconciled from its predecessors' fan-outs. Nodes whose
//! predecessors sit on unrelated scope branches are refused
//! ([`DagError::ScopeJoinUnsupported`]) rather than cross-joined.
//!
//! Failure semantics: the first error wins, in-flight work is cancelled
//! cooperatively, and no partial scope is returned. External cancellation via
//! [`ExecuteOptions::with_cancel`] behaves the same way, surfacing as
//! [`DagError::Cancelled`].

pub mod builder;
pub mod error;
pub mod executor;
pub mod graph;
pub mod loops;
pub mod node;
pub mod outcome;
pub mod scope;

pub use builder::{EdgeOptions, GraphBuilder};
pub use error::{CallError, DagError};
pub use executor::{ExecuteOptions, Executor, ProgressVisitor, TracingProgress};
pub use graph::{Extractor, Graph, InEdge};
pub use loops::LoopStrategy;
pub use node::{Args, Callable, Node, NodeId};
pub use outcome::{IgnoreResult, NodeOutput};
pub use scope::{AlreadyBound, CollectFilter, Scope, ScopeId, ScopeKey, SCOPE_NAME};
