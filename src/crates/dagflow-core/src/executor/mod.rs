//! Concurrent execution of dependency graphs
//!
//! [`Executor`] is an immutable factory over a finished [`Graph`]: every call
//! to [`execute`](Executor::execute) owns a fresh root scope and fresh
//! bookkeeping, so one executor can serve any number of concurrent runs.
//!
//! A run walks waves of zero-in-degree nodes with maximum concurrency,
//! resolves each node's kwargs from its call scope by inheritance, fans loop
//! nodes out across their loop inputs, and writes every result into the scope
//! tree it returns.
//!
//! # Example
//!
//! ```rust
//! use dagflow_core::{Executor, GraphBuilder, Node};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> dagflow_core::error::Result<()> {
//! let source = Node::async_fn("source", |_| async { Ok(json!("a")) });
//! let sink = Node::sync_fn("sink", |args| {
//!     Ok(json!(format!("b:{}", args["dep"].as_str().unwrap())))
//! });
//!
//! let mut builder = GraphBuilder::new();
//! builder.add_edge(&source, &sink, "dep")?;
//!
//! let root = Executor::new(builder.build()).execute().await?;
//! assert_eq!(root.get(&sink).unwrap().as_value(), Some(&json!("b:a")));
//! # Ok(())
//! # }
//! ```
//!
//! # Targets, progress, cancellation
//!
//! [`ExecuteOptions`] selects a sub-DAG by target set (backward reachability;
//! nothing outside it runs), installs a [`ProgressVisitor`], and supplies a
//! [`CancellationToken`]. On cancel the run stops issuing invocations,
//! cancels in-flight async callables cooperatively, and returns
//! [`DagError::Cancelled`](crate::DagError::Cancelled) - never a partial
//! scope.

mod progress;
mod run;

pub use progress::{ProgressVisitor, TracingProgress};

use crate::error::Result;
use crate::graph::Graph;
use crate::node::Node;
use crate::scope::Scope;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Options for one run.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Execute only the backward-reachable sub-DAG of these nodes; empty
    /// selects the whole graph.
    pub targets: Vec<Node>,
    /// Visitor notified with the completed/total call counters.
    pub progress: Option<Arc<dyn ProgressVisitor>>,
    /// External cancel signal for the run.
    pub cancel: CancellationToken,
}

impl ExecuteOptions {
    /// Options selecting the whole graph, with no progress visitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the run to the backward-reachable sub-DAG of `targets`.
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = Node>) -> Self {
        self.targets = targets.into_iter().collect();
        self
    }

    /// Install a progress visitor.
    pub fn with_progress(mut self, visitor: Arc<dyn ProgressVisitor>) -> Self {
        self.progress = Some(visitor);
        self
    }

    /// Supply an external cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Immutable execution factory over a dependency graph.
#[derive(Clone, Debug)]
pub struct Executor {
    graph: Graph,
}

impl Executor {
    /// Create an executor for `graph`.
    pub fn new(graph: Graph) -> Self {
        Executor { graph }
    }

    /// The graph this executor runs.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Execute the whole graph with default options.
    pub async fn execute(&self) -> Result<Scope> {
        self.execute_with(ExecuteOptions::new()).await
    }

    /// Execute with explicit targets, progress visitor and cancel token.
    /// Returns the run's root scope, or the first error.
    pub async fn execute_with(&self, options: ExecuteOptions) -> Result<Scope> {
        run::Run::execute(&self.graph, options).await
    }
}
