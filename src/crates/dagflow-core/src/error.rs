//! Error types for graph admission and execution
//!
//! All fallible operations in the crate return [`DagError`] through the
//! crate-wide [`Result`] alias. Admission errors (`CyclicDependency`,
//! `DuplicateKwarg`) are synchronous and local to the builder call that caused
//! them; every other kind surfaces from [`Executor::execute`](crate::Executor)
//! only.
//!
//! # Matching specific errors
//!
//! ```rust
//! use dagflow_core::error::DagError;
//!
//! fn handle(err: DagError) {
//!     match err {
//!         DagError::CyclicDependency { from, to } => {
//!             eprintln!("edge {from} -> {to} closes a cycle");
//!         }
//!         DagError::NodeExecution { node, source } => {
//!             eprintln!("node '{node}' failed: {source}");
//!         }
//!         DagError::Cancelled => {
//!             eprintln!("run was cancelled");
//!         }
//!         other => eprintln!("{other}"),
//!     }
//! }
//! ```

use thiserror::Error;

/// Boxed error produced by a user callable.
pub type CallError = Box<dyn std::error::Error + Send + Sync>;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DagError>;

/// Errors reported by graph admission and execution.
#[derive(Debug, Error)]
pub enum DagError {
    /// Adding the edge would make the graph cyclic. The edge is rejected and
    /// the graph keeps its previous shape.
    #[error("adding edge '{from}' -> '{to}' would create a cycle")]
    CyclicDependency {
        /// Display name of the upstream node of the rejected edge
        from: String,
        /// Display name of the downstream node of the rejected edge
        to: String,
    },

    /// The downstream node already has an in-edge bound to this keyword name.
    #[error("node '{node}' already receives kwarg '{kwarg}'")]
    DuplicateKwarg {
        /// Display name of the downstream node
        node: String,
        /// Keyword name that was bound twice
        kwarg: String,
    },

    /// An execution target is not part of the graph.
    #[error("target node '{name}' is not part of the graph")]
    MissingTarget {
        /// Display name of the unknown target
        name: String,
    },

    /// A user callable returned an error. The run is failed, in-flight
    /// siblings are cancelled cooperatively, and this is what `execute`
    /// returns.
    #[error("node '{node}' failed: {source}")]
    NodeExecution {
        /// Display name of the failing node
        node: String,
        /// The error produced by the callable
        #[source]
        source: CallError,
    },

    /// A node's predecessors live on unrelated scope branches. Joining
    /// independent branches would require a cross-product of their scopes;
    /// the executor refuses instead of guessing.
    #[error("node '{node}' joins unrelated scope branches; scope joining is not supported")]
    ScopeJoinUnsupported {
        /// Display name of the node whose inputs could not be reconciled
        node: String,
    },

    /// The run was cancelled through its cancellation token.
    #[error("execution cancelled")]
    Cancelled,
}

impl DagError {
    /// Wrap a user callable failure with the failing node's name.
    pub fn node_execution(node: impl Into<String>, source: CallError) -> Self {
        DagError::NodeExecution {
            node: node.into(),
            source,
        }
    }

    /// True for errors raised while building the graph, as opposed to
    /// errors raised by a run.
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            DagError::CyclicDependency { .. } | DagError::DuplicateKwarg { .. }
        )
    }
}
