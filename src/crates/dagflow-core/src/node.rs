//! Nodes: user callables plus per-node execution policy
//!
//! A [`Node`] wraps a user computation together with the policy the executor
//! needs: the loop strategy applied when the node fans out, the team-vs-solo
//! race flag, and whether dumps must redact its value. Nodes are cheap-clone
//! handles; identity is the [`NodeId`] assigned at construction and nodes are
//! never compared structurally.
//!
//! The computation itself lives behind the [`Callable`] trait. Three
//! constructors cover the common cases:
//!
//! - [`Node::async_fn`] - an async closure, awaited in place.
//! - [`Node::sync_fn`] - a synchronous closure cheap enough to run inline.
//! - [`Node::blocking_fn`] - a synchronous closure that blocks (CPU or IO);
//!   the executor offloads it to the blocking worker pool.
//!
//! # Example
//!
//! ```rust
//! use dagflow_core::{Node, LoopStrategy};
//! use serde_json::json;
//!
//! let fetch = Node::async_fn("fetch", |_args| async move { Ok(json!([1, 2, 3])) });
//!
//! let double = Node::sync_fn("double", |args| {
//!     let x = args["x"].as_i64().unwrap_or(0);
//!     Ok(json!(x * 2))
//! })
//! .with_loop_strategy(LoopStrategy::Zip)
//! .with_team_race(false);
//!
//! assert_ne!(fetch, double);
//! ```

use crate::error::CallError;
use crate::loops::LoopStrategy;
use crate::outcome::NodeOutput;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Named arguments passed to a node callable, keyed by kwarg name.
pub type Args = serde_json::Map<String, Value>;

/// Unique node identity. Assigned once at construction; the fixed global
/// ordering of ids is what the executor's lock discipline sorts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    fn fresh() -> Self {
        NodeId(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A node computation.
///
/// Implementations decide how the call runs: awaited in place, inline, or on
/// the blocking worker pool. The executor only sees the uniform async entry
/// point.
#[async_trait]
pub trait Callable: Send + Sync {
    /// Run the computation with the resolved named arguments.
    async fn call(&self, args: Args) -> std::result::Result<NodeOutput, CallError>;

    /// True when the call is executed on the blocking worker pool. Worker
    /// calls cannot be interrupted mid-flight, so on cancellation the
    /// executor awaits them instead of dropping them.
    fn runs_on_worker(&self) -> bool {
        false
    }
}

/// Async closure callable.
struct AsyncFn {
    f: Arc<dyn Fn(Args) -> BoxFuture<'static, std::result::Result<NodeOutput, CallError>> + Send + Sync>,
}

#[async_trait]
impl Callable for AsyncFn {
    async fn call(&self, args: Args) -> std::result::Result<NodeOutput, CallError> {
        (self.f)(args).await
    }
}

/// Synchronous closure callable, optionally offloaded to the worker pool.
struct SyncFn {
    f: Arc<dyn Fn(Args) -> std::result::Result<NodeOutput, CallError> + Send + Sync>,
    offload: bool,
}

impl SyncFn {
    fn wrap<F, T>(f: F, offload: bool) -> Self
    where
        F: Fn(Args) -> std::result::Result<T, CallError> + Send + Sync + 'static,
        T: Into<NodeOutput>,
    {
        let f: Arc<dyn Fn(Args) -> std::result::Result<NodeOutput, CallError> + Send + Sync> =
            Arc::new(move |args| f(args).map(Into::into));
        SyncFn { f, offload }
    }
}

#[async_trait]
impl Callable for SyncFn {
    async fn call(&self, args: Args) -> std::result::Result<NodeOutput, CallError> {
        if self.offload {
            let f = Arc::clone(&self.f);
            match tokio::task::spawn_blocking(move || f(args)).await {
                Ok(result) => result,
                Err(join) => Err(Box::new(join) as CallError),
            }
        } else {
            (self.f)(args)
        }
    }

    fn runs_on_worker(&self) -> bool {
        self.offload
    }
}

#[derive(Clone)]
struct NodeInner {
    id: NodeId,
    name: String,
    callable: Arc<dyn Callable>,
    loop_strategy: LoopStrategy,
    team_race: bool,
    secret: bool,
}

/// Handle to a node in a dependency graph.
///
/// Cloning is cheap and clones refer to the same node: equality and hashing
/// go through [`NodeId`]. The `with_*` builder methods are meant to be used
/// before the node is registered in a graph.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node from an explicit [`Callable`] implementation.
    pub fn new(name: impl Into<String>, callable: Arc<dyn Callable>) -> Self {
        Node {
            inner: Arc::new(NodeInner {
                id: NodeId::fresh(),
                name: name.into(),
                callable,
                loop_strategy: LoopStrategy::default(),
                team_race: true,
                secret: false,
            }),
        }
    }

    /// Create a node from an async closure.
    pub fn async_fn<F, Fut, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, CallError>> + Send + 'static,
        T: Into<NodeOutput>,
    {
        let boxed: Arc<
            dyn Fn(Args) -> BoxFuture<'static, std::result::Result<NodeOutput, CallError>>
                + Send
                + Sync,
        > = Arc::new(move |args: Args| {
            let fut = f(args);
            async move { fut.await.map(Into::into) }.boxed()
        });
        Node::new(name, Arc::new(AsyncFn { f: boxed }))
    }

    /// Create a node from a synchronous closure that runs inline.
    pub fn sync_fn<F, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> std::result::Result<T, CallError> + Send + Sync + 'static,
        T: Into<NodeOutput>,
    {
        Node::new(name, Arc::new(SyncFn::wrap(f, false)))
    }

    /// Create a node from a blocking synchronous closure, offloaded to the
    /// worker pool on every call.
    pub fn blocking_fn<F, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> std::result::Result<T, CallError> + Send + Sync + 'static,
        T: Into<NodeOutput>,
    {
        Node::new(name, Arc::new(SyncFn::wrap(f, true)))
    }

    /// Replace the loop strategy (default: Cartesian product).
    pub fn with_loop_strategy(mut self, strategy: LoopStrategy) -> Self {
        Arc::make_mut(&mut self.inner).loop_strategy = strategy;
        self
    }

    /// Set the race mode. `true` (default): fanned-out calls run as one batch
    /// behind a barrier. `false`: each fan-out call races its own descendants
    /// as an independent pipeline.
    pub fn with_team_race(mut self, team_race: bool) -> Self {
        Arc::make_mut(&mut self.inner).team_race = team_race;
        self
    }

    /// Mark the node's value as secret; [`Scope::dump`](crate::Scope::dump)
    /// replaces it with `"***"` when redaction is requested.
    pub fn with_secret(mut self, secret: bool) -> Self {
        Arc::make_mut(&mut self.inner).secret = secret;
        self
    }

    /// Node identity.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Strategy used to expand loop inputs into call tuples.
    pub fn loop_strategy(&self) -> &LoopStrategy {
        &self.inner.loop_strategy
    }

    /// Race mode flag.
    pub fn team_race(&self) -> bool {
        self.inner.team_race
    }

    /// Secrecy flag.
    pub fn secret(&self) -> bool {
        self.inner.secret
    }

    /// True when the callable runs on the blocking worker pool.
    pub fn runs_on_worker(&self) -> bool {
        self.inner.callable.runs_on_worker()
    }

    /// Run the callable with the resolved arguments. The uniform invocation
    /// surface: awaits async callables, offloads blocking ones, runs the rest
    /// inline.
    pub async fn invoke(&self, args: Args) -> std::result::Result<NodeOutput, CallError> {
        self.inner.callable.call(args).await
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("loop_strategy", &self.inner.loop_strategy)
            .field("team_race", &self.inner.team_race)
            .field("secret", &self.inner.secret)
            .finish()
    }
}
