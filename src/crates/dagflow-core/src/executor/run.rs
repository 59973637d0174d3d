//! Per-run scheduling state and the dispatch algorithm
//!
//! One [`Run`] owns everything mutable about a single execution: the flow
//! graph derived from the target set, the root scope, the in-degree and
//! scope bookkeeping, the per-node lock map, the progress counter and the
//! cancellation tokens. The [`Executor`](crate::Executor) itself stays an
//! immutable factory.
//!
//! The algorithm walks waves of zero-in-degree nodes. A finishing node
//! resolves its call scopes' arguments, invokes its callable (once, or once
//! per loop tuple), writes results into the scope tree, and then *advances*:
//! under the per-node lock discipline it decrements successor in-degrees and
//! schedules every successor that reached zero, recursively. Team-race nodes
//! put a barrier after the whole fan-out batch; solo-race nodes give every
//! call its own clone of the remaining-work view and let the earliest branch
//! race ahead through its descendants.

use crate::error::{DagError, Result};
use crate::executor::progress::ProgressCounter;
use crate::executor::ExecuteOptions;
use crate::graph::Graph;
use crate::node::{Args, Node, NodeId};
use crate::outcome::NodeOutput;
use crate::scope::{Scope, ScopeKey, SCOPE_NAME};
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// Unwind marker: the run is failing or cancelled. The actual error, if any,
/// is already recorded on the [`Run`]; callers just stop scheduling.
#[derive(Debug, Clone, Copy)]
struct Halted;

type Flow<T> = std::result::Result<T, Halted>;

/// Remaining-work bookkeeping. Team-race execution shares one view behind the
/// run's lock discipline; every solo-race branch drives its descendants in a
/// private clone.
#[derive(Clone)]
struct WorkView {
    in_degrees: HashMap<NodeId, usize>,
    scope_map: HashMap<NodeId, Vec<Scope>>,
}

/// Immutable-per-run context plus the shared bookkeeping.
pub(crate) struct Run {
    flow: Graph,
    root: Scope,
    locks: HashMap<NodeId, Arc<AsyncMutex<()>>>,
    /// Per node: itself plus its second-order predecessors, ascending by id.
    /// Sibling predecessors of a shared successor always overlap in at least
    /// one lock, which is what serializes their frontier bookkeeping.
    lock_sets: HashMap<NodeId, Vec<NodeId>>,
    progress: ProgressCounter,
    /// Child of `external`; also cancelled when the run fails internally.
    cancel: CancellationToken,
    external: CancellationToken,
    error: Mutex<Option<DagError>>,
}

#[derive(Clone)]
struct ExecCtx {
    run: Arc<Run>,
    view: Arc<Mutex<WorkView>>,
}

impl Run {
    pub(crate) async fn execute(graph: &Graph, options: ExecuteOptions) -> Result<Scope> {
        let ExecuteOptions {
            targets,
            progress,
            cancel: external,
        } = options;

        let flow = graph.backward_reachable(&targets)?;
        let nodes = flow.nodes();

        let mut locks = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            locks.insert(node.id(), Arc::new(AsyncMutex::new(())));
        }
        let mut lock_sets = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            let mut set = vec![node.id()];
            for succ in flow.successors(node) {
                for pred in flow.predecessors(&succ) {
                    if pred.id() != node.id() {
                        set.push(pred.id());
                    }
                }
            }
            set.sort();
            set.dedup();
            lock_sets.insert(node.id(), set);
        }

        let in_degrees: HashMap<NodeId, usize> =
            nodes.iter().map(|n| (n.id(), flow.in_degree(n))).collect();
        let ready: Vec<Node> = nodes
            .iter()
            .filter(|n| flow.in_degree(n) == 0)
            .cloned()
            .collect();

        let run = Arc::new(Run {
            flow,
            root: Scope::new_root(),
            locks,
            lock_sets,
            progress: ProgressCounter::new(progress),
            cancel: external.child_token(),
            external,
            error: Mutex::new(None),
        });
        let ctx = ExecCtx {
            run: Arc::clone(&run),
            view: Arc::new(Mutex::new(WorkView {
                in_degrees,
                scope_map: HashMap::new(),
            })),
        };

        tracing::info!(
            nodes = nodes.len(),
            ready = ready.len(),
            targeted = !targets.is_empty(),
            "starting run"
        );

        let root = run.root.clone();
        let results = join_all(
            ready
                .into_iter()
                .map(|node| execute_node(ctx.clone(), node, vec![root.clone()])),
        )
        .await;
        let halted = results.iter().any(std::result::Result::is_err);

        if let Some(err) = run.error.lock().take() {
            tracing::info!(error = %err, "run failed");
            return Err(err);
        }
        if halted && run.external.is_cancelled() {
            tracing::info!("run cancelled");
            return Err(DagError::Cancelled);
        }
        tracing::info!("run complete");
        Ok(root)
    }

    /// Record the first error and cancel everything in flight. Later errors
    /// are logged and discarded.
    fn fail(&self, err: DagError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                tracing::debug!(error = %err, "run failing");
                *slot = Some(err);
            } else {
                tracing::warn!(error = %err, "error after run already failing; discarded");
            }
        }
        self.cancel.cancel();
    }
}

/// Dispatch one node under its call scopes. Boxed for recursion through
/// `advance`.
fn execute_node(ctx: ExecCtx, node: Node, scopes: Vec<Scope>) -> BoxFuture<'static, Flow<()>> {
    async move {
        if ctx.run.cancel.is_cancelled() {
            return Err(Halted);
        }
        let loop_vars = ctx.run.flow.loop_vars(&node);
        tracing::debug!(node = %node.name(), call_scopes = scopes.len(), "dispatching node");

        if scopes.is_empty() {
            // Every predecessor branch was pruned: complete with zero calls
            // and cascade the prune through the successors.
            ctx.view.lock().scope_map.entry(node.id()).or_default();
            return advance(ctx, node).await;
        }

        if !node.team_race() && !loop_vars.is_empty() {
            run_solo(ctx, node, scopes, loop_vars).await
        } else {
            run_team(ctx, node, scopes, loop_vars).await
        }
    }
    .boxed()
}

/// Team race: all calls of the node, across all call scopes, complete before
/// any successor is considered.
async fn run_team(
    ctx: ExecCtx,
    node: Node,
    scopes: Vec<Scope>,
    loop_vars: Vec<(String, Node)>,
) -> Flow<()> {
    let outcomes = join_all(
        scopes
            .iter()
            .map(|scope| run_scope_team(&ctx, &node, scope, &loop_vars)),
    )
    .await;
    let mut live = Vec::new();
    for outcome in outcomes {
        live.extend(outcome?);
    }
    ctx.view
        .lock()
        .scope_map
        .entry(node.id())
        .or_default()
        .extend(live);
    advance(ctx, node).await
}

async fn run_scope_team(
    ctx: &ExecCtx,
    node: &Node,
    scope: &Scope,
    loop_vars: &[(String, Node)],
) -> Flow<Vec<Scope>> {
    let args_list = resolve_args(ctx, node, scope, loop_vars)?;
    let count = args_list.len();
    ctx.run.progress.scheduled(count);
    let results = join_all(args_list.into_iter().map(|args| call(ctx, node, args))).await;
    let mut outputs = Vec::with_capacity(count);
    for result in results {
        outputs.push(result?);
    }
    ctx.run.progress.completed(count);
    Ok(save_results(node, loop_vars, outputs, scope))
}

/// Solo race: every call arg-set is an independent subtask that saves its
/// single result and immediately drives the remaining DAG for its branch in a
/// private clone of the work view.
async fn run_solo(
    ctx: ExecCtx,
    node: Node,
    scopes: Vec<Scope>,
    loop_vars: Vec<(String, Node)>,
) -> Flow<()> {
    let branches = join_all(
        scopes
            .iter()
            .map(|scope| run_scope_solo(&ctx, &node, scope, &loop_vars)),
    )
    .await;
    for branch in branches {
        branch?;
    }
    Ok(())
}

async fn run_scope_solo(
    ctx: &ExecCtx,
    node: &Node,
    scope: &Scope,
    loop_vars: &[(String, Node)],
) -> Flow<()> {
    let args_list = resolve_args(ctx, node, scope, loop_vars)?;
    let parent = scope.birth();
    bind_checked(
        &parent,
        ScopeKey::from(SCOPE_NAME),
        NodeOutput::Value(Value::String(node.name().to_string())),
    );

    if args_list.is_empty() {
        // Empty fan-out: one pruned pseudo-branch carries the cascade.
        let mut branch_view = ctx.view.lock().clone();
        branch_view.scope_map.insert(node.id(), Vec::new());
        let branch_ctx = ExecCtx {
            run: Arc::clone(&ctx.run),
            view: Arc::new(Mutex::new(branch_view)),
        };
        return advance(branch_ctx, node.clone()).await;
    }

    // Children are birthed up front, in strategy emission order, so sibling
    // completion order cannot reorder them.
    let children: Vec<Scope> = args_list.iter().map(|_| parent.birth()).collect();
    ctx.run.progress.scheduled(args_list.len());
    let branches = join_all(
        args_list
            .into_iter()
            .zip(children)
            .map(|(args, child)| run_branch(ctx, node, args, child)),
    )
    .await;
    for branch in branches {
        branch?;
    }
    Ok(())
}

async fn run_branch(ctx: &ExecCtx, node: &Node, args: Args, child: Scope) -> Flow<()> {
    let output = call(ctx, node, args).await?;
    let live = !output.is_ignored();
    bind_checked(&child, ScopeKey::from(node), output);
    ctx.run.progress.completed(1);

    let mut branch_view = ctx.view.lock().clone();
    branch_view
        .scope_map
        .insert(node.id(), if live { vec![child] } else { Vec::new() });
    let branch_ctx = ExecCtx {
        run: Arc::clone(&ctx.run),
        view: Arc::new(Mutex::new(branch_view)),
    };
    advance(branch_ctx, node.clone()).await
}

/// Invoke the node once. Async callables are cooperatively cancelled at their
/// next suspension point; worker-pool callables cannot be interrupted and are
/// awaited. A cancelled or failing run discards the result unsaved.
async fn call(ctx: &ExecCtx, node: &Node, args: Args) -> Flow<NodeOutput> {
    if ctx.run.cancel.is_cancelled() {
        return Err(Halted);
    }
    let result = if node.runs_on_worker() {
        node.invoke(args).await
    } else {
        tokio::select! {
            _ = ctx.run.cancel.cancelled() => return Err(Halted),
            result = node.invoke(args) => result,
        }
    };
    match result {
        Ok(output) => {
            if ctx.run.cancel.is_cancelled() {
                return Err(Halted);
            }
            Ok(output)
        }
        Err(source) => {
            ctx.run.fail(DagError::node_execution(node.name(), source));
            Err(Halted)
        }
    }
}

/// Build the kwarg map(s) for one call scope: one map per loop tuple, or a
/// single map for a non-loop node.
fn resolve_args(
    ctx: &ExecCtx,
    node: &Node,
    scope: &Scope,
    loop_vars: &[(String, Node)],
) -> Flow<Vec<Args>> {
    let mut base = Args::new();
    for edge in ctx.run.flow.in_edges(node) {
        let output = scope.get_inherited(&edge.pred).unwrap_or_else(|| {
            panic!(
                "scope is missing the value of '{}' required by '{}'",
                edge.pred.name(),
                node.name()
            )
        });
        let value = match output {
            NodeOutput::Value(value) => value,
            NodeOutput::Ignored(_) => panic!(
                "pruned predecessor '{}' reached argument resolution of '{}'",
                edge.pred.name(),
                node.name()
            ),
        };
        let value = match &edge.extractor {
            Some(extract) => extract(&value),
            None => value,
        };
        base.insert(edge.kwarg, value);
    }

    if loop_vars.is_empty() {
        return Ok(vec![base]);
    }

    let mut seqs = Vec::with_capacity(loop_vars.len());
    for (kwarg, _) in loop_vars {
        match base.get(kwarg) {
            Some(Value::Array(items)) => seqs.push(items.clone()),
            Some(other) => {
                ctx.run.fail(DagError::node_execution(
                    node.name(),
                    format!("loop input '{kwarg}' is not a sequence: {other}").into(),
                ));
                return Err(Halted);
            }
            None => panic!(
                "loop kwarg '{kwarg}' of '{}' has no in-edge binding",
                node.name()
            ),
        }
    }

    let combos = node.loop_strategy().expand(&seqs);
    Ok(combos
        .into_iter()
        .map(|combo| {
            let mut args = base.clone();
            for ((kwarg, _), value) in loop_vars.iter().zip(combo) {
                args.insert(kwarg.clone(), value);
            }
            args
        })
        .collect())
}

/// Write a team batch into the scope tree. Non-loop nodes bind at the call
/// scope itself; loop nodes materialize a named fan-out parent with one child
/// per result, in emission order. Returns the live scopes.
fn save_results(
    node: &Node,
    loop_vars: &[(String, Node)],
    outputs: Vec<NodeOutput>,
    scope: &Scope,
) -> Vec<Scope> {
    if loop_vars.is_empty() {
        let output = match outputs.into_iter().next() {
            Some(output) => output,
            None => panic!("non-loop node '{}' produced no result", node.name()),
        };
        let live = !output.is_ignored();
        bind_checked(scope, ScopeKey::from(node), output);
        if live {
            vec![scope.clone()]
        } else {
            Vec::new()
        }
    } else {
        let parent = scope.birth();
        bind_checked(
            &parent,
            ScopeKey::from(SCOPE_NAME),
            NodeOutput::Value(Value::String(node.name().to_string())),
        );
        let mut live = Vec::new();
        for output in outputs {
            let child = parent.birth();
            let keep = !output.is_ignored();
            bind_checked(&child, ScopeKey::from(node), output);
            if keep {
                live.push(child);
            }
        }
        live
    }
}

fn bind_checked(scope: &Scope, key: ScopeKey, output: NodeOutput) {
    if let Err(err) = scope.bind(key, output) {
        panic!("single write per scope violated: {err}");
    }
}

/// Frontier advance for a finished node: under the node's lock set, mark it
/// complete, decrement successor in-degrees, and schedule every successor
/// that reached zero with its reconciled call scopes.
async fn advance(ctx: ExecCtx, node: Node) -> Flow<()> {
    if ctx.run.cancel.is_cancelled() {
        return Err(Halted);
    }

    let lock_order = ctx
        .run
        .lock_sets
        .get(&node.id())
        .cloned()
        .unwrap_or_default();
    let mut guards = Vec::with_capacity(lock_order.len());
    for id in &lock_order {
        if let Some(lock) = ctx.run.locks.get(id) {
            guards.push(Arc::clone(lock).lock_owned().await);
        }
    }

    let mut scheduled: Vec<(Node, Vec<Scope>)> = Vec::new();
    let mut join_error: Option<DagError> = None;
    {
        let mut view = ctx.view.lock();
        if view.in_degrees.remove(&node.id()).is_some() {
            let successors = ctx.run.flow.successors(&node);
            for succ in &successors {
                if let Some(degree) = view.in_degrees.get_mut(&succ.id()) {
                    *degree = degree.saturating_sub(1);
                }
            }
            for succ in successors {
                if view.in_degrees.get(&succ.id()) == Some(&0) {
                    match call_scopes_for(&view, &ctx.run, &succ) {
                        Ok(scopes) => scheduled.push((succ, scopes)),
                        Err(err) => {
                            join_error = Some(err);
                            break;
                        }
                    }
                }
            }
        }
    }
    drop(guards);

    if let Some(err) = join_error {
        ctx.run.fail(err);
        return Err(Halted);
    }
    if scheduled.is_empty() {
        return Ok(());
    }

    let results = join_all(
        scheduled
            .into_iter()
            .map(|(succ, scopes)| execute_node(ctx.clone(), succ, scopes)),
    )
    .await;
    for result in results {
        result?;
    }
    Ok(())
}

/// Reconcile a qualified node's call scopes from its predecessors' scope
/// sets. Predecessors that fanned out deeper win - descending into the
/// deeper lineage picks the shallower bindings up by inheritance. Unrelated
/// lineages cannot be reconciled and fail the run; an empty predecessor set
/// propagates the prune.
fn call_scopes_for(view: &WorkView, run: &Run, node: &Node) -> Result<Vec<Scope>> {
    let preds = run.flow.predecessors(node);
    if preds.is_empty() {
        return Ok(vec![run.root.clone()]);
    }

    let mut sets: Vec<&Vec<Scope>> = Vec::with_capacity(preds.len());
    for pred in &preds {
        match view.scope_map.get(&pred.id()) {
            Some(set) => sets.push(set),
            None => panic!(
                "scope bookkeeping is missing completed predecessor '{}' of '{}'",
                pred.name(),
                node.name()
            ),
        }
    }
    if sets.iter().any(|set| set.is_empty()) {
        return Ok(Vec::new());
    }

    let mut chosen = sets[sets.len() - 1];
    for set in sets.iter().take(sets.len() - 1).copied() {
        let held = &chosen[0];
        let candidate = &set[0];
        if !held.is_related(candidate) {
            return Err(DagError::ScopeJoinUnsupported {
                node: node.name().to_string(),
            });
        }
        if candidate.path_len() > held.path_len() {
            chosen = set;
        }
    }
    Ok(chosen.clone())
}
