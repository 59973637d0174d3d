//! End-to-end executor scenarios
//!
//! These tests drive complete graphs through the executor and check the
//! returned scope tree: chains, loop fan-outs under both strategies, shared
//! loop inheritance, ignore pruning, targeted execution, race modes, and the
//! failure/cancellation paths.

use dagflow_core::error::CallError;
use dagflow_core::{
    CollectFilter, DagError, EdgeOptions, ExecuteOptions, Executor, GraphBuilder, IgnoreResult,
    Node, NodeOutput, LoopStrategy, ProgressVisitor,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn chain_binds_at_root() {
    let n1 = Node::async_fn("n1", |_| async { Ok(json!("a")) });
    let n2 = Node::sync_fn("n2", |args| {
        Ok(json!(format!("b:{}", args["dep"].as_str().unwrap())))
    });

    let mut builder = GraphBuilder::new();
    builder.add_edge(&n1, &n2, "dep").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(root.get(&n1).unwrap().as_value(), Some(&json!("a")));
    assert_eq!(root.get(&n2).unwrap().as_value(), Some(&json!("b:a")));
}

#[tokio::test(flavor = "multi_thread")]
async fn cartesian_product_loop() {
    let l1 = Node::async_fn("l1", |_| async { Ok(json!([1, 2, 3])) });
    let l2 = Node::async_fn("l2", |_| async { Ok(json!(["a", "b", "c"])) });
    let m = Node::sync_fn("m", |args| Ok(json!([args["x"].clone(), args["y"].clone()])));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l1, &m, "x", EdgeOptions::looped())
        .unwrap();
    builder
        .add_edge_with(&l2, &m, "y", EdgeOptions::looped())
        .unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    let collected = root.collect_values(&m);
    let expected: Vec<Value> = [1, 2, 3]
        .iter()
        .flat_map(|x| ["a", "b", "c"].iter().map(move |y| json!([x, y])))
        .collect();
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn zip_loop_truncates_to_shortest() {
    let l1 = Node::async_fn("l1", |_| async { Ok(json!([1, 2, 3])) });
    let l2 = Node::async_fn("l2", |_| async { Ok(json!(["a", "b", "c"])) });
    let m = Node::sync_fn("m", |args| Ok(json!([args["x"].clone(), args["y"].clone()])))
        .with_loop_strategy(LoopStrategy::Zip);

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l1, &m, "x", EdgeOptions::looped())
        .unwrap();
    builder
        .add_edge_with(&l2, &m, "y", EdgeOptions::looped())
        .unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(
        root.collect_values(&m),
        vec![json!([1, "a"]), json!([2, "b"]), json!([3, "c"])]
    );
}

#[tokio::test]
async fn shared_loop_scopes_inherit_down_the_chain() {
    // l fans a out; b and c run once per fan-out child and see that child's
    // bindings by inheritance.
    let l = Node::async_fn("l", |_| async { Ok(json!([1, 2, 3])) });
    let a = Node::sync_fn("a", |args| Ok(json!(args["x"].as_i64().unwrap() * 2)));
    let b = Node::sync_fn("b", |args| Ok(json!(args["x"].as_i64().unwrap() * 3)));
    let c = Node::sync_fn("c", |args| Ok(json!([args["a"].clone(), args["b"].clone()])));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &a, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&a, &b, "x").unwrap();
    builder.add_edge(&a, &c, "a").unwrap();
    builder.add_edge(&b, &c, "b").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(
        root.collect_values(&c),
        vec![json!([2, 6]), json!([4, 12]), json!([6, 18])]
    );
}

#[tokio::test]
async fn deeper_lineage_wins_reconciliation() {
    // d joins the whole list from l (bound at the root) with a's fanned-out
    // values; the deeper fan-out children win and inherit l's binding.
    let l = Node::async_fn("l", |_| async { Ok(json!([1, 2, 3])) });
    let a = Node::sync_fn("a", |args| Ok(json!(args["x"].as_i64().unwrap() * 2)));
    let d = Node::sync_fn("d", |args| Ok(json!([args["whole"].clone(), args["a"].clone()])));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &a, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&l, &d, "whole").unwrap();
    builder.add_edge(&a, &d, "a").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(
        root.collect_values(&d),
        vec![
            json!([[1, 2, 3], 2]),
            json!([[1, 2, 3], 4]),
            json!([[1, 2, 3], 6]),
        ]
    );
}

#[tokio::test]
async fn ignore_result_prunes_branches() {
    let l = Node::async_fn("l", |_| async { Ok(json!([2, 4, 3])) });
    let f = Node::sync_fn("f", |args| -> Result<NodeOutput, CallError> {
        let x = args["x"].as_i64().unwrap();
        if x % 2 != 0 {
            Ok(IgnoreResult::new().with_reason("odd").into())
        } else {
            Ok(json!(x).into())
        }
    });
    let g = Node::sync_fn("g", |args| Ok(json!(args["x"].as_i64().unwrap() + 1)));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &f, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&f, &g, "x").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(root.collect_values(&g), vec![json!(3), json!(5)]);
    assert_eq!(root.collect(&f, CollectFilter::Any).len(), 3);
    assert_eq!(root.collect(&f, CollectFilter::Valid).len(), 2);
    assert_eq!(root.collect(&f, CollectFilter::Ignored).len(), 1);
}

#[tokio::test]
async fn fully_ignored_fanout_prunes_all_descendants() {
    let g_runs = Arc::new(AtomicUsize::new(0));
    let h_runs = Arc::new(AtomicUsize::new(0));

    let l = Node::async_fn("l", |_| async { Ok(json!([1, 3, 5])) });
    let f = Node::sync_fn("f", |_| -> Result<NodeOutput, CallError> {
        Ok(IgnoreResult::new().into())
    });
    let g = {
        let runs = g_runs.clone();
        Node::sync_fn("g", move |args| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(args["x"].clone())
        })
    };
    let h = {
        let runs = h_runs.clone();
        Node::sync_fn("h", move |args| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(args["x"].clone())
        })
    };

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &f, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&f, &g, "x").unwrap();
    builder.add_edge(&g, &h, "x").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(root.collect(&f, CollectFilter::Ignored).len(), 3);
    assert!(root.collect(&g, CollectFilter::Any).is_empty());
    assert_eq!(g_runs.load(Ordering::SeqCst), 0);
    assert_eq!(h_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_loop_sequence_completes_and_prunes() {
    let l = Node::async_fn("l", |_| async { Ok(json!([])) });
    let m = Node::sync_fn("m", |args| Ok(args["x"].clone()));
    let after = Node::sync_fn("after", |args| Ok(args["x"].clone()));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &m, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&m, &after, "x").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert!(root.collect(&m, CollectFilter::Any).is_empty());
    assert!(root.collect(&after, CollectFilter::Any).is_empty());
}

#[tokio::test(start_paused = true)]
async fn solo_race_lets_fast_branches_run_ahead() {
    let starts: Arc<Mutex<Vec<tokio::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let l = Node::async_fn("l", |_| async { Ok(json!([1, 2])) });
    let p = Node::async_fn("p", |args| async move {
        let x = args["x"].as_i64().unwrap();
        tokio::time::sleep(Duration::from_secs(x as u64)).await;
        Ok(json!(x * 2))
    })
    .with_team_race(false);
    let q = {
        let starts = starts.clone();
        Node::async_fn("q", move |args| {
            let starts = starts.clone();
            async move {
                starts.lock().push(tokio::time::Instant::now());
                Ok(json!(args["x"].as_i64().unwrap() * 3))
            }
        })
    };

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &p, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&p, &q, "x").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(root.collect_values(&q), vec![json!(6), json!(12)]);

    let starts = starts.lock();
    assert_eq!(starts.len(), 2);
    let delta = starts[1].duration_since(starts[0]);
    assert!(delta >= Duration::from_millis(900), "delta was {delta:?}");
}

#[tokio::test(start_paused = true)]
async fn team_race_starts_successors_together() {
    let starts: Arc<Mutex<Vec<tokio::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let l = Node::async_fn("l", |_| async { Ok(json!([1, 2])) });
    let p = Node::async_fn("p", |args| async move {
        let x = args["x"].as_i64().unwrap();
        tokio::time::sleep(Duration::from_secs(x as u64)).await;
        Ok(json!(x * 2))
    });
    let q = {
        let starts = starts.clone();
        Node::async_fn("q", move |args| {
            let starts = starts.clone();
            async move {
                starts.lock().push(tokio::time::Instant::now());
                Ok(json!(args["x"].as_i64().unwrap() * 3))
            }
        })
    };

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &p, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&p, &q, "x").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(root.collect_values(&q), vec![json!(6), json!(12)]);

    let starts = starts.lock();
    assert_eq!(starts.len(), 2);
    let delta = starts[1].duration_since(starts[0]);
    assert!(delta <= Duration::from_millis(100), "delta was {delta:?}");
}

#[tokio::test(start_paused = true)]
async fn solo_branches_drive_whole_pipelines() {
    // The fast branch's q and r both finish before the slow branch's p call
    // returns; results still land in fan-out order.
    let r_finishes: Arc<Mutex<Vec<(i64, tokio::time::Instant)>>> =
        Arc::new(Mutex::new(Vec::new()));

    let l = Node::async_fn("l", |_| async { Ok(json!([1, 5])) });
    let p = Node::async_fn("p", |args| async move {
        let x = args["x"].as_i64().unwrap();
        tokio::time::sleep(Duration::from_secs(x as u64)).await;
        Ok(json!(x))
    })
    .with_team_race(false);
    let q = Node::sync_fn("q", |args| Ok(json!(args["x"].as_i64().unwrap() + 10)));
    let r = {
        let finishes = r_finishes.clone();
        Node::async_fn("r", move |args| {
            let finishes = finishes.clone();
            async move {
                let x = args["x"].as_i64().unwrap();
                finishes.lock().push((x, tokio::time::Instant::now()));
                Ok(json!(x))
            }
        })
    };

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &p, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&p, &q, "x").unwrap();
    builder.add_edge(&q, &r, "x").unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(root.collect_values(&r), vec![json!(11), json!(15)]);

    let finishes = r_finishes.lock();
    assert_eq!(finishes.len(), 2);
    // Branch for x=1 reached r roughly four seconds before the x=5 branch.
    assert_eq!(finishes[0].0, 11);
    assert!(finishes[1].1.duration_since(finishes[0].1) >= Duration::from_secs(3));
}

#[tokio::test]
async fn targeted_execution_runs_only_reachable_ancestry() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counting = |name: &str, runs: &Arc<AtomicUsize>| {
        let runs = runs.clone();
        Node::async_fn(name.to_string(), move |_| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            }
        })
    };

    let a = counting("a", &runs);
    let b = counting("b", &runs);
    let c = counting("c", &runs);
    let d = counting("d", &runs);

    // a -> b -> c, a -> d
    let mut builder = GraphBuilder::new();
    builder.add_edge(&a, &b, "x").unwrap();
    builder.add_edge(&b, &c, "x").unwrap();
    builder.add_edge(&a, &d, "x").unwrap();
    let graph = builder.build();

    let root = Executor::new(graph)
        .execute_with(ExecuteOptions::new().with_targets([b.clone()]))
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(root.get(&a).is_some());
    assert!(root.get(&b).is_some());
    assert!(root.get(&c).is_none());
    assert!(root.get(&d).is_none());
}

#[tokio::test]
async fn missing_target_is_rejected() {
    let a = Node::sync_fn("a", |_| Ok(json!(1)));
    let stranger = Node::sync_fn("stranger", |_| Ok(json!(2)));

    let mut builder = GraphBuilder::new();
    builder.add_node(&a);

    let err = Executor::new(builder.build())
        .execute_with(ExecuteOptions::new().with_targets([stranger]))
        .await
        .unwrap_err();
    assert!(matches!(err, DagError::MissingTarget { name } if name == "stranger"));
}

#[tokio::test]
async fn parallel_kwargs_from_one_predecessor() {
    let pair = Node::async_fn("pair", |_| async { Ok(json!({"lo": 1, "hi": 9})) });
    let spread = Node::sync_fn("spread", |args| {
        Ok(json!([args["lo"].clone(), args["hi"].clone()]))
    });

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(
            &pair,
            &spread,
            "lo",
            EdgeOptions::direct().with_extractor(|v| v["lo"].clone()),
        )
        .unwrap();
    builder
        .add_edge_with(
            &pair,
            &spread,
            "hi",
            EdgeOptions::direct().with_extractor(|v| v["hi"].clone()),
        )
        .unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(root.get(&spread).unwrap().as_value(), Some(&json!([1, 9])));
}

#[tokio::test]
async fn unrelated_branches_refuse_to_join() {
    let l1 = Node::async_fn("l1", |_| async { Ok(json!([1, 2])) });
    let l2 = Node::async_fn("l2", |_| async { Ok(json!([3, 4])) });
    let a = Node::sync_fn("a", |args| Ok(args["x"].clone()));
    let b = Node::sync_fn("b", |args| Ok(args["y"].clone()));
    let joined = Node::sync_fn("joined", |args| {
        Ok(json!([args["a"].clone(), args["b"].clone()]))
    });

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l1, &a, "x", EdgeOptions::looped())
        .unwrap();
    builder
        .add_edge_with(&l2, &b, "y", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&a, &joined, "a").unwrap();
    builder.add_edge(&b, &joined, "b").unwrap();

    let err = Executor::new(builder.build()).execute().await.unwrap_err();
    assert!(matches!(err, DagError::ScopeJoinUnsupported { node } if node == "joined"));
}

#[tokio::test(start_paused = true)]
async fn first_error_wins_and_siblings_are_cancelled() {
    let downstream_ran = Arc::new(AtomicUsize::new(0));

    let boom = Node::sync_fn("boom", |_| -> Result<Value, CallError> {
        Err("kaput".into())
    });
    let slow = Node::async_fn("slow", |_| async {
        tokio::time::sleep(Duration::from_secs(1000)).await;
        Ok(json!(1))
    });
    let after_slow = {
        let ran = downstream_ran.clone();
        Node::sync_fn("after_slow", move |args| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(args["x"].clone())
        })
    };

    let mut builder = GraphBuilder::new();
    builder.add_node(&boom);
    builder.add_edge(&slow, &after_slow, "x").unwrap();

    let err = Executor::new(builder.build()).execute().await.unwrap_err();
    assert!(matches!(&err, DagError::NodeExecution { node, .. } if node == "boom"));
    assert_eq!(err.to_string(), "node 'boom' failed: kaput");
    assert_eq!(downstream_ran.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn external_cancel_unwinds_with_cancelled() {
    let forever = Node::async_fn("forever", |_| async {
        tokio::time::sleep(Duration::from_secs(100_000)).await;
        Ok(json!(0))
    });

    let mut builder = GraphBuilder::new();
    builder.add_node(&forever);

    let token = CancellationToken::new();
    let executor = Executor::new(builder.build());
    let options = ExecuteOptions::new().with_cancel(token.clone());

    let (result, _) = tokio::join!(executor.execute_with(options), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });
    assert!(matches!(result.unwrap_err(), DagError::Cancelled));
}

struct Recorder(Mutex<Vec<(u64, u64)>>);

impl ProgressVisitor for Recorder {
    fn on_progress(&self, completed: u64, total: u64) {
        self.0.lock().push((completed, total));
    }
}

#[tokio::test]
async fn progress_counts_every_call() {
    let l = Node::async_fn("l", |_| async { Ok(json!([1, 2, 3])) });
    let m = Node::sync_fn("m", |args| Ok(args["x"].clone()));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &m, "x", EdgeOptions::looped())
        .unwrap();

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    Executor::new(builder.build())
        .execute_with(ExecuteOptions::new().with_progress(recorder.clone()))
        .await
        .unwrap();

    let seen = recorder.0.lock();
    // One call for l, three for the fanned-out m.
    assert_eq!(seen.last(), Some(&(4, 4)));
    for window in seen.windows(2) {
        assert!(window[1].0 >= window[0].0);
        assert!(window[1].1 >= window[0].1);
    }
}

#[tokio::test]
async fn executor_is_reusable_across_runs() {
    let l = Node::async_fn("l", |_| async { Ok(json!([1, 2])) });
    let m = Node::sync_fn("m", |args| Ok(args["x"].clone()));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &m, "x", EdgeOptions::looped())
        .unwrap();
    let executor = Executor::new(builder.build());

    let first = executor.execute().await.unwrap();
    let second = executor.execute().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(first.collect_values(&m), second.collect_values(&m));
}

#[tokio::test]
async fn blocking_nodes_run_on_the_worker_pool() {
    let src = Node::async_fn("src", |_| async { Ok(json!([10, 20])) });
    let crunch = Node::blocking_fn("crunch", |args| {
        std::thread::sleep(Duration::from_millis(2));
        Ok(json!(args["x"].as_i64().unwrap() + 1))
    });

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&src, &crunch, "x", EdgeOptions::looped())
        .unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    assert_eq!(root.collect_values(&crunch), vec![json!(11), json!(21)]);
}

#[tokio::test]
async fn non_sequence_loop_input_fails_the_run() {
    let scalar = Node::async_fn("scalar", |_| async { Ok(json!(42)) });
    let looper = Node::sync_fn("looper", |args| Ok(args["x"].clone()));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&scalar, &looper, "x", EdgeOptions::looped())
        .unwrap();

    let err = Executor::new(builder.build()).execute().await.unwrap_err();
    assert!(matches!(&err, DagError::NodeExecution { node, .. } if node == "looper"));
    assert!(err.to_string().contains("not a sequence"));
}

#[tokio::test]
async fn dump_shows_fanout_structure() {
    let l = Node::async_fn("l", |_| async { Ok(json!([1, 2])) });
    let m = Node::sync_fn("m", |args| Ok(args["x"].clone()));

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&l, &m, "x", EdgeOptions::looped())
        .unwrap();

    let root = Executor::new(builder.build()).execute().await.unwrap();
    let dump = root.dump(false);

    assert_eq!(dump["l"], json!([1, 2]));
    let fanout = &dump["children"][0];
    assert_eq!(fanout["scope_name"], json!("m"));
    assert_eq!(fanout["children"][0]["m"], json!(1));
    assert_eq!(fanout["children"][1]["m"], json!(2));
}
