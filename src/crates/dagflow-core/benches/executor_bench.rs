use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dagflow_core::{EdgeOptions, Executor, GraphBuilder, Node};
use serde_json::json;

fn fanout_pipeline(width: i64) -> Executor {
    let source = Node::async_fn("source", move |_| async move {
        Ok(json!((0..width).collect::<Vec<_>>()))
    });
    let transform = Node::sync_fn("transform", |args| {
        Ok(json!(args["x"].as_i64().unwrap() * 2))
    });
    let annotate = Node::sync_fn("annotate", |args| {
        Ok(json!(format!("item-{}", args["x"])))
    });

    let mut builder = GraphBuilder::new();
    builder
        .add_edge_with(&source, &transform, "x", EdgeOptions::looped())
        .unwrap();
    builder.add_edge(&transform, &annotate, "x").unwrap();
    Executor::new(builder.build())
}

fn fanout_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let executor = fanout_pipeline(64);

    c.bench_function("fanout 64 through 3-node pipeline", |b| {
        b.to_async(&runtime).iter(|| async {
            let root = black_box(&executor).execute().await.unwrap();
            black_box(root);
        });
    });
}

fn chain_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("build and run 16-node chain", |b| {
        b.to_async(&runtime).iter(|| async {
            let mut builder = GraphBuilder::new();
            let mut prev = Node::async_fn("n0", |_| async { Ok(json!(0)) });
            for i in 1..16 {
                let next = Node::sync_fn(format!("n{i}"), |args| {
                    Ok(json!(args["x"].as_i64().unwrap() + 1))
                });
                builder.add_edge(&prev, &next, "x").unwrap();
                prev = next;
            }
            let root = Executor::new(builder.build()).execute().await.unwrap();
            black_box(root);
        });
    });
}

criterion_group!(benches, fanout_benchmark, chain_benchmark);
criterion_main!(benches);
