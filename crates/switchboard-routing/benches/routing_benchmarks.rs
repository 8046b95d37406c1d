//! Benchmarks for request analysis, routing and constraint enforcement.
#![allow(
    missing_docs,
    clippy::expect_used,
    clippy::min_ident_chars,
    clippy::missing_panics_doc,
    reason = "Benchmark code has different conventions"
)]

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use switchboard_routing::{
    ConstraintEnforcer, ContextAnalyzer, EngineConfig, ModelCatalog, PerformanceLedger, ResourceConfig,
    ResourceState, StrategyKind, default_router,
};
use tokio::runtime::Runtime;

const REQUESTS: [(&str, &str); 3] = [
    ("simple", "What does this function return?"),
    (
        "medium",
        "Refactor the parser module to use better error handling and add tests",
    ),
    (
        "complex",
        "Design an async job scheduler in Rust with retries, exponential backoff, \
         persistence to Postgres and a React dashboard.\n```rust\nasync fn run() {\n    \
         for job in queue.drain() {\n        if job.ready() { spawn(job).await; }\n    }\n}\n```",
    ),
];

/// Benchmark context analysis (synchronous, no I/O)
fn bench_context_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_analysis");
    let analyzer = ContextAnalyzer::default();

    for (name, request) in REQUESTS {
        group.throughput(Throughput::Bytes(request.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &request, |b, &request| {
            b.iter(|| analyzer.analyze(black_box(request), Some("src/scheduler.rs")));
        });
    }

    group.finish();
}

/// Benchmark routing through each strategy with an in-memory ledger
fn bench_strategy_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategy_routing");
    let runtime = Runtime::new().expect("Failed to create runtime");
    let config = EngineConfig::default();
    let catalog = Arc::new(ModelCatalog::default());
    let ledger = Arc::new(PerformanceLedger::in_memory());
    let router = default_router(&config, catalog, &ledger);
    let resources = ResourceState::unconstrained();
    let context = ContextAnalyzer::default().analyze(REQUESTS[2].1, None);

    for kind in StrategyKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            b.to_async(&runtime)
                .iter(|| async { router.route(black_box(&context), &resources, Some(kind)).await });
        });
    }

    group.finish();
}

/// Benchmark constraint enforcement under increasing pressure
fn bench_constraints(c: &mut Criterion) {
    let mut group = c.benchmark_group("constraints");
    let runtime = Runtime::new().expect("Failed to create runtime");
    let catalog = Arc::new(ModelCatalog::default());
    let ledger = Arc::new(PerformanceLedger::in_memory());
    let router = default_router(&EngineConfig::default(), Arc::clone(&catalog), &ledger);
    let enforcer = ConstraintEnforcer::new(ResourceConfig::default(), catalog);
    let context = ContextAnalyzer::default().analyze(REQUESTS[1].1, None);
    let decision = runtime
        .block_on(router.route(&context, &ResourceState::unconstrained(), Some(StrategyKind::Quality)))
        .expect("Failed to route");

    let states = [
        ("relaxed", ResourceState::unconstrained()),
        ("low_ram", ResourceState::unconstrained().with_ram(4_000)),
        (
            "everything",
            ResourceState::unconstrained()
                .with_ram(5_000)
                .with_cpu(95.0)
                .with_temperature(90.0)
                .with_battery(10.0, true),
        ),
    ];
    for (name, resources) in states {
        group.bench_with_input(BenchmarkId::from_parameter(name), &resources, |b, resources| {
            b.iter(|| enforcer.apply(black_box(decision.clone()), resources));
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3))
        .sample_size(50);
    targets = bench_context_analysis, bench_strategy_routing, bench_constraints
}

criterion_main!(benches);
