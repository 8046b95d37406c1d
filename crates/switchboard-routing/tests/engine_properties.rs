//! Routing and execution properties checked through the public engine API.
#![cfg(test)]
#![allow(clippy::tests_outside_test_module, reason = "integration tests")]

use std::collections::BTreeMap;
use std::sync::Arc;

use switchboard_providers::MockBackend;
use switchboard_routing::router::{CostStrategy, QualityStrategy};
use switchboard_routing::{
    ChainConfig, ChainExecutor, ChainPlan, ChainStep, ConstraintEnforcer, EngineConfig, EnsembleAnswer,
    EnsembleConfig, EnsembleExecutor, EnsemblePlan, ExecutionPlan, ExecutionResult, MergeStrategy,
    ModelCatalog, Orchestrator, PerformanceLedger, RequestContext, ResourceConfig, ResourceState,
    RoutingError, RoutingStrategy as _, StaticMonitor, StepRole, StrategyInputs, StrategyKind, SystemMonitor,
    Verdict, VotingStrategy,
};
use tempfile::TempDir;

fn engine(mock: &MockBackend, strategy: StrategyKind) -> Orchestrator {
    let mut config = EngineConfig::default();
    config.routing.enabled_strategies = vec![strategy];
    let ledger = Arc::new(PerformanceLedger::in_memory());
    match Orchestrator::new(&config, Arc::new(mock.clone()), ledger) {
        Ok(engine) => engine.with_monitor(Box::new(StaticMonitor::new(ResourceState::unconstrained()))),
        Err(error) => panic!("engine failed to build: {error}"),
    }
}

fn context_with_complexity(complexity: u8) -> RequestContext {
    let mut context = RequestContext::new("request");
    context.complexity = complexity;
    context
}

fn verdict_reply(verdict: &str, confidence: f64) -> String {
    format!("{{\"verdict\": \"{verdict}\", \"confidence\": {confidence}, \"reasoning\": \"because\"}}")
}

#[tokio::test]
async fn cost_size_class_never_decreases_with_complexity() {
    let catalog = ModelCatalog::default();
    let resources = ResourceState::unconstrained();
    let largest = catalog.largest().parameters_billions();
    let mut previous = 0.0;

    for complexity in 0..=100 {
        let context = context_with_complexity(complexity);
        let inputs = StrategyInputs {
            context: &context,
            resources: &resources,
            catalog: &catalog,
        };
        let decision = CostStrategy.decide(&inputs).await;
        let size = catalog
            .find(&decision.model)
            .map_or(0.0, |model| model.parameters_billions());
        assert!(size >= previous, "complexity {complexity} dropped to {}", decision.model);
        assert!(size < largest, "complexity {complexity} reached the largest tier");
        previous = size;
    }
}

#[tokio::test]
async fn every_strategy_sets_at_most_one_plan() {
    let texts = [
        "hi",
        "Should we move the billing service to Postgres? Weigh the pros and cons.",
        "Implement an async job scheduler with retries, backoff and persistence in Rust",
    ];
    for kind in StrategyKind::ALL {
        let orchestrator = engine(&MockBackend::new(), kind);
        for text in texts {
            let context = orchestrator.analyze(text, None);
            let routed = match orchestrator.route(&context, None).await {
                Ok(routed) => routed,
                Err(error) => panic!("{kind} failed to route: {error}"),
            };
            let decision = routed.decision;
            let plans = usize::from(decision.chain_plan().is_some()) + usize::from(decision.ensemble_plan().is_some());
            assert!(plans <= 1);
            assert_eq!(decision.strategy, kind.name());
            assert!((0.0..=1.0).contains(&decision.confidence));
        }
    }
}

#[tokio::test]
async fn quality_decision_downgraded_under_low_ram() {
    let catalog = Arc::new(ModelCatalog::default());
    let context = RequestContext::new("design a distributed cache");
    let resources = ResourceState::unconstrained().with_ram(4_000).with_cpu(40.0);
    let inputs = StrategyInputs {
        context: &context,
        resources: &resources,
        catalog: &catalog,
    };
    let decision = QualityStrategy.decide(&inputs).await;
    assert_eq!(decision.model, "deepseek-coder-v2:16b");

    let enforcer = ConstraintEnforcer::new(ResourceConfig::default(), Arc::clone(&catalog));
    let constrained = enforcer.apply(decision, &resources);
    assert_eq!(constrained.model, catalog.smallest().name);
    assert!(constrained.max_tokens <= 4_000);
}

#[tokio::test]
async fn default_config_keeps_largest_model_on_a_roomy_host() {
    let root = match TempDir::new() {
        Ok(dir) => dir,
        Err(error) => panic!("temp dir: {error}"),
    };
    let proc_dir = root.path().join("proc");
    if let Err(error) = std::fs::create_dir_all(&proc_dir) {
        panic!("create proc dir: {error}");
    }
    let files = [
        ("meminfo", "MemTotal:       70000000 kB\nMemAvailable:   65536000 kB\n"),
        ("loadavg", "0.00 0.00 0.00 1/100 1\n"),
    ];
    for (name, contents) in files {
        if let Err(error) = std::fs::write(proc_dir.join(name), contents) {
            panic!("write {name}: {error}");
        }
    }

    let config = EngineConfig::default();
    let mock = MockBackend::new();
    let orchestrator = engine(&mock, StrategyKind::Quality)
        .with_monitor(Box::new(SystemMonitor::new(&config.resources).with_root(root.path())));
    let context = orchestrator.analyze("design a distributed cache", None);
    let routed = match orchestrator.route(&context, None).await {
        Ok(routed) => routed,
        Err(error) => panic!("routing failed: {error}"),
    };
    assert_eq!(routed.decision.model, "deepseek-coder-v2:16b");
    assert!(!routed.decision.reasoning.contains("constraints"));
}

#[tokio::test]
async fn enforcer_is_idempotent_across_resource_states() {
    let catalog = Arc::new(ModelCatalog::default());
    let enforcer = ConstraintEnforcer::new(
        ResourceConfig {
            max_response_time_ms: Some(5_000),
            ..ResourceConfig::default()
        },
        Arc::clone(&catalog),
    );
    let context = RequestContext::new("q");
    let states = [
        ResourceState::unconstrained(),
        ResourceState::unconstrained().with_ram(2_000),
        ResourceState::unconstrained().with_ram(9_000).with_cpu(99.0),
        ResourceState::unconstrained().with_temperature(95.0),
        ResourceState::unconstrained().with_battery(5.0, true),
        ResourceState::unconstrained().with_ram(13_000).with_battery(50.0, true),
    ];
    for resources in &states {
        let inputs = StrategyInputs {
            context: &context,
            resources,
            catalog: &catalog,
        };
        let decision = QualityStrategy.decide(&inputs).await;
        let once = enforcer.apply(decision, resources);
        let twice = enforcer.apply(once.clone(), resources);
        assert_eq!(once, twice, "not idempotent for {resources:?}");
        assert!(once.max_tokens >= 1);
    }
}

#[tokio::test]
async fn chain_stops_after_low_confidence_step() {
    let mock = MockBackend::new()
        .with_model_response("a", "first\nconfidence: 0.8")
        .with_model_response("b", "second\nconfidence: 0.1")
        .with_model_response("c", "third");
    let plan = ChainPlan {
        steps: vec![
            ChainStep::new("a", StepRole::Draft, 256, 0.7),
            ChainStep::new("b", StepRole::Refine, 256, 0.5),
            ChainStep::new("c", StepRole::Review, 256, 0.3),
        ],
        merge: MergeStrategy::Last,
    };
    let result = ChainExecutor::new(Arc::new(mock.clone()), ChainConfig::default())
        .execute(&plan, "task")
        .await;

    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.output, "second\nconfidence: 0.1");
    assert!(!mock.called_models().contains(&"c".to_owned()));
}

#[tokio::test]
async fn chain_last_merge_survives_failed_steps() {
    let mock = MockBackend::new()
        .with_model_failure("a", None, "connection refused")
        .with_model_failure("b", Some(500), "internal error")
        .with_model_response("c", "  final raw output  ");
    let plan = ChainPlan {
        steps: vec![
            ChainStep::new("a", StepRole::Draft, 256, 0.7),
            ChainStep::new("b", StepRole::Refine, 256, 0.5),
            ChainStep::new("c", StepRole::Validate, 256, 0.3),
        ],
        merge: MergeStrategy::Last,
    };
    let result = ChainExecutor::new(Arc::new(mock.clone()), ChainConfig::default())
        .execute(&plan, "task")
        .await;

    assert_eq!(mock.called_models(), ["a", "b", "c"]);
    assert_eq!(result.failed_steps(), 2);
    assert_eq!(result.output, "  final raw output  ");
}

#[tokio::test]
async fn ensemble_below_threshold_reports_no_consensus() {
    let mock = MockBackend::new()
        .with_model_response("a", verdict_reply("YES", 0.9))
        .with_model_response("b", verdict_reply("YES", 0.8))
        .with_model_response("c", verdict_reply("NO", 0.6));
    let plan = EnsemblePlan {
        models: vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
        weights: BTreeMap::from([("a".to_owned(), 0.5), ("b".to_owned(), 0.3), ("c".to_owned(), 0.8)]),
        voting: VotingStrategy::Weighted,
        consensus_threshold: 0.7,
    };
    let result = match EnsembleExecutor::new(Arc::new(mock), EnsembleConfig::default())
        .execute(&plan, "ship it?")
        .await
    {
        Ok(result) => result,
        Err(error) => panic!("ensemble failed: {error}"),
    };

    assert_eq!(result.nominal, Verdict::Yes);
    assert!(result.confidence < 0.7);
    assert_eq!(result.answer, EnsembleAnswer::NoConsensus);
    assert_eq!(result.answer.verdict(), None);
}

#[tokio::test]
async fn workflow_decision_question_runs_an_ensemble() {
    let mock = MockBackend::new().with_default_response(verdict_reply("NO", 0.9));
    let orchestrator = engine(&mock, StrategyKind::Workflow);
    let outcome = orchestrator
        .run("Should we rewrite the payment service in Rust?", None, None)
        .await;
    let (routed, result) = match outcome {
        Ok(pair) => pair,
        Err(error) => panic!("run failed: {error}"),
    };

    assert!(matches!(routed.decision.plan, ExecutionPlan::Ensemble(_)));
    match result {
        ExecutionResult::Ensemble(ensemble) => {
            assert_eq!(ensemble.answer, EnsembleAnswer::Verdict(Verdict::No));
            assert_eq!(ensemble.members.len(), 3);
        }
        other => panic!("expected an ensemble result, got {other:?}"),
    }
}

#[tokio::test]
async fn workflow_ensemble_with_no_survivors_is_fatal() {
    let mock = MockBackend::new().with_default_response("no idea");
    let orchestrator = engine(&mock, StrategyKind::Workflow);
    let outcome = orchestrator.run("Should I use tabs or spaces?", None, None).await;
    assert!(matches!(outcome, Err(RoutingError::AllModelsFailed { .. })));
}

#[tokio::test]
async fn workflow_chain_continues_past_a_missing_model() {
    let catalog = ModelCatalog::default();
    let mock = MockBackend::new()
        .with_model_failure(catalog.smallest().name.clone(), Some(404), "model not found")
        .with_default_response("refined answer\nconfidence: 0.9");
    let orchestrator = engine(&mock, StrategyKind::Workflow);
    let (routed, result) = match orchestrator.run("implement a tokenizer for arithmetic", None, None).await {
        Ok(pair) => pair,
        Err(error) => panic!("run failed: {error}"),
    };

    assert!(matches!(routed.decision.plan, ExecutionPlan::Chain(_)));
    match result {
        ExecutionResult::Chain(chain) => {
            assert_eq!(chain.failed_steps(), 1);
            assert!(chain.steps.len() >= 2);
            assert!(chain.output.ends_with("refined answer\nconfidence: 0.9"));
        }
        other => panic!("expected a chain result, got {other:?}"),
    }
}
