//! Ledger behaviour against the on-disk store, with and without the background writer.
#![cfg(test)]
#![allow(clippy::tests_outside_test_module, reason = "integration tests")]

use std::sync::Arc;

use switchboard_routing::{
    JsonLedgerStore, LedgerStore as _, Outcome, OutcomeStatus, PerformanceLedger, RecordFilter,
    RequestContext, RoutingDecision, UserFeedback,
};
use tempfile::TempDir;
use uuid::Uuid;

fn temp_dir() -> TempDir {
    match TempDir::new() {
        Ok(dir) => dir,
        Err(error) => panic!("temp dir: {error}"),
    }
}

fn open(dir: &TempDir) -> JsonLedgerStore {
    match JsonLedgerStore::open(dir.path().join("ledger")) {
        Ok(store) => store,
        Err(error) => panic!("open ledger: {error}"),
    }
}

fn decision(strategy: &str, model: &str, complexity: u8) -> RoutingDecision {
    let mut context = RequestContext::new("q");
    context.complexity = complexity;
    RoutingDecision::new(strategy, model, &context).with_sampling(0.4, 1_024)
}

#[tokio::test]
async fn outcomes_survive_reopen() {
    let dir = temp_dir();
    let first = decision("adaptive", "llama3.2:3b", 20);
    {
        let ledger = PerformanceLedger::new(Arc::new(open(&dir)));
        if let Err(error) = ledger.record_decision(&first).await {
            panic!("record decision: {error}");
        }
        let outcome = Outcome::new(0.8)
            .with_feedback(UserFeedback::Positive)
            .with_usage(900, 350);
        assert!(matches!(ledger.record_outcome(first.id, outcome).await, Ok(OutcomeStatus::Recorded)));
    }

    let reopened = PerformanceLedger::new(Arc::new(open(&dir)));
    let summary = match reopened.model_performance("llama3.2:3b").await {
        Ok(summary) => summary,
        Err(error) => panic!("summarize: {error}"),
    };
    assert_eq!(summary.rated_decisions, 1);
    assert!((summary.average_quality - 0.8).abs() < 1e-9);
    assert!((summary.average_latency_ms - 900.0).abs() < 1e-9);

    let again = reopened.record_outcome(first.id, Outcome::new(0.1)).await;
    assert!(matches!(again, Ok(OutcomeStatus::AlreadyRecorded)));
}

#[tokio::test]
async fn unknown_decision_is_a_no_op() {
    let dir = temp_dir();
    let ledger = PerformanceLedger::new(Arc::new(open(&dir)));
    let status = ledger.record_outcome(Uuid::new_v4(), Outcome::new(1.0)).await;
    assert!(matches!(status, Ok(OutcomeStatus::NotFound)));

    let all = ledger.summarize(&RecordFilter::All).await;
    assert!(matches!(all, Ok(summary) if summary.total_decisions == 0));
}

#[tokio::test]
async fn background_writes_are_visible_after_flush() {
    let dir = temp_dir();
    let store = Arc::new(open(&dir));
    let ledger = PerformanceLedger::new(Arc::<JsonLedgerStore>::clone(&store)).with_background_writer(3);

    let decisions: Vec<RoutingDecision> = (0..5).map(|index| decision("cost", "m", index * 20)).collect();
    for decision in &decisions {
        if let Err(error) = ledger.record_decision(decision).await {
            panic!("enqueue: {error}");
        }
    }
    if let Err(error) = ledger.flush().await {
        panic!("flush: {error}");
    }

    for decision in &decisions {
        let stored = store.get(decision.id).await;
        assert!(matches!(stored, Ok(Some(record)) if record.strategy == "cost"));
    }
    let files = match std::fs::read_dir(store.directory()) {
        Ok(entries) => entries.count(),
        Err(error) => panic!("list ledger dir: {error}"),
    };
    assert_eq!(files, decisions.len());
    ledger.shutdown().await;
}

#[tokio::test]
async fn strategy_aggregates_only_cover_their_strategy() {
    let ledger = PerformanceLedger::in_memory();
    let speed = decision("speed", "llama3.2:3b", 10);
    let quality = decision("quality", "deepseek-coder-v2:16b", 80);
    for (decision, quality_score) in [(&speed, 0.4), (&quality, 0.9)] {
        if let Err(error) = ledger.record_decision(decision).await {
            panic!("record decision: {error}");
        }
        if let Err(error) = ledger.record_outcome(decision.id, Outcome::new(quality_score)).await {
            panic!("record outcome: {error}");
        }
    }

    let summary = match ledger.strategy_performance("quality").await {
        Ok(summary) => summary,
        Err(error) => panic!("summarize: {error}"),
    };
    assert_eq!(summary.total_decisions, 1);
    assert!((summary.average_quality - 0.9).abs() < 1e-9);

    let empty = match ledger.strategy_performance("workflow").await {
        Ok(summary) => summary,
        Err(error) => panic!("summarize: {error}"),
    };
    assert!(empty.confidence.abs() < f64::EPSILON);
}
