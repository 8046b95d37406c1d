//! End-to-end request handling: analyze, route, constrain, record, execute.

use core::iter;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use switchboard_core::{ChatMessage, ChatRequest, Completion, InferenceBackend, TokenUsage};
use switchboard_providers::OllamaBackend;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analyzer::ContextAnalyzer;
use crate::catalog::ModelCatalog;
use crate::config::EngineConfig;
use crate::constraints::{ConstraintEnforcer, SoftViolation};
use crate::decision::{ExecutionPlan, RoutingDecision};
use crate::learning::{KeywordThemeDetector, LedgerParameterTuner, ParameterTuner, ThemeDetector};
use crate::ledger::{JsonLedgerStore, Outcome, OutcomeStatus, PerformanceLedger};
use crate::resources::{ResourceMonitor, SystemMonitor};
use crate::router::{
    AdaptiveStrategy, CostStrategy, QualityStrategy, SpeedStrategy, StrategyKind, StrategyRouter,
    WorkflowStrategy,
};
use crate::types::RequestContext;
use crate::workflow::{ChainExecutor, ChainResult, EnsembleExecutor, EnsembleResult};
use crate::{Result, RoutingError};

/// Non-fatal problem encountered while routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum RouteWarning {
    /// The decision could not be recorded; feedback for it will report `NotFound`.
    LedgerWrite(String),
    Resource(SoftViolation),
}

/// A routing decision plus anything the caller should know about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteOutcome {
    pub decision: RoutingDecision,
    pub warnings: Vec<RouteWarning>,
}

/// A model that failed before a fallback answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub model: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleResult {
    pub completion: Completion,
    /// Retryable failures on earlier candidates, in order.
    pub failed_attempts: Vec<FailedAttempt>,
}

/// Result of executing a decision, shaped by its plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutionResult {
    Single(SingleResult),
    Chain(ChainResult),
    Ensemble(EnsembleResult),
}

impl ExecutionResult {
    /// Text to show the user.
    pub fn text(&self) -> String {
        match self {
            Self::Single(single) => single.completion.text.clone(),
            Self::Chain(chain) => chain.output.clone(),
            Self::Ensemble(ensemble) => ensemble.summary(),
        }
    }

    pub fn tokens_used(&self) -> u64 {
        match self {
            Self::Single(single) => single.completion.tokens.total(),
            Self::Chain(chain) => chain.total_tokens,
            Self::Ensemble(ensemble) => ensemble.members.iter().map(|member| member.tokens_used).sum(),
        }
    }
}

/// Router with every strategy registered and the default learning collaborators wired in.
pub fn default_router(
    config: &EngineConfig,
    catalog: Arc<ModelCatalog>,
    ledger: &Arc<PerformanceLedger>,
) -> StrategyRouter {
    let collaborator_timeout = Duration::from_millis(config.routing.collaborator_timeout_ms);
    let detector: Arc<dyn ThemeDetector> = Arc::new(KeywordThemeDetector);
    let tuner: Arc<dyn ParameterTuner> = Arc::new(LedgerParameterTuner::new(Arc::clone(ledger)));

    let adaptive = AdaptiveStrategy::new(config.adaptive.clone())
        .with_ledger(Arc::clone(ledger))
        .with_theme_detector(Arc::clone(&detector))
        .with_tuner(tuner)
        .with_collaborator_timeout(collaborator_timeout);
    let workflow = WorkflowStrategy::new(config.adaptive.clone(), config.ensemble.clone())
        .with_ledger(Arc::clone(ledger))
        .with_theme_detector(detector)
        .with_collaborator_timeout(collaborator_timeout);

    StrategyRouter::new(catalog, config.routing.enabled_strategies.clone())
        .with_strategy(Arc::new(SpeedStrategy))
        .with_strategy(Arc::new(CostStrategy))
        .with_strategy(Arc::new(QualityStrategy))
        .with_strategy(Arc::new(adaptive))
        .with_strategy(Arc::new(workflow))
}

/// The engine as seen by a caller.
///
/// Every collaborator is injected at construction; nothing is global.
pub struct Orchestrator {
    analyzer: ContextAnalyzer,
    monitor: Box<dyn ResourceMonitor>,
    router: StrategyRouter,
    enforcer: ConstraintEnforcer,
    ledger: Arc<PerformanceLedger>,
    backend: Arc<dyn InferenceBackend>,
    chain: ChainExecutor,
    ensemble: EnsembleExecutor,
}

impl Orchestrator {
    /// Builds the engine around `backend` and `ledger`, sampling live system resources.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the catalog is empty.
    pub fn new(
        config: &EngineConfig,
        backend: Arc<dyn InferenceBackend>,
        ledger: Arc<PerformanceLedger>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(ModelCatalog::new(config.catalog.clone())?);
        let router = default_router(config, Arc::clone(&catalog), &ledger);

        Ok(Self {
            analyzer: ContextAnalyzer::new(config.complexity.clone()),
            monitor: Box::new(SystemMonitor::new(&config.resources)),
            router,
            enforcer: ConstraintEnforcer::new(config.resources.clone(), catalog),
            ledger,
            chain: ChainExecutor::new(Arc::clone(&backend), config.chain.clone()),
            ensemble: EnsembleExecutor::new(Arc::clone(&backend), config.ensemble.clone()),
            backend,
        })
    }

    /// Engine backed by Ollama and the on-disk ledger named in `config`.
    ///
    /// Must be called inside a tokio runtime when the background writer is enabled.
    ///
    /// # Errors
    /// Returns an error if the ledger directory or HTTP client cannot be set up.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let store = JsonLedgerStore::open(config.ledger.resolve_directory()?)?;
        let mut ledger = PerformanceLedger::new(Arc::new(store));
        if config.ledger.background {
            ledger = ledger.with_background_writer(config.ledger.max_retries);
        }
        let backend = OllamaBackend::new(Duration::from_secs(config.backend.request_timeout_secs))?
            .with_url(config.backend.url.clone());
        Self::new(config, Arc::new(backend), Arc::new(ledger))
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Box<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    #[must_use]
    pub fn with_router(mut self, router: StrategyRouter) -> Self {
        self.router = router;
        self
    }

    #[must_use]
    pub fn with_analyzer(mut self, analyzer: ContextAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    #[must_use]
    pub fn with_chain_executor(mut self, chain: ChainExecutor) -> Self {
        self.chain = chain;
        self
    }

    #[must_use]
    pub fn with_ensemble_executor(mut self, ensemble: EnsembleExecutor) -> Self {
        self.ensemble = ensemble;
        self
    }

    pub fn ledger(&self) -> &Arc<PerformanceLedger> {
        &self.ledger
    }

    pub fn router(&self) -> &StrategyRouter {
        &self.router
    }

    pub fn analyze(&self, text: &str, file_hint: Option<&str>) -> RequestContext {
        self.analyzer.analyze(text, file_hint)
    }

    /// Routes `context`, fits the decision to current resources and records it.
    ///
    /// A ledger failure is returned as a warning; the decision is still usable.
    ///
    /// # Errors
    /// Returns an error only if no strategy can be selected.
    pub async fn route(&self, context: &RequestContext, requested: Option<StrategyKind>) -> Result<RouteOutcome> {
        let resources = self.monitor.sample();
        let decision = self.router.route(context, &resources, requested).await?;
        let decision = self.enforcer.apply(decision, &resources);

        let mut warnings: Vec<RouteWarning> = self
            .enforcer
            .validate(&decision, &resources)
            .into_iter()
            .map(RouteWarning::Resource)
            .collect();
        if let Err(error) = self.ledger.record_decision(&decision).await {
            warn!(decision = %decision.id, %error, "decision not recorded");
            warnings.push(RouteWarning::LedgerWrite(error.to_string()));
        }
        Ok(RouteOutcome { decision, warnings })
    }

    /// Runs the decision's plan.
    ///
    /// # Errors
    /// Returns [`RoutingError::ExecutionFailed`] when a single call fails on every
    /// candidate model and [`RoutingError::AllModelsFailed`] when no ensemble member votes.
    pub async fn execute(&self, decision: &RoutingDecision, context: &RequestContext) -> Result<ExecutionResult> {
        let result = match &decision.plan {
            ExecutionPlan::Single => ExecutionResult::Single(self.execute_single(decision, context).await?),
            ExecutionPlan::Chain(plan) => ExecutionResult::Chain(self.chain.execute(plan, &context.text).await),
            ExecutionPlan::Ensemble(plan) => {
                ExecutionResult::Ensemble(self.ensemble.execute(plan, &context.text).await?)
            }
        };
        info!(decision = %decision.id, tokens = result.tokens_used(), "execution finished");
        Ok(result)
    }

    /// Analyzes, routes and executes `text` in one go.
    ///
    /// # Errors
    /// See [`Self::route`] and [`Self::execute`].
    pub async fn run(
        &self,
        text: &str,
        file_hint: Option<&str>,
        requested: Option<StrategyKind>,
    ) -> Result<(RouteOutcome, ExecutionResult)> {
        let context = self.analyze(text, file_hint);
        let routed = self.route(&context, requested).await?;
        let result = self.execute(&routed.decision, &context).await?;
        Ok((routed, result))
    }

    /// Attaches user feedback to an earlier decision. Unknown ids are a no-op.
    ///
    /// # Errors
    /// Returns an error only if the ledger store fails.
    pub async fn report_feedback(&self, decision_id: Uuid, outcome: Outcome) -> Result<OutcomeStatus> {
        self.ledger.record_outcome(decision_id, outcome).await
    }

    /// Drains queued ledger writes.
    pub async fn shutdown(self) {
        match Arc::try_unwrap(self.ledger) {
            Ok(ledger) => ledger.shutdown().await,
            Err(shared) => {
                if let Err(error) = shared.flush().await {
                    warn!(%error, "ledger writes lost at shutdown");
                }
            }
        }
    }

    async fn execute_single(&self, decision: &RoutingDecision, context: &RequestContext) -> Result<SingleResult> {
        let messages = conversation(context);
        let mut failed_attempts = Vec::new();

        for model in iter::once(&decision.model).chain(&decision.fallback_models) {
            let request = ChatRequest::new(model.clone(), messages.clone())
                .with_temperature(decision.temperature)
                .with_max_tokens(decision.max_tokens)
                .with_stream(decision.stream);
            match self.call(&request).await {
                Ok(completion) => {
                    return Ok(SingleResult {
                        completion,
                        failed_attempts,
                    });
                }
                Err(error) if error.is_retryable() => {
                    warn!(model, %error, "model failed, trying next fallback");
                    failed_attempts.push(FailedAttempt {
                        model: model.clone(),
                        error: error.to_string(),
                    });
                }
                Err(error) => return Err(RoutingError::execution(model.clone(), &error)),
            }
        }

        Err(RoutingError::ExecutionFailed {
            model: decision.model.clone(),
            message: failed_attempts
                .iter()
                .map(|attempt| format!("{}: {}", attempt.model, attempt.error))
                .collect::<Vec<_>>()
                .join("; "),
            retryable: true,
        })
    }

    async fn call(&self, request: &ChatRequest) -> switchboard_core::Result<Completion> {
        if !request.stream {
            return self.backend.chat(request).await;
        }
        let started = Instant::now();
        let mut stream = self.backend.chat_stream(request).await?;
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment?);
        }
        Ok(Completion {
            tokens: TokenUsage::estimate(&request.transcript(), &text),
            text,
            model: request.model.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Conversation history followed by the request itself.
fn conversation(context: &RequestContext) -> Vec<ChatMessage> {
    context
        .history
        .iter()
        .map(|entry| ChatMessage {
            role: entry.role,
            content: entry.content.clone(),
        })
        .chain(iter::once(ChatMessage::user(context.text.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerStore, PerformanceRecord, RecordFilter};
    use crate::resources::StaticMonitor;
    use crate::types::{HistoryEntry, ResourceState};
    use async_trait::async_trait;
    use switchboard_core::Role;
    use switchboard_providers::MockBackend;

    struct BrokenStore;

    #[async_trait]
    impl LedgerStore for BrokenStore {
        async fn upsert_decision(&self, _record: PerformanceRecord) -> Result<()> {
            Err(RoutingError::Ledger("disk full".to_owned()))
        }

        async fn record_outcome(&self, _id: Uuid, _outcome: Outcome) -> Result<OutcomeStatus> {
            Ok(OutcomeStatus::NotFound)
        }

        async fn get(&self, _id: Uuid) -> Result<Option<PerformanceRecord>> {
            Ok(None)
        }

        async fn scan(&self, _filter: &RecordFilter) -> Result<Vec<PerformanceRecord>> {
            Ok(Vec::new())
        }
    }

    fn engine(mock: &MockBackend, ledger: PerformanceLedger, strategy: StrategyKind) -> Orchestrator {
        let config = EngineConfig {
            routing: crate::config::RoutingSettings {
                enabled_strategies: vec![strategy],
                ..crate::config::RoutingSettings::default()
            },
            ..EngineConfig::default()
        };
        match Orchestrator::new(&config, Arc::new(mock.clone()), Arc::new(ledger)) {
            Ok(engine) => engine.with_monitor(Box::new(StaticMonitor::new(ResourceState::unconstrained()))),
            Err(error) => panic!("engine failed to build: {error}"),
        }
    }

    #[tokio::test]
    async fn test_route_records_decision() {
        let mock = MockBackend::new();
        let orchestrator = engine(&mock, PerformanceLedger::in_memory(), StrategyKind::Speed);
        let context = orchestrator.analyze("what is 2 + 2", None);
        let routed = match orchestrator.route(&context, None).await {
            Ok(routed) => routed,
            Err(error) => panic!("routing failed: {error}"),
        };
        assert!(routed.warnings.is_empty());
        assert_eq!(routed.decision.model, "llama3.2:3b");

        let stored = orchestrator.ledger().store().get(routed.decision.id).await;
        assert!(matches!(stored, Ok(Some(record)) if record.strategy == "speed"));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ledger_failure_is_a_warning() {
        let mock = MockBackend::new();
        let orchestrator = engine(&mock, PerformanceLedger::new(Arc::new(BrokenStore)), StrategyKind::Cost);
        let context = orchestrator.analyze("hello", None);
        let routed = match orchestrator.route(&context, None).await {
            Ok(routed) => routed,
            Err(error) => panic!("routing failed: {error}"),
        };
        assert!(matches!(
            routed.warnings.as_slice(),
            [RouteWarning::LedgerWrite(message)] if message.contains("disk full")
        ));
    }

    #[tokio::test]
    async fn test_single_call_falls_back_on_retryable_failure() {
        let mock = MockBackend::new()
            .with_model_failure("llama3.2:3b", Some(503), "loading")
            .with_default_response("fallback answer");
        let orchestrator = engine(&mock, PerformanceLedger::in_memory(), StrategyKind::Speed);
        let context = RequestContext::new("hi").with_history(vec![HistoryEntry::new(Role::User, "earlier")]);
        let routed = match orchestrator.route(&context, None).await {
            Ok(routed) => routed,
            Err(error) => panic!("routing failed: {error}"),
        };
        let result = orchestrator.execute(&routed.decision, &context).await;

        let single = match result {
            Ok(ExecutionResult::Single(single)) => single,
            other => panic!("expected a single result, got {other:?}"),
        };
        assert_eq!(single.completion.text, "fallback answer");
        assert_eq!(single.failed_attempts.len(), 1);
        assert_eq!(mock.called_models()[1], routed.decision.fallback_models[0]);
        assert!(mock.call_history()[0].transcript.starts_with("earlier\nhi"));
    }

    #[tokio::test]
    async fn test_fallbacks_stay_within_enforced_tier() {
        let mock = MockBackend::new()
            .with_model_failure("qwen2.5-coder:7b-instruct-q4_K_M", Some(503), "overloaded")
            .with_default_response("small answer");
        let orchestrator = engine(&mock, PerformanceLedger::in_memory(), StrategyKind::Quality)
            .with_monitor(Box::new(StaticMonitor::new(ResourceState::unconstrained().with_ram(8_000))));
        let (routed, result) = match orchestrator.run("explain ownership", None, None).await {
            Ok(pair) => pair,
            Err(error) => panic!("run failed: {error}"),
        };
        assert_eq!(routed.decision.model, "qwen2.5-coder:7b-instruct-q4_K_M");
        assert_eq!(routed.decision.fallback_models, ["llama3.2:3b"]);
        assert_eq!(result.text(), "small answer");
        assert_eq!(mock.called_models(), ["qwen2.5-coder:7b-instruct-q4_K_M", "llama3.2:3b"]);
    }

    #[tokio::test]
    async fn test_low_ram_downgrade_never_retries_larger_models() {
        let mock = MockBackend::new().with_model_failure("llama3.2:3b", Some(503), "loading");
        let orchestrator = engine(&mock, PerformanceLedger::in_memory(), StrategyKind::Quality)
            .with_monitor(Box::new(StaticMonitor::new(ResourceState::unconstrained().with_ram(4_000))));
        let result = orchestrator.run("explain ownership", None, None).await;
        assert!(matches!(result, Err(RoutingError::ExecutionFailed { retryable: true, .. })));
        assert_eq!(mock.called_models(), ["llama3.2:3b"]);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_surfaces() {
        let mock = MockBackend::new().with_model_failure("llama3.2:3b", Some(404), "model not found");
        let orchestrator = engine(&mock, PerformanceLedger::in_memory(), StrategyKind::Speed);
        let result = orchestrator.run("hi", None, None).await;
        match result {
            Err(RoutingError::ExecutionFailed { model, retryable, .. }) => {
                assert_eq!(model, "llama3.2:3b");
                assert!(!retryable);
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_feedback_round_trip() {
        let mock = MockBackend::new().with_default_response("ok");
        let orchestrator = engine(&mock, PerformanceLedger::in_memory(), StrategyKind::Quality);
        let (routed, result) = match orchestrator.run("explain ownership", None, None).await {
            Ok(pair) => pair,
            Err(error) => panic!("run failed: {error}"),
        };
        assert_eq!(result.text(), "ok");

        let first = orchestrator.report_feedback(routed.decision.id, Outcome::new(0.9)).await;
        assert!(matches!(first, Ok(OutcomeStatus::Recorded)));
        let again = orchestrator.report_feedback(routed.decision.id, Outcome::new(0.1)).await;
        assert!(matches!(again, Ok(OutcomeStatus::AlreadyRecorded)));
        let unknown = orchestrator.report_feedback(Uuid::new_v4(), Outcome::new(0.5)).await;
        assert!(matches!(unknown, Ok(OutcomeStatus::NotFound)));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_streaming_decision_collects_fragments() {
        let mock = MockBackend::new().with_default_response("streamed text");
        let orchestrator = engine(&mock, PerformanceLedger::in_memory(), StrategyKind::Speed);
        let context = RequestContext::new("hi");
        let decision = RoutingDecision::new("speed", "llama3.2:3b", &context).with_stream(true);
        let result = orchestrator.execute(&decision, &context).await;
        assert!(matches!(result, Ok(ExecutionResult::Single(single)) if single.completion.text == "streamed text"));
    }
}
