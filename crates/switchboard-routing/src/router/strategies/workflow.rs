//! Plans multi-model executions: a draft/refine/review chain for most requests
//! and a weighted ensemble for reviews and decision questions.

use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::super::{RoutingStrategy, StrategyInputs, StrategyKind, degraded_decision};
use super::adaptive::bounded;
use crate::catalog::ModelDescriptor;
use crate::config::{AdaptiveConfig, EnsembleConfig};
use crate::decision::{
    ChainPlan, ChainStep, EnsemblePlan, ExecutionPlan, MergeStrategy, RoutingDecision, StepRole,
    VotingStrategy,
};
use crate::ledger::PerformanceLedger;
use crate::learning::ThemeDetector;
use crate::types::InteractionMode;
use crate::{Result, RoutingError};

/// Complexity from which chains gain a review step.
const REVIEW_STEP_COMPLEXITY: u8 = 70;
/// Smallest weight a size-derived ensemble member gets.
const MIN_SIZE_WEIGHT: f64 = 0.3;

static DECISION_QUESTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(should (i|we)|which (one|option|approach) is better|is it (better|safe|worth)|yes or no|do you recommend|pros and cons|trade-?offs?)\b",
    )
    .ok()
});

fn is_decision_question(text: &str) -> bool {
    DECISION_QUESTION
        .as_ref()
        .is_some_and(|regex| regex.is_match(text))
}

pub struct WorkflowStrategy {
    adaptive: AdaptiveConfig,
    ensemble: EnsembleConfig,
    ledger: Option<Arc<PerformanceLedger>>,
    theme_detector: Option<Arc<dyn ThemeDetector>>,
    collaborator_timeout: Duration,
}

impl WorkflowStrategy {
    pub fn new(adaptive: AdaptiveConfig, ensemble: EnsembleConfig) -> Self {
        Self {
            adaptive,
            ensemble,
            ledger: None,
            theme_detector: None,
            collaborator_timeout: Duration::from_millis(250),
        }
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<PerformanceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[must_use]
    pub fn with_theme_detector(mut self, detector: Arc<dyn ThemeDetector>) -> Self {
        self.theme_detector = Some(detector);
        self
    }

    #[must_use]
    pub fn with_collaborator_timeout(mut self, collaborator_timeout: Duration) -> Self {
        self.collaborator_timeout = collaborator_timeout;
        self
    }

    /// Why an ensemble fits this request, if it does.
    async fn ensemble_reason(&self, inputs: &StrategyInputs<'_>, notes: &mut Vec<String>) -> Option<String> {
        if inputs.context.mode == InteractionMode::CodeReview {
            return Some("code review mode".to_owned());
        }
        if is_decision_question(&inputs.context.text) {
            return Some("decision question".to_owned());
        }
        let detector = self.theme_detector.as_ref()?;
        match bounded(
            self.collaborator_timeout,
            "theme detector",
            detector.detect(inputs.context, inputs.catalog),
        )
        .await
        {
            Ok(Some(theme))
                if theme.theme == "review" && theme.confidence > self.adaptive.theme_confidence_threshold =>
            {
                Some(format!("review theme ({:.2})", theme.confidence))
            }
            Ok(_) => None,
            Err(message) => {
                notes.push(message);
                None
            }
        }
    }

    fn chain(inputs: &StrategyInputs<'_>) -> RoutingDecision {
        let small = &inputs.catalog.smallest().name;
        let large = &inputs.catalog.largest().name;
        let complexity = inputs.context.complexity;

        let mut steps = vec![
            ChainStep::new(small.clone(), StepRole::Draft, 1_024, 0.7),
            ChainStep::new(large.clone(), StepRole::Refine, 2_048, 0.5),
        ];
        if complexity >= REVIEW_STEP_COMPLEXITY {
            steps.push(ChainStep::new(large.clone(), StepRole::Review, 2_048, 0.3));
        }
        let roles: Vec<String> = steps.iter().map(|step| step.role.to_string()).collect();
        let last = steps
            .last()
            .map_or((0.5, 2_048), |step| (step.temperature, step.max_tokens));

        RoutingDecision::new(StrategyKind::Workflow.name(), large.clone(), inputs.context)
            .with_sampling(last.0, last.1)
            .with_tools(false, 0)
            .with_confidence(0.75)
            .with_reasoning(format!(
                "workflow: {} chain for complexity {complexity}",
                roles.join(" -> ")
            ))
            .with_plan(ExecutionPlan::Chain(ChainPlan {
                steps,
                merge: MergeStrategy::Vote,
            }))
    }

    /// Ledger average quality once the model has enough rated decisions.
    async fn learned_weight(&self, model: &str, notes: &mut Vec<String>) -> Option<f64> {
        let ledger = self.ledger.as_ref()?;
        match bounded(self.collaborator_timeout, "ledger", ledger.model_performance(model)).await {
            Ok(summary) if summary.rated_decisions >= self.adaptive.min_ledger_samples => {
                Some(summary.average_quality.max(0.05))
            }
            Ok(_) => None,
            Err(message) => {
                notes.push(message);
                None
            }
        }
    }

    async fn weights(&self, members: &[&ModelDescriptor], notes: &mut Vec<String>) -> BTreeMap<String, f64> {
        let largest = members
            .iter()
            .map(|model| model.parameters_billions())
            .fold(0.0, f64::max);
        let mut weights = BTreeMap::new();
        for model in members {
            let learned = self.learned_weight(&model.name, notes).await;
            let weight = learned.unwrap_or_else(|| {
                if largest > 0.0 {
                    (1.0 - MIN_SIZE_WEIGHT).mul_add(model.parameters_billions() / largest, MIN_SIZE_WEIGHT)
                } else {
                    1.0
                }
            });
            weights.insert(model.name.clone(), weight);
        }
        weights
    }

    async fn ensemble(&self, inputs: &StrategyInputs<'_>, notes: &mut Vec<String>) -> Result<RoutingDecision> {
        let mut members = inputs.catalog.by_size();
        members.reverse();
        members.truncate(self.ensemble.max_models);
        if members.len() < 2 {
            return Err(RoutingError::Other(format!(
                "an ensemble needs two models, {} available",
                members.len()
            )));
        }

        let weights = self.weights(&members, notes).await;
        let models: Vec<String> = members.iter().map(|model| model.name.clone()).collect();
        Ok(
            RoutingDecision::new(self.name(), models[0].clone(), inputs.context)
                .with_sampling(0.3, self.ensemble.member_max_tokens)
                .with_tools(false, 0)
                .with_confidence(0.75)
                .with_reasoning(format!("workflow: weighted ensemble of {}", models.join(", ")))
                .with_plan(ExecutionPlan::Ensemble(EnsemblePlan {
                    models,
                    weights,
                    voting: VotingStrategy::Weighted,
                    consensus_threshold: self.ensemble.consensus_threshold,
                })),
        )
    }
}

#[async_trait]
impl RoutingStrategy for WorkflowStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Workflow
    }

    async fn decide(&self, inputs: &StrategyInputs<'_>) -> RoutingDecision {
        let mut notes = Vec::new();
        let planned = match self.ensemble_reason(inputs, &mut notes).await {
            Some(reason) => self.ensemble(inputs, &mut notes).await.map(|mut decision| {
                decision.append_reasoning(&reason);
                decision
            }),
            None => Ok(Self::chain(inputs)),
        };

        let mut decision = match planned {
            Ok(decision) => decision,
            Err(error) => degraded_decision(self.kind(), inputs, &error.to_string()),
        };
        for note in &notes {
            decision.append_reasoning(note);
        }
        debug!(model = %decision.model, plan = ?decision.plan, "workflow plan");
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModelCatalog, default_models};
    use crate::learning::KeywordThemeDetector;
    use crate::ledger::store::UnavailableStore;
    use crate::types::{RequestContext, ResourceState};

    async fn decide_with(strategy: &WorkflowStrategy, catalog: &ModelCatalog, context: &RequestContext) -> RoutingDecision {
        let resources = ResourceState::unconstrained();
        let inputs = StrategyInputs {
            context,
            resources: &resources,
            catalog,
        };
        strategy.decide(&inputs).await
    }

    fn strategy() -> WorkflowStrategy {
        WorkflowStrategy::new(AdaptiveConfig::default(), EnsembleConfig::default())
    }

    #[tokio::test]
    async fn test_chain_grows_with_complexity() {
        let catalog = ModelCatalog::default();
        let mut context = RequestContext::new("implement a parser");
        context.complexity = 40;
        let decision = decide_with(&strategy(), &catalog, &context).await;
        let roles: Vec<StepRole> = decision
            .chain_plan()
            .map(|plan| plan.steps.iter().map(|step| step.role).collect())
            .unwrap_or_default();
        assert_eq!(roles, [StepRole::Draft, StepRole::Refine]);

        context.complexity = 85;
        let decision = decide_with(&strategy(), &catalog, &context).await;
        let plan = match decision.chain_plan() {
            Some(plan) => plan.clone(),
            None => panic!("expected a chain, got {:?}", decision.plan),
        };
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].model, "llama3.2:3b");
        assert_eq!(plan.steps[2].model, "deepseek-coder-v2:16b");
        assert_eq!(plan.merge, MergeStrategy::Vote);
    }

    #[tokio::test]
    async fn test_review_mode_uses_weighted_ensemble() {
        let catalog = ModelCatalog::default();
        let mut context = RequestContext::new("look at this function");
        context.mode = InteractionMode::CodeReview;
        let decision = decide_with(&strategy(), &catalog, &context).await;
        let plan = match decision.ensemble_plan() {
            Some(plan) => plan.clone(),
            None => panic!("expected an ensemble, got {:?}", decision.plan),
        };
        assert_eq!(plan.models.len(), 3);
        assert_eq!(plan.models[0], "deepseek-coder-v2:16b");
        assert!(plan.weight_for("deepseek-coder-v2:16b") > plan.weight_for(&plan.models[2]));
        assert_eq!(plan.voting, VotingStrategy::Weighted);
        assert!((plan.consensus_threshold - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_decision_question_and_review_theme() {
        let catalog = ModelCatalog::default();
        let question = RequestContext::new("Should I use tokio or async-std here?");
        assert!(decide_with(&strategy(), &catalog, &question).await.ensemble_plan().is_some());

        let themed = strategy().with_theme_detector(Arc::new(KeywordThemeDetector));
        let review = RequestContext::new("please review and audit this pull request");
        assert!(decide_with(&themed, &catalog, &review).await.ensemble_plan().is_some());
    }

    #[tokio::test]
    async fn test_single_model_catalog_degrades() {
        let models: Vec<_> = default_models().into_iter().take(1).collect();
        let catalog = match ModelCatalog::new(models) {
            Ok(catalog) => catalog,
            Err(error) => panic!("catalog rejected: {error}"),
        };
        let mut context = RequestContext::new("review this");
        context.mode = InteractionMode::CodeReview;
        let decision = decide_with(&strategy(), &catalog, &context).await;
        assert!(matches!(decision.plan, ExecutionPlan::Single));
        assert_eq!(decision.strategy, "workflow");
        assert!(decision.reasoning.contains("degraded"));
        assert!(decision.confidence < 0.5);
    }

    #[tokio::test]
    async fn test_unavailable_ledger_falls_back_to_size_weights() {
        let catalog = ModelCatalog::default();
        let mut context = RequestContext::new("look at this function");
        context.mode = InteractionMode::CodeReview;
        let ledger = Arc::new(PerformanceLedger::new(Arc::new(UnavailableStore)));

        let degraded = decide_with(&strategy().with_ledger(ledger), &catalog, &context).await;
        let baseline = decide_with(&strategy(), &catalog, &context).await;
        let (degraded_plan, baseline_plan) = match (degraded.ensemble_plan(), baseline.ensemble_plan()) {
            (Some(degraded), Some(baseline)) => (degraded.clone(), baseline.clone()),
            other => panic!("expected two ensembles, got {other:?}"),
        };
        assert_eq!(degraded_plan.weights, baseline_plan.weights);
        assert!((degraded_plan.weight_for("deepseek-coder-v2:16b") - 1.0).abs() < 1e-9);
        assert!(degraded.reasoning.contains("ledger failed"));
        assert!(!baseline.reasoning.contains("ledger"));
    }
}
