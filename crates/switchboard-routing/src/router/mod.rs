//! Routing strategies and the registry that selects between them.

/// Strategy registry and selection
pub mod registry;
/// Strategy implementations
pub mod strategies;

use async_trait::async_trait;

use crate::catalog::ModelCatalog;
use crate::decision::RoutingDecision;
use crate::types::{RequestContext, ResourceState};

pub use registry::{StrategyKind, StrategyRouter};
pub use strategies::{AdaptiveStrategy, CostStrategy, QualityStrategy, SpeedStrategy, WorkflowStrategy};

/// Everything a strategy looks at for one request.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInputs<'a> {
    pub context: &'a RequestContext,
    pub resources: &'a ResourceState,
    pub catalog: &'a ModelCatalog,
}

/// A model-selection policy.
///
/// Strategies that consult the ledger or learning collaborators hold them from
/// construction.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Always produces a decision. Internal failures degrade to the cost
    /// heuristics, see [`degraded_decision`].
    async fn decide(&self, inputs: &StrategyInputs<'_>) -> RoutingDecision;

    fn priority(&self) -> u8 {
        self.kind().priority()
    }

    fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Cost-strategy decision attributed to `strategy`, with halved confidence and the cause in the reasoning.
pub fn degraded_decision(strategy: StrategyKind, inputs: &StrategyInputs<'_>, cause: &str) -> RoutingDecision {
    let mut decision = strategies::cost::cost_decision(strategy.name(), inputs);
    let confidence = decision.confidence / 2.0;
    decision.set_confidence(confidence);
    decision.append_reasoning(&format!("{strategy} strategy degraded: {cause}"));
    tracing::warn!(%strategy, cause, "strategy degraded to cost heuristics");
    decision
}
