use async_trait::async_trait;

use super::super::{RoutingStrategy, StrategyInputs, StrategyKind};
use crate::decision::RoutingDecision;

/// Complexity below which the smallest model is good enough.
const SMALL_MODEL_LIMIT: u8 = 40;

/// Picks the cheapest model that fits the complexity, with conservative token budgets.
///
/// Model size never decreases as complexity rises.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostStrategy;

impl CostStrategy {
    pub fn new() -> Self {
        Self
    }
}

/// Decision made by the cost heuristics, attributed to `strategy`.
pub(crate) fn cost_decision(strategy: &str, inputs: &StrategyInputs<'_>) -> RoutingDecision {
    let complexity = inputs.context.complexity;
    let (model, max_tokens) = if complexity < SMALL_MODEL_LIMIT {
        (inputs.catalog.smallest(), 1_024)
    } else {
        (inputs.catalog.mid_tier(Some("Q4")), 2_048)
    };

    RoutingDecision::new(strategy, model.name.clone(), inputs.context)
        .with_sampling(0.5, max_tokens)
        .with_tools(false, 0)
        .with_confidence(0.7)
        .with_reasoning(format!(
            "cost: complexity {complexity} fits {} ({})",
            model.name, model.size_class
        ))
}

#[async_trait]
impl RoutingStrategy for CostStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Cost
    }

    async fn decide(&self, inputs: &StrategyInputs<'_>) -> RoutingDecision {
        cost_decision(self.name(), inputs)
    }
}
