use async_trait::async_trait;

use super::super::{RoutingStrategy, StrategyInputs, StrategyKind};
use crate::decision::RoutingDecision;

/// Routes everything to the largest model with a generous budget and tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityStrategy;

impl QualityStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RoutingStrategy for QualityStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Quality
    }

    async fn decide(&self, inputs: &StrategyInputs<'_>) -> RoutingDecision {
        let model = inputs.catalog.largest();
        RoutingDecision::new(self.name(), model.name.clone(), inputs.context)
            .with_sampling(0.7, 8_192)
            .with_tools(true, 5)
            .with_confidence(0.85)
            .with_reasoning(format!("quality: largest model {} ({})", model.name, model.size_class))
    }
}
