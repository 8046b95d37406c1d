use async_trait::async_trait;

use super::super::{RoutingStrategy, StrategyInputs, StrategyKind};
use crate::decision::RoutingDecision;

/// Routes everything to the smallest model with short, focused sampling.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedStrategy;

impl SpeedStrategy {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RoutingStrategy for SpeedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Speed
    }

    async fn decide(&self, inputs: &StrategyInputs<'_>) -> RoutingDecision {
        let model = inputs.catalog.smallest();
        RoutingDecision::new(self.name(), model.name.clone(), inputs.context)
            .with_sampling(0.3, 1_024)
            .with_tools(false, 0)
            .with_confidence(0.8)
            .with_reasoning(format!("speed: smallest model {} ({})", model.name, model.size_class))
    }
}
