use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{RoutingStrategy, StrategyInputs};
use crate::catalog::ModelCatalog;
use crate::decision::{ExecutionPlan, RoutingDecision};
use crate::types::{RequestContext, ResourceState};
use crate::{Result, RoutingError};

/// The closed set of routing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Speed,
    Cost,
    Quality,
    Adaptive,
    Workflow,
}

impl StrategyKind {
    pub const ALL: [Self; 5] = [
        Self::Speed,
        Self::Cost,
        Self::Quality,
        Self::Adaptive,
        Self::Workflow,
    ];

    /// Selection priority; higher wins among enabled strategies.
    pub fn priority(self) -> u8 {
        match self {
            Self::Cost => 70,
            Self::Quality => 80,
            Self::Speed => 90,
            Self::Adaptive => 110,
            Self::Workflow => 115,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Cost => "cost",
            Self::Quality => "quality",
            Self::Adaptive => "adaptive",
            Self::Workflow => "workflow",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = RoutingError;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| RoutingError::UnknownStrategy(value.to_owned()))
    }
}

/// Holds one implementation per strategy kind and picks the active one.
pub struct StrategyRouter {
    strategies: BTreeMap<StrategyKind, Arc<dyn RoutingStrategy>>,
    enabled: Vec<StrategyKind>,
    catalog: Arc<ModelCatalog>,
}

impl StrategyRouter {
    pub fn new(catalog: Arc<ModelCatalog>, enabled: Vec<StrategyKind>) -> Self {
        Self {
            strategies: BTreeMap::new(),
            enabled,
            catalog,
        }
    }

    /// Registers `strategy`, replacing any earlier one of the same kind.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn RoutingStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn enabled(&self) -> &[StrategyKind] {
        &self.enabled
    }

    /// The requested strategy, or the highest-priority enabled one.
    ///
    /// # Errors
    /// Returns [`RoutingError::UnknownStrategy`] if the requested strategy is not
    /// registered or no enabled strategy is.
    pub fn active(&self, requested: Option<StrategyKind>) -> Result<&Arc<dyn RoutingStrategy>> {
        if let Some(kind) = requested {
            return self
                .strategies
                .get(&kind)
                .ok_or_else(|| RoutingError::UnknownStrategy(kind.to_string()));
        }

        self.enabled
            .iter()
            .filter_map(|kind| self.strategies.get(kind))
            .max_by_key(|strategy| strategy.priority())
            .ok_or_else(|| RoutingError::UnknownStrategy("no enabled strategy is registered".to_owned()))
    }

    /// Runs the active strategy and applies the caller's model override.
    ///
    /// # Errors
    /// Returns an error only if no strategy can be selected.
    pub async fn route(
        &self,
        context: &RequestContext,
        resources: &ResourceState,
        requested: Option<StrategyKind>,
    ) -> Result<RoutingDecision> {
        let strategy = self.active(requested)?;
        let inputs = StrategyInputs {
            context,
            resources,
            catalog: &self.catalog,
        };
        let mut decision = strategy.decide(&inputs).await;

        if let Some(model) = &context.overrides.model {
            self.apply_model_override(&mut decision, model);
        }
        if decision.fallback_models.is_empty() && matches!(decision.plan, ExecutionPlan::Single) {
            decision.fallback_models = self.catalog.fallbacks_for(&decision.model);
        }

        info!(
            strategy = %decision.strategy,
            model = %decision.model,
            complexity = decision.complexity,
            confidence = decision.confidence,
            "routing decision"
        );
        Ok(decision)
    }

    fn apply_model_override(&self, decision: &mut RoutingDecision, model: &str) {
        if !self.catalog.contains(model) {
            warn!(model, "override names a model outside the catalog");
            decision.append_reasoning(&format!("override {model} is not in the catalog and was ignored"));
            return;
        }
        match &mut decision.plan {
            ExecutionPlan::Single => {
                decision.model = model.to_owned();
                decision.append_reasoning(&format!("manual override selected {model}"));
            }
            ExecutionPlan::Chain(_) | ExecutionPlan::Ensemble(_) => {
                decision.append_reasoning(&format!("override {model} ignored for multi-model plan"));
            }
        }
    }
}
