//! Resource-aware adjustment of routing decisions.
//!
//! Every rule fires independently and the effects accumulate. The enforcer
//! snapshots the strategy's original choice into the decision metadata and always
//! starts from that snapshot, so applying it again with the same resources
//! changes nothing. When a rule forces a smaller model, the fallback list is
//! rebuilt from the forced model and never climbs above it.

use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, to_value};
use tracing::{debug, warn};

use crate::catalog::ModelCatalog;
use crate::config::ResourceConfig;
use crate::decision::{ExecutionPlan, RoutingDecision};
use crate::types::ResourceState;

const BASELINE_KEY: &str = "constraint_baseline";
const APPLIED_KEY: &str = "constraints";

/// The decision fields the enforcer may change, as the strategy left them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Baseline {
    model: String,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
    reasoning: String,
    #[serde(default)]
    fallback_models: Vec<String>,
}

impl Baseline {
    fn capture(decision: &RoutingDecision) -> Self {
        Self {
            model: decision.model.clone(),
            max_tokens: decision.max_tokens,
            temperature: decision.temperature,
            stream: decision.stream,
            reasoning: decision.reasoning.clone(),
            fallback_models: decision.fallback_models.clone(),
        }
    }

    fn restore(self, decision: &mut RoutingDecision) {
        decision.model = self.model;
        decision.max_tokens = self.max_tokens;
        decision.temperature = self.temperature;
        decision.stream = self.stream;
        decision.reasoning = self.reasoning;
        decision.fallback_models = self.fallback_models;
    }
}

/// A non-blocking resource warning about a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftViolation {
    pub model: String,
    pub required_ram_mb: u64,
    pub available_ram_mb: u64,
}

impl fmt::Display for SoftViolation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} wants {}MB RAM but only {}MB is available",
            self.model, self.required_ram_mb, self.available_ram_mb
        )
    }
}

pub struct ConstraintEnforcer {
    config: ResourceConfig,
    catalog: Arc<ModelCatalog>,
}

impl ConstraintEnforcer {
    pub fn new(config: ResourceConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self { config, catalog }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Adjusts model, fallbacks, token budget, temperature and streaming to fit `resources`.
    ///
    /// Reasoning only gains a clause. Plans keep their per-step models.
    pub fn apply(&self, mut decision: RoutingDecision, resources: &ResourceState) -> RoutingDecision {
        let baseline = decision
            .metadata
            .get(BASELINE_KEY)
            .cloned()
            .and_then(|value| from_value::<Baseline>(value).ok())
            .unwrap_or_else(|| Baseline::capture(&decision));
        if let Ok(value) = to_value(&baseline) {
            decision.metadata.insert(BASELINE_KEY.to_owned(), value);
        }
        baseline.restore(&mut decision);

        let mut applied = Vec::new();
        let ram_forced = self.limit_ram(&mut decision, resources, &mut applied);
        let gpu_forced = self.limit_gpu(&mut decision, &mut applied);
        self.limit_cpu(&mut decision, resources, &mut applied);
        self.limit_thermal(&mut decision, resources, &mut applied);
        let battery_forced = self.limit_battery(&mut decision, resources, &mut applied);
        self.limit_response_time(&mut decision, &mut applied);
        self.limit_fallbacks(&mut decision, ram_forced || gpu_forced || battery_forced);
        decision.max_tokens = decision.max_tokens.max(1);

        if applied.is_empty() {
            decision.metadata.remove(APPLIED_KEY);
        } else {
            debug!(rules = ?applied, model = %decision.model, "constraints applied");
            decision.append_reasoning(&format!("constraints: {}", applied.join(", ")));
            decision.metadata.insert(
                APPLIED_KEY.to_owned(),
                Value::Array(applied.into_iter().map(Value::String).collect()),
            );
        }
        decision
    }

    /// Soft checks that never change the decision; violations are logged and returned.
    pub fn validate(&self, decision: &RoutingDecision, resources: &ResourceState) -> Vec<SoftViolation> {
        let Some(model) = self.catalog.find(&decision.model) else {
            return Vec::new();
        };
        if resources.available_ram_mb.saturating_mul(2) >= model.ram_mb {
            return Vec::new();
        }
        let violation = SoftViolation {
            model: model.name.clone(),
            required_ram_mb: model.ram_mb,
            available_ram_mb: resources.available_ram_mb,
        };
        warn!(%violation, "soft resource violation");
        vec![violation]
    }

    fn limit_ram(&self, decision: &mut RoutingDecision, resources: &ResourceState, applied: &mut Vec<String>) -> bool {
        let available = resources.available_ram_mb;
        if available >= self.config.ram_ceiling_mb {
            return false;
        }
        let tier = if available < self.config.low_ram_mb {
            self.catalog.smallest()
        } else if available < self.config.mid_ram_mb {
            self.catalog.mid_tier(Some("Q4"))
        } else {
            self.catalog.mid_tier(Some("Q5"))
        };
        tier.name.clone_into(&mut decision.model);
        decision.max_tokens = decision.max_tokens.min(self.config.ram_token_cap);
        applied.push(format!("{available}MB RAM -> {}", tier.name));
        true
    }

    fn limit_gpu(&self, decision: &mut RoutingDecision, applied: &mut Vec<String>) -> bool {
        let Some(model) = self.catalog.find(&decision.model) else {
            return false;
        };
        if model.gpu_layers <= self.config.max_gpu_layers {
            return false;
        }
        let friendly = self.catalog.most_cpu_friendly();
        if friendly.name != decision.model {
            applied.push(format!("{} GPU layers -> {}", model.gpu_layers, friendly.name));
            friendly.name.clone_into(&mut decision.model);
        }
        true
    }

    fn limit_cpu(&self, decision: &mut RoutingDecision, resources: &ResourceState, applied: &mut Vec<String>) {
        if resources.cpu_usage_percent <= self.config.cpu_ceiling_percent {
            return;
        }
        decision.max_tokens = (f64::from(decision.max_tokens) * self.config.cpu_token_factor).round() as u32;
        decision.temperature = decision.temperature.min(self.config.cpu_temperature_cap);
        applied.push(format!("CPU {:.0}%", resources.cpu_usage_percent));
    }

    fn limit_thermal(&self, decision: &mut RoutingDecision, resources: &ResourceState, applied: &mut Vec<String>) {
        let Some(celsius) = resources.temperature_celsius else {
            return;
        };
        if celsius <= self.config.thermal_threshold_celsius {
            return;
        }
        decision.stream = true;
        decision.max_tokens /= 2;
        applied.push(format!("{celsius:.0}C thermal"));
    }

    fn limit_battery(&self, decision: &mut RoutingDecision, resources: &ResourceState, applied: &mut Vec<String>) -> bool {
        let Some(battery) = resources.battery else {
            return false;
        };
        if !battery.on_battery || battery.level_percent >= self.config.battery_floor_percent {
            return false;
        }
        self.catalog.smallest().name.clone_into(&mut decision.model);
        decision.max_tokens = decision.max_tokens.min(self.config.battery_token_cap);
        decision.stream = true;
        applied.push(format!("battery {:.0}%", battery.level_percent));
        true
    }

    /// The selected model is never its own fallback. After a forced model
    /// change, single-call fallbacks are rebuilt from the forced model and keep
    /// only entries that need no more RAM or GPU layers than it does.
    fn limit_fallbacks(&self, decision: &mut RoutingDecision, forced: bool) {
        if forced && matches!(decision.plan, ExecutionPlan::Single) {
            decision.fallback_models = match self.catalog.find(&decision.model) {
                Some(ceiling) => self
                    .catalog
                    .fallbacks_for(&ceiling.name)
                    .into_iter()
                    .filter(|name| {
                        self.catalog
                            .find(name)
                            .is_some_and(|model| model.ram_mb <= ceiling.ram_mb && model.gpu_layers <= ceiling.gpu_layers)
                    })
                    .collect(),
                None => Vec::new(),
            };
        }
        let selected = &decision.model;
        decision.fallback_models.retain(|name| name != selected);
    }

    fn limit_response_time(&self, decision: &mut RoutingDecision, applied: &mut Vec<String>) {
        let Some(budget_ms) = self.config.max_response_time_ms else {
            return;
        };
        let cap = u32::try_from(budget_ms / 2).unwrap_or(u32::MAX);
        if decision.max_tokens > cap {
            decision.max_tokens = cap;
            applied.push(format!("{budget_ms}ms response budget"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestContext;

    fn enforcer(config: ResourceConfig) -> ConstraintEnforcer {
        ConstraintEnforcer::new(config, Arc::new(ModelCatalog::default()))
    }

    fn quality_decision() -> RoutingDecision {
        RoutingDecision::new("quality", "deepseek-coder-v2:16b", &RequestContext::new("q"))
            .with_sampling(0.7, 8_192)
            .with_reasoning("quality: largest model")
    }

    #[test]
    fn test_low_ram_downgrades_quality_decision() {
        let resources = ResourceState::unconstrained().with_ram(4_000).with_cpu(40.0);
        let decision = enforcer(ResourceConfig::default()).apply(quality_decision(), &resources);
        assert_eq!(decision.model, "llama3.2:3b");
        assert_eq!(decision.max_tokens, 4_000);
        assert!(decision.reasoning.starts_with("quality: largest model; constraints:"));
    }

    #[test]
    fn test_ram_tiers() {
        let enforcer = enforcer(ResourceConfig::default());
        let mid = enforcer.apply(quality_decision(), &ResourceState::unconstrained().with_ram(8_000));
        assert_eq!(mid.model, "qwen2.5-coder:7b-instruct-q4_K_M");
        let upper = enforcer.apply(quality_decision(), &ResourceState::unconstrained().with_ram(14_000));
        assert_eq!(upper.model, "qwen2.5-coder:7b-instruct-q5_K_M");
        let free = enforcer.apply(quality_decision(), &ResourceState::unconstrained());
        assert_eq!(free.model, "deepseek-coder-v2:16b");
        assert_eq!(free.max_tokens, 8_192);
    }

    #[test]
    fn test_idempotent() {
        let enforcer = enforcer(ResourceConfig {
            max_response_time_ms: Some(3_000),
            ..ResourceConfig::default()
        });
        let resources = ResourceState::unconstrained()
            .with_ram(5_000)
            .with_cpu(95.0)
            .with_temperature(90.0)
            .with_battery(10.0, true);
        let once = enforcer.apply(quality_decision(), &resources);
        let twice = enforcer.apply(once.clone(), &resources);
        assert_eq!(once, twice);
        // 4000 cap, x0.7, halved, then under the 2000 battery cap and the 1500 time cap.
        assert_eq!(once.max_tokens, 1_400);
        assert!(once.stream);
        assert!(once.temperature <= 0.2);
    }

    #[test]
    fn test_reapplying_with_relief_restores_strategy_choice() {
        let enforcer = enforcer(ResourceConfig::default());
        let constrained = enforcer.apply(quality_decision(), &ResourceState::unconstrained().with_ram(3_000));
        let relieved = enforcer.apply(constrained, &ResourceState::unconstrained());
        assert_eq!(relieved.model, "deepseek-coder-v2:16b");
        assert_eq!(relieved.reasoning, "quality: largest model");
    }

    #[test]
    fn test_gpu_budget() {
        let limited = enforcer(ResourceConfig {
            max_gpu_layers: 10,
            ..ResourceConfig::default()
        });
        let decision = limited.apply(quality_decision(), &ResourceState::unconstrained());
        assert_eq!(decision.model, "llama3.2:3b");
    }

    #[test]
    fn test_unreported_gpu_keeps_largest_model_within_layer_budget() {
        let mut no_gpu = ResourceState::unconstrained().with_ram(64_000);
        no_gpu.gpu_available = false;
        no_gpu.gpu_layers = 0;
        let decision = enforcer(ResourceConfig::default()).apply(quality_decision(), &no_gpu);
        assert_eq!(decision.model, "deepseek-coder-v2:16b");
        assert!(!decision.metadata.contains_key(APPLIED_KEY));
    }

    #[test]
    fn test_forced_model_never_falls_back_upward() {
        let catalog = ModelCatalog::default();
        let decision = quality_decision().with_fallbacks(catalog.fallbacks_for("deepseek-coder-v2:16b"));
        let enforcer = enforcer(ResourceConfig::default());

        let low = enforcer.apply(decision.clone(), &ResourceState::unconstrained().with_ram(4_000));
        assert_eq!(low.model, "llama3.2:3b");
        assert!(low.fallback_models.is_empty());

        let mid = enforcer.apply(decision.clone(), &ResourceState::unconstrained().with_ram(8_000));
        assert_eq!(mid.model, "qwen2.5-coder:7b-instruct-q4_K_M");
        assert_eq!(mid.fallback_models, ["llama3.2:3b"]);

        let relieved = enforcer.apply(low, &ResourceState::unconstrained());
        assert_eq!(relieved.fallback_models, decision.fallback_models);
    }

    #[test]
    fn test_selected_model_is_never_its_own_fallback() {
        let decision = quality_decision().with_fallbacks(vec![
            "deepseek-coder-v2:16b".to_owned(),
            "llama3.2:3b".to_owned(),
        ]);
        let applied = enforcer(ResourceConfig::default()).apply(decision, &ResourceState::unconstrained());
        assert_eq!(applied.fallback_models, ["llama3.2:3b"]);
    }

    #[test]
    fn test_soft_violation_does_not_change_decision() {
        let enforcer = enforcer(ResourceConfig::default());
        let decision = quality_decision();
        let violations = enforcer.validate(&decision, &ResourceState::unconstrained().with_ram(5_000));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].required_ram_mb, 12_000);
        assert_eq!(decision.model, "deepseek-coder-v2:16b");
        assert!(enforcer.validate(&decision, &ResourceState::unconstrained().with_ram(6_000)).is_empty());
    }
}
