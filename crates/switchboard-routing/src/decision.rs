//! The routing decision and its optional multi-step or multi-model plan.

use core::fmt;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{RecentDecision, RequestContext};
use crate::{Result, RoutingError};

/// Role a chain step plays in the refinement pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepRole {
    Draft,
    Refine,
    Review,
    Validate,
    Critique,
}

impl StepRole {
    /// Instruction appended to the step prompt.
    pub fn default_instruction(self) -> &'static str {
        match self {
            Self::Draft => "Write a first complete answer.",
            Self::Refine => {
                "Improve the previous answer: fix mistakes, fill gaps and tighten the wording."
            }
            Self::Review => "Review the previous answer for correctness and return a corrected final version.",
            Self::Validate => "Check the previous answer against the request and list any remaining problems.",
            Self::Critique => "Critique the previous answer and point out its weakest parts.",
        }
    }
}

impl fmt::Display for StepRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Draft => "draft",
            Self::Refine => "refine",
            Self::Review => "review",
            Self::Validate => "validate",
            Self::Critique => "critique",
        })
    }
}

/// One step of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub model: String,
    pub role: StepRole,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Role-specific suffix appended to the step prompt.
    pub instruction: String,
}

impl ChainStep {
    /// Step with the role's default instruction.
    pub fn new(model: impl Into<String>, role: StepRole, max_tokens: u32, temperature: f64) -> Self {
        Self {
            model: model.into(),
            role,
            max_tokens,
            temperature,
            instruction: role.default_instruction().to_owned(),
        }
    }
}

/// How chain step outputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Final step output only.
    Last,
    /// Every step, labeled by role.
    Concat,
    /// Final output prefixed by confident earlier steps.
    #[default]
    Vote,
}

/// Ordered sequential plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPlan {
    pub steps: Vec<ChainStep>,
    #[serde(default)]
    pub merge: MergeStrategy,
}

/// How ensemble verdicts are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotingStrategy {
    /// Configured per-model weights.
    #[default]
    Weighted,
    /// Every model counts equally.
    Consensus,
}

/// Parallel multi-model plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePlan {
    pub models: Vec<String>,
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub voting: VotingStrategy,
    /// Minimum normalized confidence for the winning verdict, in `0..=1`.
    pub consensus_threshold: f64,
}

impl EnsemblePlan {
    /// Configured weight of `model`; unlisted models weigh 1.
    pub fn weight_for(&self, model: &str) -> f64 {
        self.weights.get(model).copied().unwrap_or(1.0)
    }

    /// Checks that the plan can produce a vote at all.
    ///
    /// # Errors
    /// Returns [`RoutingError::Config`] when the plan has no models or, under
    /// weighted voting, a member weight that is not a positive finite number.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(RoutingError::Config("ensemble plan has no models".to_owned()));
        }
        if self.voting == VotingStrategy::Weighted
            && let Some(model) = self.models.iter().find(|model| {
                let weight = self.weight_for(model);
                !weight.is_finite() || weight <= 0.0
            })
        {
            return Err(RoutingError::Config(format!(
                "ensemble weight for {model} must be positive, got {}",
                self.weight_for(model)
            )));
        }
        Ok(())
    }
}

/// Execution shape of a decision. A decision carries at most one plan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutionPlan {
    #[default]
    Single,
    Chain(ChainPlan),
    Ensemble(EnsemblePlan),
}

/// The engine's routing output for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub id: Uuid,
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    /// Tried in order when a single call to `model` fails with a retryable error.
    #[serde(default)]
    pub fallback_models: Vec<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
    pub enable_tools: bool,
    pub max_tool_iterations: u32,
    pub reasoning: String,
    /// In `0..=1`.
    pub confidence: f64,
    pub complexity: u8,
    #[serde(default)]
    pub plan: ExecutionPlan,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl RoutingDecision {
    /// Single-call decision with neutral sampling defaults.
    pub fn new(strategy: impl Into<String>, model: impl Into<String>, context: &RequestContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy: strategy.into(),
            timestamp: Utc::now(),
            model: model.into(),
            fallback_models: Vec::new(),
            temperature: 0.7,
            max_tokens: 2048,
            stream: false,
            enable_tools: false,
            max_tool_iterations: 0,
            reasoning: String::new(),
            confidence: 0.5,
            complexity: context.complexity,
            plan: ExecutionPlan::Single,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_tools(mut self, enable_tools: bool, max_tool_iterations: u32) -> Self {
        self.enable_tools = enable_tools;
        self.max_tool_iterations = if enable_tools { max_tool_iterations } else { 0 };
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.set_confidence(confidence);
        self
    }

    #[must_use]
    pub fn with_fallbacks(mut self, fallback_models: Vec<String>) -> Self {
        self.fallback_models = fallback_models;
        self
    }

    #[must_use]
    pub fn with_plan(mut self, plan: ExecutionPlan) -> Self {
        self.plan = plan;
        self
    }

    /// Sets confidence, clamped into `0..=1`.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
    }

    /// Appends a clause to the reasoning without dropping existing content.
    pub fn append_reasoning(&mut self, clause: &str) {
        if self.reasoning.is_empty() {
            clause.clone_into(&mut self.reasoning);
        } else {
            self.reasoning.push_str("; ");
            self.reasoning.push_str(clause);
        }
    }

    pub fn chain_plan(&self) -> Option<&ChainPlan> {
        match &self.plan {
            ExecutionPlan::Chain(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn ensemble_plan(&self) -> Option<&EnsemblePlan> {
        match &self.plan {
            ExecutionPlan::Ensemble(plan) => Some(plan),
            _ => None,
        }
    }

    /// Summary carried into later contexts of the same conversation.
    pub fn to_recent(&self) -> RecentDecision {
        RecentDecision {
            decision_id: self.id,
            strategy: self.strategy.clone(),
            model: self.model.clone(),
        }
    }
}
