//! Sequential refinement: each step sees the request and the previous step's answer.
//!
//! A failed step never aborts the chain. Its output becomes a diagnostic, it
//! reports zero confidence, and the next step refines the last good answer.
//! The chain stops early once cumulative tokens pass the ceiling, failed steps
//! included, or a successful step reports confidence below the minimum.

use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use switchboard_core::{ChatMessage, ChatRequest, InferenceBackend};
use tokio::time::timeout;
use tracing::{info, warn};

use super::{excerpt, parse_confidence};
use crate::config::ChainConfig;
use crate::decision::{ChainPlan, ChainStep, MergeStrategy, StepRole};

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub role: StepRole,
    pub model: String,
    /// Raw model output, or a diagnostic when the step failed.
    pub output: String,
    pub tokens_used: u64,
    pub confidence: f64,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Why a chain stopped before its last step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum EarlyExit {
    TokenCeiling { used: u64, ceiling: u64 },
    LowConfidence { step: usize, confidence: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResult {
    /// Executed steps in order; steps after an early exit are absent.
    pub steps: Vec<StepResult>,
    pub merge: MergeStrategy,
    /// Merged answer.
    pub output: String,
    pub total_tokens: u64,
    pub early_exit: Option<EarlyExit>,
}

impl ChainResult {
    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|step| !step.succeeded()).count()
    }
}

pub struct ChainExecutor {
    backend: Arc<dyn InferenceBackend>,
    config: ChainConfig,
}

impl ChainExecutor {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: ChainConfig) -> Self {
        Self { backend, config }
    }

    /// Overrides the per-step time budget.
    #[must_use]
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.config.step_timeout_ms = step_timeout.as_millis() as u64;
        self
    }

    /// Runs `plan` against `request` to completion or early exit.
    pub async fn execute(&self, plan: &ChainPlan, request: &str) -> ChainResult {
        let mut steps = Vec::with_capacity(plan.steps.len());
        let mut previous: Option<String> = None;
        let mut total_tokens = 0;
        let mut early_exit = None;

        for (index, step) in plan.steps.iter().enumerate() {
            let result = self.run_step(index, plan.steps.len(), step, request, previous.as_deref()).await;
            total_tokens += result.tokens_used;

            if total_tokens > self.config.token_ceiling {
                early_exit = Some(EarlyExit::TokenCeiling {
                    used: total_tokens,
                    ceiling: self.config.token_ceiling,
                });
            }
            if result.succeeded() {
                previous = Some(result.output.clone());
                if early_exit.is_none() && result.confidence < self.config.min_step_confidence {
                    early_exit = Some(EarlyExit::LowConfidence {
                        step: index,
                        confidence: result.confidence,
                    });
                }
            }
            steps.push(result);
            if early_exit.is_some() {
                break;
            }
        }

        let output = self.merge(plan.merge, &steps);
        let result = ChainResult {
            steps,
            merge: plan.merge,
            output,
            total_tokens,
            early_exit,
        };
        info!(
            steps = result.steps.len(),
            planned = plan.steps.len(),
            failed = result.failed_steps(),
            tokens = result.total_tokens,
            early_exit = ?result.early_exit,
            "chain finished"
        );
        result
    }

    fn prompt(index: usize, count: usize, step: &ChainStep, request: &str, previous: Option<&str>) -> Vec<ChatMessage> {
        let system = format!(
            "You are step {} of {count} ({}) in a refinement pipeline. \
             Finish with a final line `confidence: <number between 0 and 1>` rating your answer.",
            index + 1,
            step.role
        );
        let mut user = format!("Request:\n{request}");
        if let Some(previous) = previous {
            user.push_str("\n\nPrevious answer:\n");
            user.push_str(previous);
        }
        user.push_str("\n\n");
        user.push_str(&step.instruction);
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }

    async fn run_step(
        &self,
        index: usize,
        count: usize,
        step: &ChainStep,
        request: &str,
        previous: Option<&str>,
    ) -> StepResult {
        let chat = ChatRequest::new(step.model.clone(), Self::prompt(index, count, step, request, previous))
            .with_temperature(step.temperature)
            .with_max_tokens(step.max_tokens);
        let started = Instant::now();
        let budget = Duration::from_millis(self.config.step_timeout_ms);

        let failure = match timeout(budget, self.backend.chat(&chat)).await {
            Ok(Ok(completion)) => {
                return StepResult {
                    index,
                    role: step.role,
                    model: step.model.clone(),
                    confidence: parse_confidence(&completion.text).unwrap_or(self.config.default_confidence),
                    tokens_used: completion.tokens.total(),
                    latency_ms: completion.latency_ms,
                    output: completion.text,
                    error: None,
                };
            }
            Ok(Err(error)) => error.to_string(),
            Err(_) => format!("timed out after {}ms", budget.as_millis()),
        };

        warn!(step = index, role = %step.role, model = %step.model, error = %failure, "chain step failed");
        StepResult {
            index,
            role: step.role,
            model: step.model.clone(),
            output: format!(
                "[{} step failed on {}: {failure}. Check that the model is installed and the backend is \
                 reachable, or replace this step's model.]",
                step.role, step.model
            ),
            tokens_used: self.config.failed_step_tokens,
            confidence: 0.0,
            latency_ms: started.elapsed().as_millis() as u64,
            error: Some(failure),
        }
    }

    fn merge(&self, merge: MergeStrategy, steps: &[StepResult]) -> String {
        let Some((last, earlier)) = steps.split_last() else {
            return String::new();
        };
        match merge {
            MergeStrategy::Last => last.output.clone(),
            MergeStrategy::Concat => steps
                .iter()
                .map(|step| format!("## {} ({})\n{}", step.role, step.model, step.output.trim()))
                .collect::<Vec<_>>()
                .join("\n\n"),
            MergeStrategy::Vote => {
                let mut sections: Vec<String> = earlier
                    .iter()
                    .filter(|step| step.succeeded() && step.confidence > self.config.vote_confidence)
                    .map(|step| {
                        format!(
                            "> {} ({:.2}): {}",
                            step.role,
                            step.confidence,
                            excerpt(&step.output, self.config.vote_excerpt_chars)
                        )
                    })
                    .collect();
                sections.push(last.output.clone());
                sections.join("\n\n")
            }
        }
    }
}
