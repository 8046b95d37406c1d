//! Parallel multi-model voting.
//!
//! Every member runs concurrently under its own timeout and the executor waits
//! for all of them. Failed, late or unparseable members are excluded from the
//! vote. For each verdict the weighted confidence `sum(w * c)` is the category
//! score; the best score wins and ties go to the more cautious verdict. The
//! overall confidence is the winner's score over the total weight of all valid
//! votes. Below the plan's threshold the answer is [`EnsembleAnswer::NoConsensus`].

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use switchboard_core::{ChatMessage, ChatRequest, InferenceBackend};
use tokio::time::timeout;
use tracing::{info, warn};

use super::verdict::{ModelVerdict, VERDICT_INSTRUCTION, Verdict};
use crate::config::EnsembleConfig;
use crate::decision::{EnsemblePlan, VotingStrategy};
use crate::{Result, RoutingError};

/// Final ensemble answer. `NoConsensus` is a sentinel, not a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "answer", content = "verdict", rename_all = "kebab-case")]
pub enum EnsembleAnswer {
    Verdict(Verdict),
    NoConsensus,
}

impl EnsembleAnswer {
    pub fn verdict(self) -> Option<Verdict> {
        match self {
            Self::Verdict(verdict) => Some(verdict),
            Self::NoConsensus => None,
        }
    }
}

impl fmt::Display for EnsembleAnswer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verdict(verdict) => write!(formatter, "{verdict}"),
            Self::NoConsensus => formatter.write_str("no consensus - needs review"),
        }
    }
}

/// One member's call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberResult {
    pub model: String,
    /// Weight used in the vote.
    pub weight: f64,
    pub verdict: Option<ModelVerdict>,
    pub raw_output: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub tokens_used: u64,
}

impl MemberResult {
    pub fn voted(&self) -> bool {
        self.verdict.is_some()
    }
}

/// Aggregate of one verdict category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub verdict: Verdict,
    pub votes: usize,
    pub total_weight: f64,
    /// `sum(weight * confidence)`.
    pub score: f64,
}

impl CategoryScore {
    /// Weighted average confidence of the category's votes.
    pub fn average_confidence(&self) -> f64 {
        if self.total_weight > 0.0 {
            self.score / self.total_weight
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub answer: EnsembleAnswer,
    /// Highest-scoring verdict, even when it missed the threshold.
    pub nominal: Verdict,
    pub confidence: f64,
    pub threshold: f64,
    pub voting: VotingStrategy,
    pub scores: Vec<CategoryScore>,
    pub members: Vec<MemberResult>,
}

impl EnsembleResult {
    pub fn has_consensus(&self) -> bool {
        matches!(self.answer, EnsembleAnswer::Verdict(_))
    }

    /// Human-readable summary of the vote.
    pub fn summary(&self) -> String {
        let votes: Vec<String> = self
            .members
            .iter()
            .map(|member| match (&member.verdict, &member.error) {
                (Some(verdict), _) => format!(
                    "{}: {} ({:.2}, w={:.2})",
                    member.model, verdict.verdict, verdict.confidence, member.weight
                ),
                (None, Some(error)) => format!("{}: failed ({error})", member.model),
                (None, None) => format!("{}: no vote", member.model),
            })
            .collect();
        format!(
            "{} (confidence {:.2}, threshold {:.2})\n{}",
            self.answer,
            self.confidence,
            self.threshold,
            votes.join("\n")
        )
    }
}

/// Category scores for `(weight, verdict)` votes, in [`Verdict::ALL`] order.
pub fn tally<'a>(votes: impl IntoIterator<Item = (f64, &'a ModelVerdict)>) -> Vec<CategoryScore> {
    let mut scores: Vec<CategoryScore> = Verdict::ALL
        .into_iter()
        .map(|verdict| CategoryScore {
            verdict,
            votes: 0,
            total_weight: 0.0,
            score: 0.0,
        })
        .collect();
    for (weight, vote) in votes {
        if let Some(category) = scores.iter_mut().find(|category| category.verdict == vote.verdict) {
            category.votes += 1;
            category.total_weight += weight;
            category.score = weight.mul_add(vote.confidence, category.score);
        }
    }
    scores
}

/// Winner and normalized confidence of a tally; `None` when nothing was cast.
pub fn decide(scores: &[CategoryScore]) -> Option<(Verdict, f64)> {
    let total_weight: f64 = scores.iter().map(|category| category.total_weight).sum();
    if total_weight <= 0.0 {
        return None;
    }
    let winner = scores.iter().filter(|category| category.votes > 0).max_by(|left, right| {
        left.score
            .total_cmp(&right.score)
            .then(left.verdict.caution().cmp(&right.verdict.caution()))
    })?;
    Some((winner.verdict, (winner.score / total_weight).clamp(0.0, 1.0)))
}

pub struct EnsembleExecutor {
    backend: Arc<dyn InferenceBackend>,
    config: EnsembleConfig,
}

impl EnsembleExecutor {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: EnsembleConfig) -> Self {
        Self { backend, config }
    }

    /// Overrides the per-member time budget.
    #[must_use]
    pub fn with_member_timeout(mut self, member_timeout: Duration) -> Self {
        self.config.member_timeout_ms = member_timeout.as_millis() as u64;
        self
    }

    /// Runs every plan member concurrently and votes.
    ///
    /// # Errors
    /// Returns [`RoutingError::Config`] for a plan that cannot vote, and
    /// [`RoutingError::AllModelsFailed`] when no member produced a usable verdict.
    pub async fn execute(&self, plan: &EnsemblePlan, request: &str) -> Result<EnsembleResult> {
        plan.validate()?;
        let messages = vec![
            ChatMessage::system(VERDICT_INSTRUCTION),
            ChatMessage::user(request),
        ];
        let calls = plan.models.iter().map(|model| {
            let weight = match plan.voting {
                VotingStrategy::Weighted => plan.weight_for(model),
                VotingStrategy::Consensus => 1.0,
            };
            self.run_member(model, weight, messages.clone())
        });
        let members = join_all(calls).await;

        let scores = tally(
            members
                .iter()
                .filter_map(|member| member.verdict.as_ref().map(|verdict| (member.weight, verdict))),
        );
        let Some((nominal, confidence)) = decide(&scores) else {
            let failures = members
                .iter()
                .map(|member| {
                    format!(
                        "{}: {}",
                        member.model,
                        member.error.as_deref().unwrap_or("no usable verdict")
                    )
                })
                .collect();
            return Err(RoutingError::AllModelsFailed { failures });
        };

        let answer = if confidence >= plan.consensus_threshold {
            EnsembleAnswer::Verdict(nominal)
        } else {
            EnsembleAnswer::NoConsensus
        };
        info!(
            %answer,
            %nominal,
            confidence,
            threshold = plan.consensus_threshold,
            voted = members.iter().filter(|member| member.voted()).count(),
            members = members.len(),
            "ensemble finished"
        );
        Ok(EnsembleResult {
            answer,
            nominal,
            confidence,
            threshold: plan.consensus_threshold,
            voting: plan.voting,
            scores,
            members,
        })
    }

    async fn run_member(&self, model: &str, weight: f64, messages: Vec<ChatMessage>) -> MemberResult {
        let request = ChatRequest::new(model, messages)
            .with_temperature(0.2)
            .with_max_tokens(self.config.member_max_tokens);
        let budget = Duration::from_millis(self.config.member_timeout_ms);
        let started = Instant::now();

        let mut member = MemberResult {
            model: model.to_owned(),
            weight,
            verdict: None,
            raw_output: None,
            error: None,
            latency_ms: 0,
            tokens_used: 0,
        };
        match timeout(budget, self.backend.chat(&request)).await {
            Ok(Ok(completion)) => {
                member.verdict = ModelVerdict::parse(&completion.text);
                if member.verdict.is_none() {
                    member.error = Some("unparseable verdict".to_owned());
                }
                member.latency_ms = completion.latency_ms;
                member.tokens_used = completion.tokens.total();
                member.raw_output = Some(completion.text);
            }
            Ok(Err(error)) => member.error = Some(error.to_string()),
            Err(_) => member.error = Some(format!("timed out after {}ms", budget.as_millis())),
        }
        if member.latency_ms == 0 {
            member.latency_ms = started.elapsed().as_millis() as u64;
        }
        if let Some(error) = &member.error {
            warn!(model, %error, "ensemble member excluded from vote");
        }
        member
    }
}
