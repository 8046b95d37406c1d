//! Performance ledger: every routing decision and its later-reported outcome.
//!
//! Decisions are appended when they are made and updated exactly once by id when
//! feedback arrives. Aggregates over strategies and models feed the adaptive
//! strategies; an aggregate with no rated decisions is a neutral, zero-confidence
//! default.

/// Record storage backends
pub mod store;
/// Background write queue
pub mod writer;

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::decision::RoutingDecision;
use crate::types::ComplexityBand;
use crate::{Result, RoutingError};

pub use store::{JsonLedgerStore, LedgerStore, MemoryLedgerStore, RecordFilter};
pub use writer::LedgerWriter;

/// Quality reported when no rated decisions exist.
pub const NEUTRAL_QUALITY: f64 = 0.5;
/// Rated samples at which summary confidence reaches one half.
const CONFIDENCE_HALF_SAMPLES: f64 = 5.0;

/// Explicit user reaction to a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserFeedback {
    Positive,
    Neutral,
    Negative,
}

impl fmt::Display for UserFeedback {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        })
    }
}

impl FromStr for UserFeedback {
    type Err = RoutingError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "positive" | "up" | "good" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" | "down" | "bad" => Ok(Self::Negative),
            other => Err(RoutingError::Other(format!("Unknown feedback: {other}"))),
        }
    }
}

/// Observed result of executing a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Response quality in `0..=1`.
    pub quality: f64,
    pub feedback: Option<UserFeedback>,
    pub latency_ms: u64,
    pub tokens_used: u64,
    pub error: bool,
    pub retries: u32,
}

impl Outcome {
    pub fn new(quality: f64) -> Self {
        Self {
            quality: if quality.is_nan() { 0.0 } else { quality.clamp(0.0, 1.0) },
            feedback: None,
            latency_ms: 0,
            tokens_used: 0,
            error: false,
            retries: 0,
        }
    }

    #[must_use]
    pub fn with_feedback(mut self, feedback: UserFeedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    #[must_use]
    pub fn with_usage(mut self, latency_ms: u64, tokens_used: u64) -> Self {
        self.latency_ms = latency_ms;
        self.tokens_used = tokens_used;
        self
    }

    #[must_use]
    pub fn with_error(mut self, retries: u32) -> Self {
        self.error = true;
        self.retries = retries;
        self
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub decision_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub strategy: String,
    pub model: String,
    pub complexity: u8,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Pending until feedback arrives.
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub outcome_at: Option<DateTime<Utc>>,
}

impl PerformanceRecord {
    /// Pending record for `decision`.
    pub fn from_decision(decision: &RoutingDecision) -> Self {
        Self {
            decision_id: decision.id,
            timestamp: decision.timestamp,
            strategy: decision.strategy.clone(),
            model: decision.model.clone(),
            complexity: decision.complexity,
            temperature: decision.temperature,
            max_tokens: decision.max_tokens,
            outcome: None,
            outcome_at: None,
        }
    }

    pub fn band(&self) -> ComplexityBand {
        ComplexityBand::from_score(self.complexity)
    }

    fn attach_outcome(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
        self.outcome_at = Some(Utc::now());
    }
}

/// Result of reporting an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Recorded,
    /// No decision with that id; nothing changed.
    NotFound,
    /// The decision already has an outcome; nothing changed.
    AlreadyRecorded,
}

/// Aggregate performance of a strategy or model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_decisions: usize,
    pub rated_decisions: usize,
    /// [`NEUTRAL_QUALITY`] when nothing is rated.
    pub average_quality: f64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
    /// Trust in the averages, growing with rated samples; zero when nothing is rated.
    pub confidence: f64,
}

impl PerformanceSummary {
    /// Aggregates `records`; safe for an empty slice.
    pub fn from_records(records: &[PerformanceRecord]) -> Self {
        let rated: Vec<&Outcome> = records
            .iter()
            .filter_map(|record| record.outcome.as_ref())
            .collect();
        if rated.is_empty() {
            return Self {
                total_decisions: records.len(),
                rated_decisions: 0,
                average_quality: NEUTRAL_QUALITY,
                error_rate: 0.0,
                average_latency_ms: 0.0,
                confidence: 0.0,
            };
        }

        let count = rated.len() as f64;
        Self {
            total_decisions: records.len(),
            rated_decisions: rated.len(),
            average_quality: rated.iter().map(|outcome| outcome.quality).sum::<f64>() / count,
            error_rate: rated.iter().filter(|outcome| outcome.error).count() as f64 / count,
            average_latency_ms: rated.iter().map(|outcome| outcome.latency_ms as f64).sum::<f64>()
                / count,
            confidence: count / (count + CONFIDENCE_HALF_SAMPLES),
        }
    }
}

/// Ledger service shared by strategies and the orchestrator.
pub struct PerformanceLedger {
    store: Arc<dyn LedgerStore>,
    writer: Option<LedgerWriter>,
}

impl PerformanceLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store, writer: None }
    }

    /// Ledger over a fresh [`MemoryLedgerStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()))
    }

    /// Routes decision writes through a background [`LedgerWriter`].
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn with_background_writer(mut self, max_retries: u32) -> Self {
        self.writer = Some(LedgerWriter::spawn(Arc::clone(&self.store), max_retries));
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Persists a pending record for `decision`.
    ///
    /// Without a background writer the write is complete when this returns.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written or queued.
    pub async fn record_decision(&self, decision: &RoutingDecision) -> Result<()> {
        let record = PerformanceRecord::from_decision(decision);
        match &self.writer {
            Some(writer) => writer.enqueue(record),
            None => self.store.upsert_decision(record).await,
        }
    }

    /// Attaches an outcome to a recorded decision.
    ///
    /// Unknown ids are reported as [`OutcomeStatus::NotFound`], not as errors.
    ///
    /// # Errors
    /// Returns an error only if storage fails.
    pub async fn record_outcome(&self, decision_id: Uuid, outcome: Outcome) -> Result<OutcomeStatus> {
        if let Some(writer) = &self.writer
            && let Err(error) = writer.flush().await
        {
            warn!(%error, "recording outcome with undelivered decisions");
        }
        let status = self.store.record_outcome(decision_id, outcome).await?;
        match status {
            OutcomeStatus::Recorded => info!(decision = %decision_id, "outcome recorded"),
            OutcomeStatus::NotFound => warn!(decision = %decision_id, "decision not found"),
            OutcomeStatus::AlreadyRecorded => {
                warn!(decision = %decision_id, "outcome already recorded");
            }
        }
        Ok(status)
    }

    /// Waits for queued writes.
    ///
    /// # Errors
    /// Returns an error if queued records could not be delivered.
    pub async fn flush(&self) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }

    /// # Errors
    /// Returns an error if storage cannot be read.
    pub async fn summarize(&self, filter: &RecordFilter) -> Result<PerformanceSummary> {
        let records = self.store.scan(filter).await?;
        Ok(PerformanceSummary::from_records(&records))
    }

    /// # Errors
    /// Returns an error if storage cannot be read.
    pub async fn strategy_performance(&self, strategy: &str) -> Result<PerformanceSummary> {
        self.summarize(&RecordFilter::Strategy(strategy.to_owned())).await
    }

    /// # Errors
    /// Returns an error if storage cannot be read.
    pub async fn model_performance(&self, model: &str) -> Result<PerformanceSummary> {
        self.summarize(&RecordFilter::Model(model.to_owned())).await
    }

    /// Records with an outcome, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage cannot be read.
    pub async fn rated_records(&self, filter: &RecordFilter) -> Result<Vec<PerformanceRecord>> {
        let mut records = self.store.scan(filter).await?;
        records.retain(|record| record.outcome.is_some());
        Ok(records)
    }

    /// Stops the background writer after draining it.
    pub async fn shutdown(self) {
        if let Some(writer) = self.writer {
            writer.shutdown().await;
        }
    }
}
