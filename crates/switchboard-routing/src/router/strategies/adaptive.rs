//! Single-model routing that blends ledger history, complexity, resources and
//! the optional learning collaborators.
//!
//! Each model's score starts at its ledger average quality (neutral without
//! history). Above the complexity pivot the small model loses score and the
//! large model gains it; below the pivot the reverse holds. A confident theme
//! suggestion boosts its model. Resource pressure overrides the scores.

use core::future::Future;
use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::timeout;
use tracing::debug;

use super::super::{RoutingStrategy, StrategyInputs, StrategyKind};
use crate::config::AdaptiveConfig;
use crate::decision::RoutingDecision;
use crate::ledger::{NEUTRAL_QUALITY, PerformanceLedger};
use crate::learning::{ParameterTuner, ThemeDetector, ThemeSuggestion, TunedParameters};
use crate::types::ComplexityBand;

/// Runs `future` within `budget`, flattening timeouts and errors into a message.
pub(crate) async fn bounded<T>(
    budget: Duration,
    what: &str,
    future: impl Future<Output = crate::Result<T>>,
) -> Result<T, String> {
    match timeout(budget, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(format!("{what} failed: {error}")),
        Err(_) => Err(format!("{what} timed out after {}ms", budget.as_millis())),
    }
}

/// Sampling parameters by complexity band when nothing better is known.
fn band_parameters(band: ComplexityBand) -> TunedParameters {
    match band {
        ComplexityBand::Simple => TunedParameters {
            temperature: 0.5,
            max_tokens: 1_024,
            enable_tools: false,
            confidence: 0.0,
        },
        ComplexityBand::Moderate => TunedParameters {
            temperature: 0.7,
            max_tokens: 2_048,
            enable_tools: false,
            confidence: 0.0,
        },
        ComplexityBand::Complex => TunedParameters {
            temperature: 0.7,
            max_tokens: 4_096,
            enable_tools: true,
            confidence: 0.0,
        },
    }
}

pub struct AdaptiveStrategy {
    config: AdaptiveConfig,
    ledger: Option<Arc<PerformanceLedger>>,
    theme_detector: Option<Arc<dyn ThemeDetector>>,
    tuner: Option<Arc<dyn ParameterTuner>>,
    collaborator_timeout: Duration,
}

impl AdaptiveStrategy {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            config,
            ledger: None,
            theme_detector: None,
            tuner: None,
            collaborator_timeout: Duration::from_millis(250),
        }
    }

    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<PerformanceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[must_use]
    pub fn with_theme_detector(mut self, detector: Arc<dyn ThemeDetector>) -> Self {
        self.theme_detector = Some(detector);
        self
    }

    #[must_use]
    pub fn with_tuner(mut self, tuner: Arc<dyn ParameterTuner>) -> Self {
        self.tuner = Some(tuner);
        self
    }

    /// Time budget for each ledger, detector or tuner call.
    #[must_use]
    pub fn with_collaborator_timeout(mut self, collaborator_timeout: Duration) -> Self {
        self.collaborator_timeout = collaborator_timeout;
        self
    }

    async fn ledger_quality(&self, model: &str, notes: &mut Vec<String>) -> f64 {
        let Some(ledger) = &self.ledger else {
            return NEUTRAL_QUALITY;
        };
        match bounded(self.collaborator_timeout, "ledger", ledger.model_performance(model)).await {
            Ok(summary) => summary.average_quality,
            Err(message) => {
                notes.push(message);
                NEUTRAL_QUALITY
            }
        }
    }

    async fn theme(&self, inputs: &StrategyInputs<'_>, notes: &mut Vec<String>) -> Option<ThemeSuggestion> {
        let detector = self.theme_detector.as_ref()?;
        match bounded(
            self.collaborator_timeout,
            "theme detector",
            detector.detect(inputs.context, inputs.catalog),
        )
        .await
        {
            Ok(suggestion) => {
                suggestion.filter(|theme| theme.confidence > self.config.theme_confidence_threshold)
            }
            Err(message) => {
                notes.push(message);
                None
            }
        }
    }

    async fn tuned(
        &self,
        inputs: &StrategyInputs<'_>,
        model: &str,
        notes: &mut Vec<String>,
    ) -> Option<TunedParameters> {
        let tuner = self.tuner.as_ref()?;
        match bounded(self.collaborator_timeout, "parameter tuner", tuner.tune(inputs.context, model)).await {
            Ok(tuned) => tuned.filter(|params| params.confidence > self.config.tuner_confidence_threshold),
            Err(message) => {
                notes.push(message);
                None
            }
        }
    }

    fn resource_pressure(&self, inputs: &StrategyInputs<'_>) -> Option<String> {
        let resources = inputs.resources;
        if resources.available_ram_mb < self.config.ram_floor_mb {
            return Some(format!(
                "only {}MB RAM free (floor {}MB)",
                resources.available_ram_mb, self.config.ram_floor_mb
            ));
        }
        if resources.cpu_usage_percent > self.config.cpu_ceiling_percent {
            return Some(format!(
                "CPU at {:.0}% (ceiling {:.0}%)",
                resources.cpu_usage_percent, self.config.cpu_ceiling_percent
            ));
        }
        None
    }
}

#[async_trait]
impl RoutingStrategy for AdaptiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Adaptive
    }

    async fn decide(&self, inputs: &StrategyInputs<'_>) -> RoutingDecision {
        let small = inputs.catalog.smallest();
        let large = inputs.catalog.largest();
        let mut notes = Vec::new();

        let complexity = f64::from(inputs.context.complexity.min(100)) / 100.0;
        let shift = complexity - self.config.complexity_pivot;
        let mut small_score = self
            .config
            .small_model_penalty
            .mul_add(-shift, self.ledger_quality(&small.name, &mut notes).await);
        let mut large_score = self
            .config
            .large_model_bonus
            .mul_add(shift, self.ledger_quality(&large.name, &mut notes).await);

        let theme = self.theme(inputs, &mut notes).await;
        if let Some(suggestion) = &theme {
            match suggestion.suggested_model.as_deref() {
                Some(name) if name == small.name => small_score += self.config.theme_boost,
                Some(name) if name == large.name => large_score += self.config.theme_boost,
                _ => {}
            }
        }

        let pressure = self.resource_pressure(inputs);
        let chosen = if pressure.is_some() || small_score >= large_score {
            small
        } else {
            large
        };

        let parameters = match self.tuned(inputs, &chosen.name, &mut notes).await {
            Some(tuned) => {
                notes.push(format!("tuned parameters (confidence {:.2})", tuned.confidence));
                tuned
            }
            None => {
                let mut fallback = band_parameters(inputs.context.band());
                if let Some(temperature) = theme.as_ref().and_then(|suggestion| suggestion.suggested_temperature) {
                    fallback.temperature = temperature;
                }
                fallback
            }
        };

        let mut confidence = match &pressure {
            Some(_) => 0.9,
            None => f64::min(0.5 + (large_score - small_score).abs(), 0.95),
        };
        if notes.iter().any(|note| note.contains("failed") || note.contains("timed out")) {
            confidence *= 0.8;
        }

        let reasoning = format!(
            "adaptive: {} (small {small_score:.2} vs large {large_score:.2} at complexity {})",
            chosen.name, inputs.context.complexity
        );
        debug!(small_score, large_score, model = %chosen.name, "adaptive scores");
        let mut decision = RoutingDecision::new(self.name(), chosen.name.clone(), inputs.context)
            .with_sampling(parameters.temperature, parameters.max_tokens)
            .with_tools(parameters.enable_tools, 5)
            .with_confidence(confidence)
            .with_reasoning(reasoning);
        if let Some(cause) = &pressure {
            decision.append_reasoning(&format!("resource floor forced the small model: {cause}"));
        }
        if let Some(suggestion) = &theme {
            decision.append_reasoning(&format!("theme {} ({:.2})", suggestion.theme, suggestion.confidence));
        }
        for note in &notes {
            decision.append_reasoning(note);
        }
        decision
            .metadata
            .insert("scores".to_owned(), json!({ "small": small_score, "large": large_score }));
        if let Some(suggestion) = theme {
            decision.metadata.insert("theme".to_owned(), json!(suggestion.theme));
        }
        decision
    }
}
