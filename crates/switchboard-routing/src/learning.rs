//! Learning collaborators consulted by the adaptive strategies.
//!
//! Both collaborators are optional. Callers bound every call with a timeout and
//! fall back to heuristics when a collaborator fails, is slow or is unsure.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::Result;
use crate::catalog::ModelCatalog;
use crate::ledger::{PerformanceLedger, RecordFilter};
use crate::types::{ComplexityBand, RequestContext};

/// A detected conversation theme.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeSuggestion {
    pub theme: String,
    pub confidence: f64,
    pub suggested_model: Option<String>,
    pub suggested_temperature: Option<f64>,
}

/// Parameters learned from past decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct TunedParameters {
    pub temperature: f64,
    pub max_tokens: u32,
    pub enable_tools: bool,
    pub confidence: f64,
}

#[async_trait]
pub trait ThemeDetector: Send + Sync {
    /// Detects the theme of a request; `None` when nothing stands out.
    ///
    /// # Errors
    /// Returns an error when the detector is unavailable.
    async fn detect(&self, context: &RequestContext, catalog: &ModelCatalog) -> Result<Option<ThemeSuggestion>>;
}

#[async_trait]
pub trait ParameterTuner: Send + Sync {
    /// Suggests sampling parameters for running `model` on this request.
    ///
    /// # Errors
    /// Returns an error when the tuner is unavailable.
    async fn tune(&self, context: &RequestContext, model: &str) -> Result<Option<TunedParameters>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Small,
    Large,
}

struct Theme {
    label: &'static str,
    pattern: Option<Regex>,
    tier: Tier,
    temperature: f64,
}

static THEMES: LazyLock<Vec<Theme>> = LazyLock::new(|| {
    [
        (
            "debugging",
            r"(?i)\b(bugs?|errors?|crash(es|ing)?|exceptions?|stack ?traces?|panics?|broken|segfault)\b",
            Tier::Large,
            0.2,
        ),
        (
            "review",
            r"(?i)\b(review|audit|critique|pull request|code smells?|assess)\b",
            Tier::Large,
            0.3,
        ),
        (
            "creative",
            r"(?i)\b(story|poem|brainstorm|ideas|creative|slogan|names? for)\b",
            Tier::Large,
            0.9,
        ),
        (
            "quick-answer",
            r"(?i)\b(quick(ly)?|short|briefly|tl;?dr|one[- ]liner?|summari[sz]e)\b",
            Tier::Small,
            0.3,
        ),
        (
            "explanation",
            r"(?i)\b(explain|what is|how does|teach|definition|meaning of)\b",
            Tier::Small,
            0.5,
        ),
    ]
    .into_iter()
    .map(|(label, pattern, tier, temperature)| Theme {
        label,
        pattern: Regex::new(pattern).ok(),
        tier,
        temperature,
    })
    .collect()
});

/// Keyword-based theme detection.
///
/// Confidence is `0.4 + 0.2` per distinct keyword hit, so two hits clear the
/// usual 0.7 bar.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordThemeDetector;

impl KeywordThemeDetector {
    fn best_theme(text: &str) -> Option<(&'static Theme, usize)> {
        THEMES
            .iter()
            .filter_map(|theme| {
                let regex = theme.pattern.as_ref()?;
                let mut hits: Vec<String> = regex
                    .find_iter(text)
                    .map(|found| found.as_str().to_lowercase())
                    .collect();
                hits.sort_unstable();
                hits.dedup();
                (!hits.is_empty()).then_some((theme, hits.len()))
            })
            .fold(None, |best: Option<(&Theme, usize)>, candidate| match best {
                Some((_, top)) if top >= candidate.1 => best,
                _ => Some(candidate),
            })
    }
}

#[async_trait]
impl ThemeDetector for KeywordThemeDetector {
    async fn detect(&self, context: &RequestContext, catalog: &ModelCatalog) -> Result<Option<ThemeSuggestion>> {
        Ok(Self::best_theme(&context.text).map(|(theme, hits)| {
            let model = match theme.tier {
                Tier::Small => catalog.smallest(),
                Tier::Large => catalog.largest(),
            };
            ThemeSuggestion {
                theme: theme.label.to_owned(),
                confidence: f64::min(0.2f64.mul_add(hits as f64, 0.4), 1.0),
                suggested_model: Some(model.name.clone()),
                suggested_temperature: Some(theme.temperature),
            }
        }))
    }
}

/// Learns parameters from well-rated past decisions for the same model and band.
pub struct LedgerParameterTuner {
    ledger: Arc<PerformanceLedger>,
    min_quality: f64,
}

impl LedgerParameterTuner {
    /// Rated samples at which confidence reaches one half.
    const HALF_CONFIDENCE_SAMPLES: f64 = 3.0;

    pub fn new(ledger: Arc<PerformanceLedger>) -> Self {
        Self {
            ledger,
            min_quality: 0.7,
        }
    }

    /// Only decisions rated at least `min_quality` are learned from.
    #[must_use]
    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = min_quality;
        self
    }
}

#[async_trait]
impl ParameterTuner for LedgerParameterTuner {
    async fn tune(&self, context: &RequestContext, model: &str) -> Result<Option<TunedParameters>> {
        let band = context.band();
        let records = self
            .ledger
            .rated_records(&RecordFilter::Model(model.to_owned()))
            .await?;
        let good: Vec<_> = records
            .iter()
            .filter(|record| record.band() == band)
            .filter(|record| {
                record
                    .outcome
                    .as_ref()
                    .is_some_and(|outcome| !outcome.error && outcome.quality >= self.min_quality)
            })
            .collect();
        if good.is_empty() {
            return Ok(None);
        }

        let count = good.len() as f64;
        let temperature = good.iter().map(|record| record.temperature).sum::<f64>() / count;
        let max_tokens = good.iter().map(|record| f64::from(record.max_tokens)).sum::<f64>() / count;
        Ok(Some(TunedParameters {
            temperature,
            max_tokens: max_tokens.round() as u32,
            enable_tools: band == ComplexityBand::Complex,
            confidence: count / (count + Self::HALF_CONFIDENCE_SAMPLES),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::RoutingDecision;
    use crate::ledger::Outcome;

    #[tokio::test]
    async fn test_theme_confidence_grows_with_hits() {
        let catalog = ModelCatalog::default();
        let detector = KeywordThemeDetector;

        let weak = match detector.detect(&RequestContext::new("there is a bug"), &catalog).await {
            Ok(Some(suggestion)) => suggestion,
            other => panic!("expected a theme, got {other:?}"),
        };
        assert_eq!(weak.theme, "debugging");
        assert!(weak.confidence < 0.7);

        let strong = match detector
            .detect(&RequestContext::new("the app crashes with an exception and a stack trace"), &catalog)
            .await
        {
            Ok(Some(suggestion)) => suggestion,
            other => panic!("expected a theme, got {other:?}"),
        };
        assert!(strong.confidence > 0.7);
        assert_eq!(strong.suggested_model.as_deref(), Some("deepseek-coder-v2:16b"));
    }

    #[tokio::test]
    async fn test_no_theme() {
        let detector = KeywordThemeDetector;
        let result = detector.detect(&RequestContext::new("good morning"), &ModelCatalog::default()).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_tuner_learns_from_good_outcomes() {
        let ledger = Arc::new(PerformanceLedger::in_memory());
        let mut context = RequestContext::new("q");
        context.complexity = 10;

        for (temperature, quality) in [(0.2, 0.9), (0.4, 0.8), (0.9, 0.1)] {
            let decision = RoutingDecision::new("adaptive", "small", &context).with_sampling(temperature, 1000);
            if let Err(error) = ledger.record_decision(&decision).await {
                panic!("record failed: {error}");
            }
            if let Err(error) = ledger.record_outcome(decision.id, Outcome::new(quality)).await {
                panic!("outcome failed: {error}");
            }
        }

        let tuner = LedgerParameterTuner::new(Arc::clone(&ledger));
        let tuned = match tuner.tune(&context, "small").await {
            Ok(Some(tuned)) => tuned,
            other => panic!("expected parameters, got {other:?}"),
        };
        assert!((tuned.temperature - 0.3).abs() < 1e-9);
        assert_eq!(tuned.max_tokens, 1000);
        assert!((tuned.confidence - 0.4).abs() < 1e-9);

        assert!(matches!(tuner.tune(&context, "other").await, Ok(None)));
    }
}
