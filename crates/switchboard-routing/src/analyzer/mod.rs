//! Request analysis: interaction mode, domain, file type, complexity and confidence.
//!
//! Analysis is deterministic and performs no I/O. Missing signals are reported as
//! `Unset`/`Undetected` values rather than errors.

/// Complexity scoring
pub mod complexity;
/// Keyword tables for mode, domain and file type detection
pub mod patterns;

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ComplexityWeights;
use crate::types::{Domain, FileType, InteractionMode, RequestContext};

pub use complexity::{ComplexityScorer, ComplexitySignals, HeuristicScorer};
use patterns::{
    DOMAIN_PATTERNS, FILE_TYPE_PATTERNS, MODE_PATTERNS, domain_for_file_type, file_type_from_hint,
};

/// Points a path hint adds to the file type and domain it implies.
const HINT_BONUS: usize = 2;
/// Inputs longer than this many characters count as long.
const LONG_INPUT_CHARS: usize = 200;

static POLITENESS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(please|thanks|thank you|help|could you|can you|would you)\b").ok()
});

/// Builds [`RequestContext`] values from raw user text.
pub struct ContextAnalyzer {
    scorer: Box<dyn ComplexityScorer>,
}

impl Default for ContextAnalyzer {
    fn default() -> Self {
        Self::new(ComplexityWeights::default())
    }
}

impl ContextAnalyzer {
    /// Analyzer using the heuristic scorer with `weights`.
    pub fn new(weights: ComplexityWeights) -> Self {
        Self {
            scorer: Box::new(HeuristicScorer::new(weights)),
        }
    }

    /// Replaces the complexity scorer.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Box<dyn ComplexityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Analyzes `text`, optionally using the path of the file it is about.
    pub fn analyze(&self, text: &str, file_hint: Option<&str>) -> RequestContext {
        let hinted_type = file_hint.map_or(FileType::Undetected, file_type_from_hint);
        let type_bonus = (hinted_type != FileType::Undetected).then_some((hinted_type, HINT_BONUS));
        let domain_bonus =
            domain_for_file_type(hinted_type).map(|domain| (domain, HINT_BONUS));

        let mode = MODE_PATTERNS.best(text, None).unwrap_or_default();
        let domain = DOMAIN_PATTERNS
            .best(text, domain_bonus)
            .unwrap_or(Domain::Undetected);
        let file_type = FILE_TYPE_PATTERNS
            .best(text, type_bonus)
            .unwrap_or(FileType::Undetected);
        let complexity = self.scorer.score(text);
        let confidence = detection_confidence(text, mode, file_type);

        debug!(%mode, ?domain, ?file_type, complexity, confidence, "analyzed request");

        let mut context = RequestContext::new(text);
        context.file_hint = file_hint.map(str::to_owned);
        context.mode = mode;
        context.domain = domain;
        context.file_type = file_type;
        context.complexity = complexity;
        context.confidence = confidence;
        context
    }
}

fn detection_confidence(text: &str, mode: InteractionMode, file_type: FileType) -> f64 {
    let mut confidence = 0.0;
    if mode != InteractionMode::Unset {
        confidence += 0.3;
    }
    if file_type != FileType::Undetected {
        confidence += 0.3;
    }
    if text.chars().count() > LONG_INPUT_CHARS {
        confidence += 0.1;
    }
    if text.contains("```") {
        confidence += 0.1;
    }
    if POLITENESS.as_ref().is_some_and(|regex| regex.is_match(text)) {
        confidence += 0.1;
    }
    f64::min(confidence, 1.0)
}
