//! Multi-model execution: sequential refinement chains and parallel voting ensembles.

/// Sequential chain executor
pub mod chain;
/// Parallel ensemble executor
pub mod ensemble;
/// Structured verdict parsing
pub mod verdict;

use std::sync::LazyLock;

use regex::Regex;

pub use chain::{ChainExecutor, ChainResult, EarlyExit, StepResult};
pub use ensemble::{CategoryScore, EnsembleAnswer, EnsembleExecutor, EnsembleResult, MemberResult};
pub use verdict::{ModelVerdict, RiskLevel, Verdict};

static CONFIDENCE_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)confidence\s*[:=]\s*([0-9]*\.?[0-9]+)\s*(%)?").ok());

/// Last `confidence: <x>` marker in `text`, clamped into `0..=1`.
///
/// Percentages (`confidence: 85%`) and bare values above 1 are read as percent.
pub fn parse_confidence(text: &str) -> Option<f64> {
    let regex = CONFIDENCE_MARKER.as_ref()?;
    let captures = regex.captures_iter(text).last()?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    let value = if captures.get(2).is_some() || value > 1.0 {
        value / 100.0
    } else {
        value
    };
    Some(value.clamp(0.0, 1.0))
}

/// First `limit` characters of `text`, marked when cut.
pub(crate) fn excerpt(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_owned();
    }
    let mut cut: String = trimmed.chars().take(limit).collect();
    cut.push_str("...");
    cut
}
