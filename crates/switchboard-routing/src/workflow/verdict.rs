use core::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::parse_confidence;

/// Confidence assumed for a keyword verdict without a confidence marker.
const KEYWORD_CONFIDENCE: f64 = 0.5;

/// Instruction sent to every ensemble member.
pub const VERDICT_INSTRUCTION: &str = "Answer with a single JSON object and nothing else: \
{\"verdict\": \"YES\" | \"NO\" | \"MAYBE\", \"confidence\": <number between 0 and 1>, \
\"reasoning\": \"<one or two sentences>\", \"risk\": \"low\" | \"medium\" | \"high\"}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Yes,
    No,
    Maybe,
}

impl Verdict {
    pub const ALL: [Self; 3] = [Self::Yes, Self::No, Self::Maybe];

    /// Tie-break rank; on equal scores the more cautious verdict wins.
    pub(crate) fn caution(self) -> u8 {
        match self {
            Self::Yes => 0,
            Self::No => 1,
            Self::Maybe => 2,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "YES" => Some(Self::Yes),
            "NO" => Some(Self::No),
            "MAYBE" => Some(Self::Maybe),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Maybe => "MAYBE",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// One member's structured answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub verdict: Verdict,
    /// In `0..=1`.
    pub confidence: f64,
    pub reasoning: String,
    pub risk: Option<RiskLevel>,
}

#[derive(Deserialize)]
struct RawVerdict {
    verdict: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "risk_level", alias = "riskLevel")]
    risk: Option<String>,
}

static KEYWORD_VERDICT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i:\bverdict\s*[:=]?\s*\**\s*(yes|no|maybe)\b)|\b(YES|NO|MAYBE)\b").ok()
});

impl ModelVerdict {
    /// Parses a member reply: a JSON object first, then `verdict: X` or a bare
    /// upper-case `YES`/`NO`/`MAYBE`.
    pub fn parse(text: &str) -> Option<Self> {
        Self::from_json(text).or_else(|| Self::from_keywords(text))
    }

    fn from_json(text: &str) -> Option<Self> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        let raw: RawVerdict = serde_json::from_str(text.get(start..=end)?).ok()?;
        let confidence = raw.confidence.unwrap_or(KEYWORD_CONFIDENCE);
        Some(Self {
            verdict: Verdict::parse(&raw.verdict)?,
            confidence: if confidence > 1.0 { confidence / 100.0 } else { confidence }.clamp(0.0, 1.0),
            reasoning: raw.reasoning,
            risk: raw.risk.as_deref().and_then(RiskLevel::parse),
        })
    }

    fn from_keywords(text: &str) -> Option<Self> {
        let captures = KEYWORD_VERDICT.as_ref()?.captures(text)?;
        let word = captures.get(1).or_else(|| captures.get(2))?;
        Some(Self {
            verdict: Verdict::parse(word.as_str())?,
            confidence: parse_confidence(text).unwrap_or(KEYWORD_CONFIDENCE),
            reasoning: text.trim().to_owned(),
            risk: None,
        })
    }
}
