//! Request and resource snapshots shared across the routing pipeline.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use switchboard_core::Role;
use uuid::Uuid;

use crate::RoutingError;

/// Maximum number of recent decisions carried in a context.
pub const MAX_RECENT_DECISIONS: usize = 10;

/// How the user wants to interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionMode {
    /// Step-by-step explanations.
    Learning,
    /// Reviewing existing code.
    CodeReview,
    /// Terse, expert-level answers.
    Expert,
    /// No mode detected.
    #[default]
    Unset,
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Learning => "learning",
            Self::CodeReview => "code-review",
            Self::Expert => "expert",
            Self::Unset => "unset",
        })
    }
}

impl FromStr for InteractionMode {
    type Err = RoutingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "learning" => Ok(Self::Learning),
            "code-review" | "review" => Ok(Self::CodeReview),
            "expert" => Ok(Self::Expert),
            "unset" => Ok(Self::Unset),
            other => Err(RoutingError::Other(format!("Unknown interaction mode: {other}"))),
        }
    }
}

/// Technical domain of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    NextJs,
    Frontend,
    Backend,
    DataScience,
    DevOps,
    Script,
    #[default]
    Undetected,
}

/// File type a request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    NextJsPage,
    ReactComponent,
    TypeScript,
    JavaScript,
    Python,
    Rust,
    Shell,
    #[default]
    Undetected,
}

/// Coarse complexity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityBand {
    /// Score below 30.
    Simple,
    /// Score in `[30, 70)`.
    Moderate,
    /// Score of 70 or more.
    Complex,
}

impl ComplexityBand {
    /// Band for a 0-100 score.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..30 => Self::Simple,
            30..70 => Self::Moderate,
            _ => Self::Complex,
        }
    }
}

/// One message of the running conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub tokens: u64,
    /// Latency of the call that produced this message, for assistant entries.
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

impl HistoryEntry {
    /// Creates an entry with an estimated token count.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role,
            tokens: (content.len() / 4) as u64,
            content,
            latency_ms: None,
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Aggregates over the conversation history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub message_count: usize,
    pub total_tokens: u64,
    /// Average over entries that report a latency; zero when none do.
    pub average_latency_ms: f64,
}

impl ConversationMetadata {
    /// Computes aggregates from history.
    pub fn from_history(history: &[HistoryEntry]) -> Self {
        let latencies: Vec<u64> = history.iter().filter_map(|entry| entry.latency_ms).collect();
        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        Self {
            message_count: history.len(),
            total_tokens: history.iter().map(|entry| entry.tokens).sum(),
            average_latency_ms,
        }
    }
}

/// Caller-supplied overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualOverrides {
    pub mode: Option<InteractionMode>,
    pub model: Option<String>,
}

/// Short summary of an earlier decision in the same conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentDecision {
    pub decision_id: Uuid,
    pub strategy: String,
    pub model: String,
}

/// Immutable snapshot of one request, built by the context analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub text: String,
    pub file_hint: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub mode: InteractionMode,
    pub domain: Domain,
    pub file_type: FileType,
    /// Complexity score in `0..=100`.
    pub complexity: u8,
    /// Detection confidence in `0..=1`.
    pub confidence: f64,
    pub overrides: ManualOverrides,
    pub metadata: ConversationMetadata,
    /// Most recent last, at most [`MAX_RECENT_DECISIONS`].
    pub recent_decisions: Vec<RecentDecision>,
}

impl RequestContext {
    /// Context with no detected signals.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file_hint: None,
            history: Vec::new(),
            mode: InteractionMode::Unset,
            domain: Domain::Undetected,
            file_type: FileType::Undetected,
            complexity: 0,
            confidence: 0.0,
            overrides: ManualOverrides::default(),
            metadata: ConversationMetadata::default(),
            recent_decisions: Vec::new(),
        }
    }

    pub fn band(&self) -> ComplexityBand {
        ComplexityBand::from_score(self.complexity)
    }

    /// Attaches conversation history and recomputes its metadata.
    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.metadata = ConversationMetadata::from_history(&history);
        self.history = history;
        self
    }

    /// Applies caller overrides; a mode override replaces the detected mode.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ManualOverrides) -> Self {
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        self.overrides = overrides;
        self
    }

    /// Attaches recent decisions, keeping only the newest [`MAX_RECENT_DECISIONS`].
    #[must_use]
    pub fn with_recent_decisions(mut self, mut decisions: Vec<RecentDecision>) -> Self {
        let excess = decisions.len().saturating_sub(MAX_RECENT_DECISIONS);
        decisions.drain(..excess);
        self.recent_decisions = decisions;
        self
    }
}

/// Battery reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub level_percent: f64,
    pub on_battery: bool,
}

/// Point-in-time host resource reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub available_ram_mb: u64,
    pub gpu_available: bool,
    /// Estimated number of layers that can be offloaded to the GPU.
    pub gpu_layers: u32,
    pub cpu_threads: usize,
    pub cpu_usage_percent: f64,
    pub temperature_celsius: Option<f64>,
    pub battery: Option<BatteryState>,
}

impl ResourceState {
    /// A comfortable machine: plenty of RAM, idle CPU, mains power.
    pub fn unconstrained() -> Self {
        Self {
            available_ram_mb: 32_000,
            gpu_available: true,
            gpu_layers: 48,
            cpu_threads: 8,
            cpu_usage_percent: 10.0,
            temperature_celsius: None,
            battery: None,
        }
    }

    #[must_use]
    pub fn with_ram(mut self, available_ram_mb: u64) -> Self {
        self.available_ram_mb = available_ram_mb;
        self
    }

    #[must_use]
    pub fn with_cpu(mut self, cpu_usage_percent: f64) -> Self {
        self.cpu_usage_percent = cpu_usage_percent;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature_celsius = Some(celsius);
        self
    }

    #[must_use]
    pub fn with_battery(mut self, level_percent: f64, on_battery: bool) -> Self {
        self.battery = Some(BatteryState {
            level_percent,
            on_battery,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges() {
        assert_eq!(ComplexityBand::from_score(0), ComplexityBand::Simple);
        assert_eq!(ComplexityBand::from_score(29), ComplexityBand::Simple);
        assert_eq!(ComplexityBand::from_score(30), ComplexityBand::Moderate);
        assert_eq!(ComplexityBand::from_score(69), ComplexityBand::Moderate);
        assert_eq!(ComplexityBand::from_score(70), ComplexityBand::Complex);
        assert_eq!(ComplexityBand::from_score(100), ComplexityBand::Complex);
    }

    #[test]
    fn test_history_metadata() {
        let history = vec![
            HistoryEntry::new(Role::User, "abcdefgh"),
            HistoryEntry::new(Role::Assistant, "abcd").with_latency(100),
            HistoryEntry::new(Role::Assistant, "abcd").with_latency(300),
        ];
        let context = RequestContext::new("next").with_history(history);
        assert_eq!(context.metadata.message_count, 3);
        assert_eq!(context.metadata.total_tokens, 4);
        assert!((context.metadata.average_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recent_decisions_bounded() {
        let decisions: Vec<RecentDecision> = (0..15)
            .map(|index| RecentDecision {
                decision_id: Uuid::new_v4(),
                strategy: "speed".to_owned(),
                model: format!("m{index}"),
            })
            .collect();
        let context = RequestContext::new("q").with_recent_decisions(decisions);
        assert_eq!(context.recent_decisions.len(), MAX_RECENT_DECISIONS);
        assert_eq!(context.recent_decisions[0].model, "m5");
        assert_eq!(context.recent_decisions[9].model, "m14");
    }

    #[test]
    fn test_mode_override_wins() {
        let context = RequestContext::new("q").with_overrides(ManualOverrides {
            mode: Some(InteractionMode::Expert),
            model: None,
        });
        assert_eq!(context.mode, InteractionMode::Expert);
        assert_eq!("code-review".parse::<InteractionMode>().ok(), Some(InteractionMode::CodeReview));
    }
}
