use std::sync::LazyLock;

use regex::Regex;

use super::patterns::DOMAIN_PATTERNS;
use crate::config::ComplexityWeights;

/// Scores request difficulty on a 0-100 scale.
pub trait ComplexityScorer: Send + Sync {
    /// Score for `text`, within `0..=100`.
    fn score(&self, text: &str) -> u8;
}

/// Raw signal counts extracted from a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplexitySignals {
    pub code_blocks: usize,
    pub code_lines: usize,
    pub technical_keywords: usize,
    /// 0 none, 1 async marker, 2 promise-like construct, 3 explicit concurrency vocabulary.
    pub async_depth: u8,
    pub branches: usize,
    pub declarations: usize,
    pub chars: usize,
    pub cross_domain: bool,
}

static CODE_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").ok());

static TECHNICAL_KEYWORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(algorithms?|architecture|concurrency|database|distributed|optimi[sz](e|ation)|performance|refactor(ing)?|scalab(le|ility)|security|microservices?|cach(e|ing)|threads?|mutex|recursion|recursive|complexity|transactions?|protocol|encryption|latency|memory leak|schema|migration)\b",
    )
    .ok()
});

static CONCURRENCY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\brace conditions?\b|\bdeadlocks?\b|\bmutex\b|\bsemaphore\b|\bconcurren(t|cy)\b|\bparallel\b|Promise\.(all|race)|\bjoin_all\b|\bspawn\b|\bworker threads?\b)",
    )
    .ok()
});

static PROMISE_LIKE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(\bpromises?\b|\bfutures?\b|\.then\(|\bcallbacks?\b|\bobservables?\b)").ok()
});

static ASYNC_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(async|await)\b").ok());

static BRANCH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\b(if|else|for|while|match|switch|case|catch|try|except|loop)\b").ok()
});

static DECLARATION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(export\s+)?(pub\s+)?(import|from|use|fn|def|class|function|struct|interface|enum|trait|const\s+\w+\s*=\s*\()\b",
    )
    .ok()
});

fn count(pattern: &LazyLock<Option<Regex>>, text: &str) -> usize {
    pattern
        .as_ref()
        .map_or(0, |regex| regex.find_iter(text).count())
}

fn matches(pattern: &LazyLock<Option<Regex>>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|regex| regex.is_match(text))
}

impl ComplexitySignals {
    /// Extracts signals from `text`.
    pub fn extract(text: &str) -> Self {
        let (code_blocks, code_lines) = CODE_BLOCK.as_ref().map_or((0, 0), |regex| {
            regex.captures_iter(text).fold((0, 0), |(blocks, lines), captures| {
                let body_lines = captures.get(1).map_or(0, |body| {
                    body.as_str().lines().filter(|line| !line.trim().is_empty()).count()
                });
                (blocks + 1, lines + body_lines)
            })
        });

        let async_depth = if matches(&CONCURRENCY, text) {
            3
        } else if matches(&PROMISE_LIKE, text) {
            2
        } else if matches(&ASYNC_MARKER, text) {
            1
        } else {
            0
        };

        let active_domains = DOMAIN_PATTERNS
            .scores(text)
            .into_iter()
            .filter(|(_, hits)| *hits > 0)
            .count();

        Self {
            code_blocks,
            code_lines,
            technical_keywords: count(&TECHNICAL_KEYWORD, text),
            async_depth,
            branches: count(&BRANCH, text),
            declarations: count(&DECLARATION, text),
            chars: text.chars().count(),
            cross_domain: active_domains > 1,
        }
    }
}

/// Regex-driven weighted sum of [`ComplexitySignals`].
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer {
    weights: ComplexityWeights,
}

impl HeuristicScorer {
    pub fn new(weights: ComplexityWeights) -> Self {
        Self { weights }
    }

    /// Weighted, unclamped score for already extracted signals.
    pub fn weigh(&self, signals: &ComplexitySignals) -> f64 {
        let weights = &self.weights;
        let capped = |value: f64, cap: f64| value.min(cap).max(0.0);

        let mut total = signals.code_blocks as f64 * weights.code_block;
        total += capped(signals.code_lines as f64 * weights.code_line, weights.code_line_cap);
        total += capped(
            signals.technical_keywords as f64 * weights.keyword,
            weights.keyword_cap,
        );
        total += f64::from(signals.async_depth) * weights.async_depth;
        total += capped(signals.branches as f64 * weights.cyclomatic, weights.cyclomatic_cap);
        total += capped(
            signals.declarations as f64 * weights.declaration,
            weights.declaration_cap,
        );
        total += capped(signals.chars as f64 / 100.0 * weights.length, weights.length_cap);
        if signals.cross_domain {
            total += weights.cross_domain;
        }
        total
    }
}

impl ComplexityScorer for HeuristicScorer {
    fn score(&self, text: &str) -> u8 {
        let signals = ComplexitySignals::extract(text);
        let total = self.weigh(&signals);
        tracing::debug!(?signals, total, "complexity signals");
        total.round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(text: &str) -> u8 {
        HeuristicScorer::default().score(text)
    }

    #[test]
    fn test_trivial_request_is_simple() {
        assert!(score("hello there") < 30);
    }

    #[test]
    fn test_async_depth_levels() {
        assert_eq!(ComplexitySignals::extract("plain text").async_depth, 0);
        assert_eq!(ComplexitySignals::extract("make it async").async_depth, 1);
        assert_eq!(ComplexitySignals::extract("a promise chain").async_depth, 2);
        assert_eq!(ComplexitySignals::extract("fix the race condition").async_depth, 3);
    }

    #[test]
    fn test_code_blocks_counted() {
        let text = "look:\n```rust\nfn a() {}\n\nfn b() {}\n```\nand\n```\nx\n```\n";
        let signals = ComplexitySignals::extract(text);
        assert_eq!(signals.code_blocks, 2);
        assert_eq!(signals.code_lines, 3);
    }

    #[test]
    fn test_heavy_request_is_complex() {
        let mut code = String::from("```typescript\n");
        for index in 0..30 {
            code.push_str(&format!("if (x{index}) {{ await fetch(api{index}); }}\n"));
        }
        code.push_str("```\n");
        let text = format!(
            "Our React component calls a REST API server with Promise.all and hits a race condition \
             under load. Review the architecture for concurrency, caching, performance and security \
             issues, and suggest a refactoring of the database transactions.\n{code}"
        );
        assert!(score(&text) >= 70, "score was {}", score(&text));
    }

    #[test]
    fn test_score_never_exceeds_bound() {
        let text = "race condition mutex ".repeat(500);
        assert!(score(&text) <= 100);
    }

    #[test]
    fn test_cross_domain_flag() {
        assert!(ComplexitySignals::extract("react component talking to the api server").cross_domain);
        assert!(!ComplexitySignals::extract("react component with css").cross_domain);
    }
}
