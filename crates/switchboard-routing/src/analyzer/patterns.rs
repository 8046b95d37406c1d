//! Keyword tables for mode, domain and file-type detection.
//!
//! Every table lists its candidates in tie-break priority order. A candidate
//! earns one point per matching pattern; the highest non-zero score wins and
//! equal scores go to the candidate listed first.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Domain, FileType, InteractionMode};

/// Candidates with their patterns, in priority order.
pub struct KeywordTable<T> {
    entries: Vec<(T, Vec<Regex>)>,
}

impl<T: Copy + PartialEq> KeywordTable<T> {
    fn new(entries: &[(T, &[&str])]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(candidate, patterns)| {
                    let compiled = patterns
                        .iter()
                        .filter_map(|pattern| Regex::new(&format!("(?i){pattern}")).ok())
                        .collect();
                    (*candidate, compiled)
                })
                .collect(),
        }
    }

    /// Points per candidate, in priority order.
    pub fn scores(&self, text: &str) -> Vec<(T, usize)> {
        self.entries
            .iter()
            .map(|(candidate, patterns)| {
                let hits = patterns.iter().filter(|pattern| pattern.is_match(text)).count();
                (*candidate, hits)
            })
            .collect()
    }

    /// Winning candidate after adding `bonus` points to one candidate.
    pub fn best(&self, text: &str, bonus: Option<(T, usize)>) -> Option<T> {
        let mut best: Option<(T, usize)> = None;
        for (candidate, mut score) in self.scores(text) {
            if let Some((favoured, extra)) = bonus
                && favoured == candidate
            {
                score += extra;
            }
            if score > 0 && best.is_none_or(|(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }
        best.map(|(candidate, _)| candidate)
    }
}

pub static MODE_PATTERNS: LazyLock<KeywordTable<InteractionMode>> = LazyLock::new(|| {
    KeywordTable::new(&[
        (
            InteractionMode::CodeReview,
            &[
                r"\breview\b",
                r"\bfeedback on\b",
                r"\bcheck (my|this) code\b",
                r"\bany (issues|bugs|problems)\b",
                r"\bimprove (this|my)\b",
                r"\bbest practices?\b",
                r"\bcode smells?\b",
            ],
        ),
        (
            InteractionMode::Expert,
            &[
                r"\boptimi[sz]e\b",
                r"\barchitecture\b",
                r"\bperformance\b",
                r"\bscal(e|ability|able)\b",
                r"\bproduction\b",
                r"\btrade-?offs?\b",
                r"\badvanced\b",
            ],
        ),
        (
            InteractionMode::Learning,
            &[
                r"\bexplain\b",
                r"\bteach me\b",
                r"\bhow (does|do)\b",
                r"\bwhat (is|are)\b",
                r"\bwhy (does|do|is)\b",
                r"\bi'?m (new|learning)\b",
                r"\bbeginner\b",
                r"\bstep[- ]by[- ]step\b",
                r"\bunderstand\b",
            ],
        ),
    ])
});

pub static DOMAIN_PATTERNS: LazyLock<KeywordTable<Domain>> = LazyLock::new(|| {
    KeywordTable::new(&[
        (
            Domain::NextJs,
            &[
                r"\bnext\.?js\b",
                r"\bgetServerSideProps\b",
                r"\bgetStaticProps\b",
                r"\bapp router\b",
                r"\bnext/(router|link|image|navigation)\b",
                r#"['"]use client['"]"#,
            ],
        ),
        (
            Domain::Frontend,
            &[
                r"\breact\b",
                r"\bcomponents?\b",
                r"\bjsx\b",
                r"\bcss\b",
                r"\btailwind\b",
                r"\buse(State|Effect|Memo|Ref)\b",
                r"\bvue\b",
                r"\bsvelte\b",
            ],
        ),
        (
            Domain::Backend,
            &[
                r"\bapi\b",
                r"\bendpoints?\b",
                r"\bserver\b",
                r"\bdatabase\b",
                r"\bsql\b",
                r"\bexpress\b",
                r"\bmiddleware\b",
                r"\brest(ful)?\b",
            ],
        ),
        (
            Domain::DataScience,
            &[
                r"\bpandas\b",
                r"\bnumpy\b",
                r"\bdataframe\b",
                r"\bmachine learning\b",
                r"\btraining\b",
                r"\bregression\b",
                r"\bdatasets?\b",
            ],
        ),
        (
            Domain::DevOps,
            &[
                r"\bdocker(file)?\b",
                r"\bkubernetes\b",
                r"\bk8s\b",
                r"\bci/?cd\b",
                r"\bdeploy(ment)?\b",
                r"\bterraform\b",
                r"\bnginx\b",
            ],
        ),
        (
            Domain::Script,
            &[
                r"\bscript\b",
                r"\bbash\b",
                r"\bautomate\b",
                r"\bcron\b",
                r"\bcommand line\b",
                r"\bcli\b",
            ],
        ),
    ])
});

pub static FILE_TYPE_PATTERNS: LazyLock<KeywordTable<FileType>> = LazyLock::new(|| {
    KeywordTable::new(&[
        (
            FileType::NextJsPage,
            &[
                r"\bpage\.(tsx|jsx)\b",
                r"\bpages/",
                r"\bapp/\S*page",
                r"\bgetServerSideProps\b",
            ],
        ),
        (
            FileType::ReactComponent,
            &[
                r"\.(tsx|jsx)\b",
                r"\bcomponent\b",
                r"\buse(State|Effect)\b",
                r"<[A-Z][A-Za-z]*[\s/>]",
            ],
        ),
        (
            FileType::TypeScript,
            &[
                r"\.ts\b",
                r"\btypescript\b",
                r"```(ts|typescript)\b",
                r"\binterface\s+[A-Z]\w*\s*\{",
            ],
        ),
        (
            FileType::JavaScript,
            &[
                r"\.m?js\b",
                r"\bjavascript\b",
                r"```(js|javascript)\b",
                r"\bconsole\.log\b",
                r"\brequire\(",
            ],
        ),
        (
            FileType::Python,
            &[
                r"\.py\b",
                r"\bpython\b",
                r"```(py|python)\b",
                r"\bdef\s+\w+\(",
                r"\bpip install\b",
            ],
        ),
        (
            FileType::Rust,
            &[
                r"\.rs\b",
                r"\brust\b",
                r"```rust\b",
                r"\bfn\s+\w+",
                r"\bcargo\b",
            ],
        ),
        (
            FileType::Shell,
            &[
                r"\.(sh|bash)\b",
                r"\bshell\b",
                r"```(sh|bash|shell)\b",
                r"#!/bin/(ba)?sh",
            ],
        ),
    ])
});

/// File type implied by a path hint.
pub fn file_type_from_hint(hint: &str) -> FileType {
    let lower = hint.to_ascii_lowercase();
    let file_name = lower.rsplit(['/', '\\']).next().unwrap_or(&lower);
    let extension = file_name.rsplit_once('.').map_or("", |(_, extension)| extension);

    let is_next_route = file_name.starts_with("page.")
        || file_name.starts_with("layout.")
        || lower.contains("pages/");
    match extension {
        "tsx" | "jsx" if is_next_route => FileType::NextJsPage,
        "tsx" | "jsx" => FileType::ReactComponent,
        "ts" | "mts" => FileType::TypeScript,
        "js" | "mjs" | "cjs" => FileType::JavaScript,
        "py" => FileType::Python,
        "rs" => FileType::Rust,
        "sh" | "bash" | "zsh" => FileType::Shell,
        _ => FileType::Undetected,
    }
}

/// Domain implied by a file type, used as a hint bonus.
pub fn domain_for_file_type(file_type: FileType) -> Option<Domain> {
    match file_type {
        FileType::NextJsPage => Some(Domain::NextJs),
        FileType::ReactComponent => Some(Domain::Frontend),
        FileType::Shell => Some(Domain::Script),
        FileType::TypeScript
        | FileType::JavaScript
        | FileType::Python
        | FileType::Rust
        | FileType::Undetected => None,
    }
}
