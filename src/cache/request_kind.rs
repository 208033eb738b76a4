//! Keyword-based request-kind detection.
//!
//! Feeds the `request_type` admission condition. A single Aho-Corasick
//! automaton scans the normalized request once; each keyword votes for its
//! kind and the kind with the most votes wins. Keywords are matched as whole
//! words by padding both haystack and patterns with spaces.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::normalize::normalize;

/// Coarse category of a request, used by strategy admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Command,
    CodeAnalysis,
    Question,
    General,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Command => "command",
            RequestKind::CodeAnalysis => "code_analysis",
            RequestKind::Question => "question",
            RequestKind::General => "general",
        }
    }

    /// Scored kinds in tie-break order.
    const SCORED: [RequestKind; 3] = [
        RequestKind::Command,
        RequestKind::CodeAnalysis,
        RequestKind::Question,
    ];

    fn slot(&self) -> Option<usize> {
        Self::SCORED.iter().position(|k| k == self)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const COMMAND_KEYWORDS: &[&str] = &[
    "run", "list", "show", "delete", "remove", "create", "install", "build", "start", "stop",
    "restart", "execute", "open", "move", "copy", "rename", "git", "npm", "cargo", "ls",
    "mkdir", "cd", "grep", "find", "commit", "push", "pull", "deploy",
];

const CODE_ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "review", "refactor", "function", "class", "method", "bug",
    "debug", "optimize", "optimise", "code", "complexity", "lint", "performance",
    "vulnerability", "type", "compile", "error", "stack trace",
];

const QUESTION_KEYWORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "which", "who", "explain", "does", "can",
    "should", "is there", "difference between",
];

struct KeywordTable {
    automaton: AhoCorasick,
    kinds: Vec<RequestKind>,
}

static TABLE: Lazy<KeywordTable> = Lazy::new(|| {
    let groups: [(RequestKind, &[&str]); 3] = [
        (RequestKind::Command, COMMAND_KEYWORDS),
        (RequestKind::CodeAnalysis, CODE_ANALYSIS_KEYWORDS),
        (RequestKind::Question, QUESTION_KEYWORDS),
    ];
    let mut patterns = Vec::new();
    let mut kinds = Vec::new();
    for (kind, words) in groups {
        for w in words {
            patterns.push(format!(" {w} "));
            kinds.push(kind);
        }
    }
    KeywordTable {
        automaton: AhoCorasick::new(&patterns).expect("static keyword patterns are valid"),
        kinds,
    }
});

/// Detect the request kind of raw (un-normalized) text.
pub fn detect(text: &str) -> RequestKind {
    detect_normalized(&normalize(text))
}

/// Detect the request kind of text already passed through [`normalize`].
pub fn detect_normalized(normalized: &str) -> RequestKind {
    if normalized.is_empty() {
        return RequestKind::General;
    }
    let haystack = format!(" {normalized} ");
    let mut votes = [0usize; RequestKind::SCORED.len()];
    for m in TABLE.automaton.find_overlapping_iter(&haystack) {
        if let Some(slot) = TABLE.kinds[m.pattern().as_usize()].slot() {
            votes[slot] += 1;
        }
    }

    let mut best = RequestKind::General;
    let mut best_votes = 0;
    for (kind, count) in RequestKind::SCORED.iter().zip(votes) {
        // Strictly greater: earlier kinds win ties.
        if count > best_votes {
            best = *kind;
            best_votes = count;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_command() {
        assert_eq!(detect("list files"), RequestKind::Command);
        assert_eq!(detect("git push origin main"), RequestKind::Command);
    }

    #[test]
    fn test_detect_code_analysis() {
        assert_eq!(
            detect("Refactor this function to reduce complexity"),
            RequestKind::CodeAnalysis
        );
    }

    #[test]
    fn test_detect_question() {
        assert_eq!(detect("Why does the borrow checker complain?"), RequestKind::Question);
    }

    #[test]
    fn test_detect_whole_words_only() {
        // "tools" contains "ls" but must not count as a command keyword.
        assert_eq!(detect("tools"), RequestKind::General);
        assert_eq!(detect("running"), RequestKind::General);
    }

    #[test]
    fn test_detect_adjacent_keywords_both_count() {
        // " run " and " list " share a space; overlapping search sees both.
        assert_eq!(detect("run list"), RequestKind::Command);
    }

    #[test]
    fn test_detect_empty_is_general() {
        assert_eq!(detect(""), RequestKind::General);
        assert_eq!(detect("!!!"), RequestKind::General);
    }

    #[test]
    fn test_tie_prefers_command() {
        // one command keyword, one question keyword
        assert_eq!(detect("how install"), RequestKind::Command);
    }

    #[test]
    fn test_kind_serde_snake_case() {
        let json = serde_json::to_string(&RequestKind::CodeAnalysis).unwrap();
        assert_eq!(json, r#""code_analysis""#);
    }
}
