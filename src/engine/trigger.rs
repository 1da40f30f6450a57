//! Input normalization and coarse classification.
//!
//! Every turn starts here. The raw input is split into words, each word is
//! normalized, and cheap signals are derived so the matcher can discard most
//! rules before attempting an alignment.
//!
//! ## Normalization
//!
//! The rules are fixed because they decide match outcomes:
//!
//! 1. Split on Unicode whitespace, remembering each raw word's byte span.
//! 2. Lowercase the word (`str::to_lowercase`) and drop every character that
//!    is not `char::is_alphanumeric`. Words that end up empty are dropped.
//! 3. For captures, the span is the raw word with leading and trailing
//!    non-alphanumeric characters trimmed, so `"4?"` captures as `4` while
//!    `"don't"` keeps its apostrophe.
//!
//! Trigger literals go through [`normalize_word`] as well, so a trigger with
//! no wildcards matches exactly when the normalized word sequences are equal.
//!
//! ## Signals
//!
//! - **Buckets** (`BucketMask`): whether the input has an all-digit word (needed
//!   by `#`) or an all-alphabetic word (needed by `_`).
//! - **Counts**: how often each normalized word occurs. Used for anchor lookup
//!   and the literal multiset prefilter.

use super::compiled_rules::BucketMask;
use crate::{Range, WildcardKind};
use std::collections::HashMap;

/// A normalized input word and the original text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InputWord {
    pub text: String,
    pub range: Range,
}

/// Input characteristics computed once per turn.
#[derive(Debug, Clone)]
pub(crate) struct TriggerInfo {
    pub words: Vec<InputWord>,
    pub buckets: BucketMask,
    pub counts: HashMap<String, usize>,
}

impl TriggerInfo {
    pub fn scan(input: &str) -> Self {
        let mut words = Vec::new();
        let mut buckets = BucketMask::empty();
        let mut counts: HashMap<String, usize> = HashMap::new();

        for m in regex!(r"\S+").find_iter(input) {
            let raw = m.as_str();
            let text = normalize_word(raw);
            if text.is_empty() {
                continue;
            }

            let leading = raw.len() - raw.trim_start_matches(|c: char| !c.is_alphanumeric()).len();
            let trailing = raw.len() - raw.trim_end_matches(|c: char| !c.is_alphanumeric()).len();
            let range = Range { start: m.start() + leading, end: m.end() - trailing };

            if WildcardKind::Numeric.accepts(&text) {
                buckets |= BucketMask::HAS_NUMERIC_WORD;
            }
            if WildcardKind::Alphabetic.accepts(&text) {
                buckets |= BucketMask::HAS_ALPHA_WORD;
            }

            *counts.entry(text.clone()).or_default() += 1;
            words.push(InputWord { text, range });
        }

        TriggerInfo { words, buckets, counts }
    }

    /// The normalized input as a single space-separated string.
    pub fn normalized(&self) -> String {
        self.words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ")
    }
}

/// Lowercase `raw` and strip everything that is not alphanumeric.
pub(crate) fn normalize_word(raw: &str) -> String {
    raw.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_punctuation() {
        let info = TriggerInfo::scan("  What's UP,   doc?! ");
        assert_eq!(info.normalized(), "whats up doc");
    }

    #[test]
    fn drops_punctuation_only_words() {
        let info = TriggerInfo::scan("hello -- world ...");
        assert_eq!(info.normalized(), "hello world");
        assert_eq!(info.words.len(), 2);
    }

    #[test]
    fn spans_trim_outer_punctuation_only() {
        let input = "say (don't) 4?";
        let info = TriggerInfo::scan(input);
        let spans: Vec<&str> = info.words.iter().map(|w| &input[w.range.start..w.range.end]).collect();
        assert_eq!(spans, vec!["say", "don't", "4"]);
    }

    #[test]
    fn buckets_follow_word_classes() {
        let info = TriggerInfo::scan("abc 123");
        assert!(info.buckets.contains(BucketMask::HAS_NUMERIC_WORD | BucketMask::HAS_ALPHA_WORD));

        let info = TriggerInfo::scan("r2d2");
        assert!(info.buckets.is_empty());
    }

    #[test]
    fn counts_repeated_words() {
        let info = TriggerInfo::scan("no no NO yes");
        assert_eq!(info.counts.get("no"), Some(&3));
        assert_eq!(info.counts.get("yes"), Some(&1));
    }
}
