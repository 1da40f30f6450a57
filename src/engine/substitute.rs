//! Input substitutions (`! sub what's = what is`).
//!
//! Applied to the raw input before matching. Patterns are compared word by
//! word after normalization, so `What's` and `whats` both hit `what's`.
//! Longer patterns are tried first; a replaced span is never rescanned.

use std::borrow::Cow;
use std::cmp::Reverse;

use super::trigger::normalize_word;

#[derive(Debug, Clone, Default)]
pub(crate) struct Substitutions {
    /// (normalized pattern words, replacement), longest pattern first.
    entries: Vec<(Vec<String>, String)>,
}

impl Substitutions {
    /// Add or replace the substitution for `pattern`; `None` removes it.
    pub fn define(&mut self, pattern: &str, replacement: Option<&str>) {
        let words: Vec<String> =
            pattern.split_whitespace().map(normalize_word).filter(|w| !w.is_empty()).collect();
        if words.is_empty() {
            return;
        }
        self.entries.retain(|(existing, _)| *existing != words);
        if let Some(replacement) = replacement {
            self.entries.push((words, replacement.to_string()));
            self.entries.sort_by_key(|(words, _)| Reverse((words.len(), words.iter().map(String::len).sum::<usize>())));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn apply<'i>(&self, input: &'i str) -> Cow<'i, str> {
        if self.entries.is_empty() {
            return Cow::Borrowed(input);
        }
        let raw: Vec<&str> = input.split_whitespace().collect();
        let normalized: Vec<String> = raw.iter().map(|w| normalize_word(w)).collect();

        let mut out: Vec<&str> = Vec::with_capacity(raw.len());
        let mut changed = false;
        let mut i = 0;
        while i < raw.len() {
            let hit = self.entries.iter().find(|(pattern, _)| normalized[i..].starts_with(pattern));
            match hit {
                Some((pattern, replacement)) => {
                    out.push(replacement);
                    i += pattern.len();
                    changed = true;
                }
                None => {
                    out.push(raw[i]);
                    i += 1;
                }
            }
        }

        if changed { Cow::Owned(out.join(" ")) } else { Cow::Borrowed(input) }
    }
}
