//! Trigger matching.
//!
//! This module is the operational core of a turn:
//!
//! - Select the rules that can possibly match (anchor index, buckets, length
//!   and literal-multiset checks; see `compiled_rules.rs` and `trigger.rs`).
//! - Walk the survivors in rank order and try to align each trigger with the
//!   input words. The first alignment wins because the rule set is already
//!   sorted by specificity and definition order.
//! - Turn the wildcard spans of the winning alignment into captures.
//!
//! ## Alignment
//!
//! ```text
//! trigger: [what] [is] [#] [plus] [#]
//! input:    what   is   3   plus   4
//!                       └─ star1   └─ star2
//! ```
//!
//! Literals need exact equality with the normalized word. A wildcard consumes
//! one or more words that satisfy its class, trying the shortest run first and
//! growing it only when the rest of the trigger fails to align. A wildcard
//! therefore never eats a word a later literal needs.
//!
//! Failed `(token, word)` positions are memoized, so a trigger of `t` tokens
//! against `n` words costs at most `O(t * n^2)` even with many wildcards.

use super::compiled_rules::{CompiledRules, RuleId};
use super::metrics::{MatchMetrics, MatchRun};
use super::trigger::{InputWord, TriggerInfo};
use crate::{MatchResult, TriggerToken};
use std::ops::Range as WordSpan;
use std::time::Instant;
use tracing::{debug, trace};

/// Matches one input against a compiled rule set.
///
/// Usage: `Matcher::new(input, &compiled).run()`.
#[derive(Debug)]
pub(crate) struct Matcher<'a> {
    input: &'a str,
    info: TriggerInfo,
    compiled: &'a CompiledRules,
    /// Candidate rules in rank order.
    candidates: Vec<RuleId>,
    metrics: MatchMetrics,
    started: Instant,
}

impl<'a> Matcher<'a> {
    pub fn new(input: &'a str, compiled: &'a CompiledRules) -> Self {
        let started = Instant::now();
        let info = TriggerInfo::scan(input);

        let mut candidates: Vec<RuleId> = compiled.index.always_on.clone();
        for word in info.counts.keys() {
            if let Some(ids) = compiled.index.by_anchor.get(word) {
                candidates.extend(ids);
            }
        }
        candidates.sort_unstable();
        candidates.dedup();
        let indexed = candidates.len();

        candidates.retain(|&id| {
            let meta = &compiled.metas[id];
            info.buckets.contains(meta.buckets)
                && meta.min_words <= info.words.len()
                && meta
                    .literal_counts
                    .iter()
                    .all(|(word, needed)| info.counts.get(word).is_some_and(|have| have >= needed))
        });

        debug!(
            input = %info.normalized(),
            rules = compiled.len(),
            indexed,
            prefiltered = candidates.len(),
            "rule gating"
        );

        let metrics = MatchMetrics {
            rules_total: compiled.len(),
            indexed,
            prefiltered: candidates.len(),
            ..MatchMetrics::default()
        };
        Matcher { input, info, compiled, candidates, metrics, started }
    }

    /// Find the best rule and its captures.
    pub fn run(mut self) -> MatchRun {
        let mut result = MatchResult::no_match();

        for &id in &self.candidates {
            let rule = &self.compiled.rules[id];
            self.metrics.alignments += 1;
            if let Some(spans) = align(&rule.trigger.tokens, &self.info.words) {
                debug!(trigger = %rule.trigger, line = rule.line, "matched");
                let captures = spans.into_iter().map(|span| self.capture(span)).collect();
                result = MatchResult { rule: Some(rule.clone()), captures };
                break;
            }
            trace!(trigger = %rule.trigger, "alignment failed");
        }

        if !result.is_match() {
            debug!(input = %self.input, "no trigger matched");
        }

        self.metrics.total = self.started.elapsed();
        MatchRun { result, metrics: self.metrics }
    }

    /// Original-case text covered by a run of input words.
    fn capture(&self, span: WordSpan<usize>) -> String {
        let words = &self.info.words[span];
        match (words.first(), words.last()) {
            (Some(first), Some(last)) => self.input[first.range.start..last.range.end].to_string(),
            _ => String::new(),
        }
    }
}

/// Align `tokens` with `words`; on success return the word span of each wildcard, in order.
pub(crate) fn align(tokens: &[TriggerToken], words: &[InputWord]) -> Option<Vec<WordSpan<usize>>> {
    let mut alignment = Alignment {
        tokens,
        words,
        failed: vec![false; (tokens.len() + 1) * (words.len() + 1)],
        spans: Vec::new(),
    };
    alignment.step(0, 0).then_some(alignment.spans)
}

struct Alignment<'a> {
    tokens: &'a [TriggerToken],
    words: &'a [InputWord],
    /// `failed[t * (words + 1) + w]`: tokens from `t` can't align with words from `w`.
    failed: Vec<bool>,
    spans: Vec<WordSpan<usize>>,
}

impl Alignment<'_> {
    fn slot(&self, t: usize, w: usize) -> usize {
        t * (self.words.len() + 1) + w
    }

    fn step(&mut self, t: usize, w: usize) -> bool {
        if t == self.tokens.len() {
            return w == self.words.len();
        }
        // Every remaining token needs at least one word.
        if self.tokens.len() - t > self.words.len() - w {
            return false;
        }
        let slot = self.slot(t, w);
        if self.failed[slot] {
            return false;
        }

        let aligned = match &self.tokens[t] {
            TriggerToken::Literal(literal) => self.words[w].text == *literal && self.step(t + 1, w + 1),
            TriggerToken::Wildcard(kind) => {
                let kind = *kind;
                let mut end = w;
                let mut aligned = false;
                while end < self.words.len() && kind.accepts(&self.words[end].text) {
                    end += 1;
                    self.spans.push(w..end);
                    if self.step(t + 1, end) {
                        aligned = true;
                        break;
                    }
                    self.spans.pop();
                }
                aligned
            }
        };

        if !aligned {
            self.failed[slot] = true;
        }
        aligned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parse_document;
    use crate::{Options, Rule};
    use std::sync::Arc;

    fn compile(text: &str) -> CompiledRules {
        let doc = parse_document(text, &Options::default()).unwrap();
        CompiledRules::new(doc.rules.into_iter().map(Arc::new).collect::<Vec<Arc<Rule>>>())
    }

    fn matched(compiled: &CompiledRules, input: &str) -> Option<(String, Vec<String>)> {
        let run = Matcher::new(input, compiled).run();
        run.result.rule.map(|rule| (rule.responses[0].template.clone(), run.result.captures))
    }

    #[test]
    fn literal_trigger_needs_exact_sequence() {
        let compiled = compile("+ hello bot\n- hi\n");
        assert!(matched(&compiled, "Hello, BOT!").is_some());
        assert!(matched(&compiled, "hello bot please").is_none());
        assert!(matched(&compiled, "well hello bot").is_none());
        assert!(matched(&compiled, "hello").is_none());
    }

    #[test]
    fn wildcards_stop_at_later_literals() {
        let compiled = compile("+ encode * in base64\n- x\n");
        let (_, captures) = matched(&compiled, "encode hello world in base64").unwrap();
        assert_eq!(captures, vec!["hello world"]);
    }

    #[test]
    fn wildcard_backtracks_past_repeated_literal() {
        let compiled = compile("+ * in *\n- x\n");
        let (_, captures) = matched(&compiled, "put it in the box in the hall").unwrap();
        assert_eq!(captures, vec!["put it", "the box in the hall"]);
    }

    #[test]
    fn numeric_and_alpha_classes() {
        let compiled = compile("+ i am # years old\n- num\n+ i am _ years old\n- alpha\n");
        assert_eq!(matched(&compiled, "I am 42 years old").unwrap().0, "num");
        assert_eq!(matched(&compiled, "I am forty two years old").unwrap().0, "alpha");
        assert!(matched(&compiled, "I am 4two years old").is_none());
    }

    #[test]
    fn captures_keep_original_case_and_inner_punctuation() {
        let compiled = compile("+ my name is *\n- x\n");
        let (_, captures) = matched(&compiled, "My name is Mary-Jane O'Neil!").unwrap();
        assert_eq!(captures, vec!["Mary-Jane O'Neil"]);
    }

    #[test]
    fn capture_order_follows_trigger_order() {
        let compiled = compile("+ _ likes # *\n- x\n");
        let (_, captures) = matched(&compiled, "Alice likes 3 red apples").unwrap();
        assert_eq!(captures, vec!["Alice", "3", "red apples"]);
    }

    #[test]
    fn most_specific_rule_wins() {
        let compiled = compile("+ *\n- catch all\n+ hello *\n- greeting\n+ hello there friend\n- exact\n");
        assert_eq!(matched(&compiled, "hello there friend").unwrap().0, "exact");
        assert_eq!(matched(&compiled, "hello there").unwrap().0, "greeting");
        assert_eq!(matched(&compiled, "bye").unwrap().0, "catch all");
    }

    #[test]
    fn ties_go_to_first_definition() {
        let compiled = compile("+ say *\n- first\n+ say *\n- second\n");
        assert_eq!(matched(&compiled, "say something").unwrap().0, "first");
    }

    #[test]
    fn weighted_trigger_beats_specificity() {
        let compiled = compile("+ hello there\n- plain\n+ hello * {weight=10}\n- weighted\n");
        assert_eq!(matched(&compiled, "hello there").unwrap().0, "weighted");
    }

    #[test]
    fn gating_skips_impossible_rules() {
        let compiled = compile("+ what is # plus #\n- sum\n+ no no *\n- double\n+ tell me about *\n- about\n");

        let run = Matcher::new("what is three plus four", &compiled).run();
        assert!(!run.result.is_match());
        assert_eq!(run.metrics.indexed, 1);
        assert_eq!(run.metrics.prefiltered, 0);
        assert_eq!(run.metrics.alignments, 0);

        let run = Matcher::new("no way", &compiled).run();
        assert_eq!(run.metrics.indexed, 1);
        assert_eq!(run.metrics.prefiltered, 0);
    }

    #[test]
    fn empty_input_matches_nothing() {
        let compiled = compile("+ *\n- x\n");
        assert!(matched(&compiled, "").is_none());
        assert!(matched(&compiled, "?!").is_none());
    }

    #[test]
    fn many_wildcards_stay_fast() {
        let compiled = compile("+ * * * * * * * * zebra\n- x\n");
        let input = vec!["a"; 60].join(" ") + " zebra";
        assert!(matched(&compiled, &input).is_some());

        let input = vec!["a"; 60].join(" ") + " zebra b";
        assert!(matched(&compiled, &input).is_none());
    }
}
